use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::sort_key::sort_key;

const TABLE_CLOSE: &str = "|}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Producer works table, `{{pwt row|...}}`.
    Songs,
    /// Album works table, `{{awt row|...}}`.
    Albums,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Songs => "pwt",
            Self::Albums => "awt",
        }
    }

    pub fn is_album(self) -> bool {
        matches!(self, Self::Albums)
    }

    fn head_regex(self) -> &'static Regex {
        static SONGS: OnceLock<Regex> = OnceLock::new();
        static ALBUMS: OnceLock<Regex> = OnceLock::new();
        let (cell, marker) = match self {
            Self::Songs => (&SONGS, "pwt"),
            Self::Albums => (&ALBUMS, "awt"),
        };
        cell.get_or_init(|| {
            Regex::new(&format!(
                r#"\{{\|\s*class=["']sortable\s+producer-table["']\s*\n\|-[^{{}}\n]*\n!\s*\{{\{{\s*(?i:{marker}[ _]head)\s*\}}\}}\s*\n"#
            ))
            .expect("valid regex")
        })
    }

    fn row_regex(self) -> &'static Regex {
        static SONGS: OnceLock<Regex> = OnceLock::new();
        static ALBUMS: OnceLock<Regex> = OnceLock::new();
        let (cell, marker) = match self {
            Self::Songs => (&SONGS, "p[wh]t"),
            Self::Albums => (&ALBUMS, "awt"),
        };
        cell.get_or_init(|| {
            Regex::new(&format!(
                r"(?P<row>\|-[^\n]*\n[\s\x{{200B}}]*\|[\s\x{{200B}}]*\{{\{{\s*(?i:{marker}[ _]row)\s*\|(?P<args>[^\n]*)\}}\}})[\s\x{{200B}}]*\n"
            ))
            .expect("valid regex")
        })
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a discography table.
///
/// Rows read from the page and rows created by the bot share this shape, so
/// re-rendering an untouched table reproduces its rows exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    raw_parameters: String,
    sort_key: String,
    serialized: String,
}

impl TableEntry {
    pub fn from_markup(serialized: &str, raw_parameters: &str, kind: TableKind) -> Self {
        Self {
            raw_parameters: raw_parameters.to_string(),
            sort_key: sort_key(raw_parameters, kind.is_album()),
            serialized: serialized.to_string(),
        }
    }

    /// A fresh `|-\n| {{pwt row|TITLE}}` row.
    ///
    /// `=` in the title is written as `{{=}}` so it stays positional.
    pub fn for_title(title: &str, kind: TableKind) -> Self {
        let escaped = title.replace('=', "{{=}}");
        let serialized = format!("|-\n| {{{{{} row|{escaped}}}}}", kind.as_str());
        Self::from_markup(&serialized, &escaped, kind)
    }

    pub fn raw_parameters(&self) -> &str {
        &self.raw_parameters
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

/// A located `{| class="sortable producer-table" ... |}` block.
#[derive(Debug, Clone)]
pub struct TableBlock {
    kind: TableKind,
    source_range: Range<usize>,
    header: String,
    entries: Vec<TableEntry>,
}

impl TableBlock {
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Byte range of the original block inside the page.
    pub fn source_range(&self) -> Range<usize> {
        self.source_range.clone()
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Insert before the first entry whose key is strictly greater.
    ///
    /// Entries with an equal key stay ahead of the new one. Returns the
    /// index the entry landed at.
    pub fn insert(&mut self, entry: TableEntry) -> usize {
        let index = self
            .entries
            .iter()
            .position(|existing| existing.sort_key() > entry.sort_key())
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
        index
    }

    pub fn render(&self) -> String {
        let mut output = self.header.clone();
        if !self.entries.is_empty() {
            output.push_str(&self.rows_markup());
            output.push('\n');
        }
        output.push_str(TABLE_CLOSE);
        output
    }

    pub fn rows_markup(&self) -> String {
        self.entries
            .iter()
            .map(TableEntry::serialized)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Find every table block of `kind` in page order.
pub fn locate_tables(content: &str, kind: TableKind) -> Vec<TableBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0usize;

    while cursor < content.len() {
        let Some(head) = kind.head_regex().find_at(content, cursor) else {
            break;
        };
        let Some(close) = find_table_close(content, head.end()) else {
            break;
        };
        let end = close + TABLE_CLOSE.len();
        let block_text = &content[head.start()..end];

        let entries = kind
            .row_regex()
            .captures_iter(block_text)
            .filter_map(|captures| {
                let row = captures.name("row")?;
                let args = captures.name("args")?;
                Some(TableEntry::from_markup(row.as_str(), args.as_str(), kind))
            })
            .collect();

        blocks.push(TableBlock {
            kind,
            source_range: head.start()..end,
            header: head.as_str().to_string(),
            entries,
        });
        cursor = end;
    }

    blocks
}

/// First `|}` at or after `from` that is not the tail of a `|}}` template close.
fn find_table_close(content: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(offset) = content[search..].find(TABLE_CLOSE) {
        let position = search + offset;
        let after = position + TABLE_CLOSE.len();
        if !content[after..].starts_with('}') {
            return Some(position);
        }
        search = after;
    }
    None
}

/// Replace each block's source range with its rendered form.
pub fn splice_blocks(content: &str, blocks: &[&TableBlock]) -> String {
    let mut ordered: Vec<&TableBlock> = blocks.to_vec();
    ordered.sort_by_key(|block| std::cmp::Reverse(block.source_range.start));

    let mut output = content.to_string();
    for block in ordered {
        output.replace_range(block.source_range(), &block.render());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{TableEntry, TableKind, locate_tables, splice_blocks};

    const SONG_TABLE: &str = "{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{Pwt head}}\n|-\n| {{pwt row|Alpha}}\n|-\n| {{pwt row|夢の欠片 (Yume no Kakera)|kanji=夢の欠片}}\n|}";

    #[test]
    fn locates_song_table_and_rows() {
        let page = format!("Intro\n==Songs==\n{SONG_TABLE}\n[[Category:Producers]]");
        let blocks = locate_tables(&page, TableKind::Songs);
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(&page[block.source_range()], SONG_TABLE);
        assert!(block.header().ends_with("! {{Pwt head}}\n"));
        assert_eq!(block.entries().len(), 2);
        assert_eq!(block.entries()[0].raw_parameters(), "Alpha");
        assert_eq!(block.entries()[0].serialized(), "|-\n| {{pwt row|Alpha}}");
        assert_eq!(block.entries()[1].sort_key(), "yume no kakera|kanji=夢の欠片");
    }

    #[test]
    fn render_without_insertions_round_trips() {
        let blocks = locate_tables(SONG_TABLE, TableKind::Songs);
        assert_eq!(blocks[0].render(), SONG_TABLE);
    }

    #[test]
    fn row_attributes_and_zero_width_space_are_preserved() {
        let table = "{| class='sortable producer-table'\n|-\n!{{pwt_head}}\n|- style=\"x\"\n|\u{200B} {{Pwt_Row|Beta}}  \n|}";
        let blocks = locate_tables(table, TableKind::Songs);
        assert_eq!(blocks.len(), 1);
        let entry = &blocks[0].entries()[0];
        assert_eq!(entry.serialized(), "|- style=\"x\"\n|\u{200B} {{Pwt_Row|Beta}}");
        assert_eq!(entry.raw_parameters(), "Beta");
    }

    #[test]
    fn template_close_inside_table_does_not_end_it() {
        let table = "{| class=\"sortable producer-table\"\n|-\n! {{awt head}}\n|-\n| {{awt row|A|note={{foo|}}}}\n|-\n| {{awt row|B}}\n|}\nafter";
        let blocks = locate_tables(table, TableKind::Albums);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].entries().len(), 2);
        assert_eq!(&table[blocks[0].source_range()], table.trim_end_matches("\nafter"));
    }

    #[test]
    fn empty_table_round_trips() {
        let table = "{| class=\"sortable producer-table\"\n|-\n! {{awt head}}\n|}";
        let blocks = locate_tables(table, TableKind::Albums);
        assert!(blocks[0].entries().is_empty());
        assert_eq!(blocks[0].render(), table);
    }

    #[test]
    fn equals_sign_in_new_title_is_escaped() {
        let entry = TableEntry::for_title("E=MC2", TableKind::Songs);
        assert_eq!(entry.serialized(), "|-\n| {{pwt row|E{{=}}MC2}}");
        assert_eq!(entry.raw_parameters(), "E{{=}}MC2");

        let page = format!("{{| class=\"sortable producer-table\"\n|-\n! {{{{pwt head}}}}\n{}\n|}}", entry.serialized());
        let reparsed = locate_tables(&page, TableKind::Songs);
        assert_eq!(reparsed[0].entries()[0], entry);
    }

    #[test]
    fn kinds_do_not_cross_match() {
        assert!(locate_tables(SONG_TABLE, TableKind::Albums).is_empty());
    }

    #[test]
    fn finds_primary_and_compilation_album_tables() {
        let album = "{| class=\"sortable producer-table\"\n|-\n! {{Awt head}}\n|-\n| {{awt row|One (album)}}\n|}";
        let page = format!("{album}\n\n===Compilations===\n{album}\n");
        let blocks = locate_tables(&page, TableKind::Albums);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].source_range().end <= blocks[1].source_range().start);
    }

    #[test]
    fn insert_places_ties_after_existing_entries() {
        let mut block = locate_tables(SONG_TABLE, TableKind::Songs).remove(0);
        let index = block.insert(TableEntry::for_title("Alpha", TableKind::Songs));
        assert_eq!(index, 1);
        assert_eq!(block.entries()[1].serialized(), "|-\n| {{pwt row|Alpha}}");
    }

    #[test]
    fn splice_replaces_blocks_from_the_back() {
        let album = "{| class=\"sortable producer-table\"\n|-\n! {{Awt head}}\n|-\n| {{awt row|M}}\n|}";
        let page = format!("a\n{album}\nb\n{album}\nc");
        let mut blocks = locate_tables(&page, TableKind::Albums);
        blocks[0].insert(TableEntry::for_title("A", TableKind::Albums));
        blocks[1].insert(TableEntry::for_title("Z", TableKind::Albums));
        let spliced = splice_blocks(&page, &[&blocks[0], &blocks[1]]);
        assert!(spliced.contains("| {{awt row|A}}\n|-\n| {{awt row|M}}\n|}\nb"));
        assert!(spliced.contains("| {{awt row|M}}\n|-\n| {{awt row|Z}}\n|}\nc"));
    }
}
