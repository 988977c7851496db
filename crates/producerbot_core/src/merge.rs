//! Insert missing songs and albums into a producer page's discography tables.

use crate::error::PageError;
use crate::tables::{TableBlock, TableEntry, TableKind, locate_tables, splice_blocks};
use crate::transclusion::AlbumCandidate;

const NEW_ALBUM_TABLE_HEADER: &str = "==Discography==\n{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{awt head}}\n";
const NOTOC_MARKER: &str = "__NOTOC__";

/// Insert `missing` titles into the page's single song table.
pub fn merge_songs(content: &str, missing: &[String]) -> Result<String, PageError> {
    if missing.is_empty() {
        return Ok(content.to_string());
    }

    let mut blocks = locate_tables(content, TableKind::Songs);
    if blocks.len() != 1 {
        return Err(PageError::TableShape {
            kind: TableKind::Songs,
            found: blocks.len(),
            expected: "exactly one",
        });
    }

    let block = &mut blocks[0];
    insert_titles(block, missing.iter().map(String::as_str));
    Ok(splice_blocks(content, &[&*block]))
}

/// Insert `missing` albums into the page's album tables.
///
/// With no album table a new `==Discography==` section is created; with two,
/// compilations go to the second table.
pub fn merge_albums(content: &str, missing: &[AlbumCandidate]) -> Result<String, PageError> {
    if missing.is_empty() {
        return Ok(content.to_string());
    }

    let mut blocks = locate_tables(content, TableKind::Albums);
    let found = blocks.len();
    match blocks.as_mut_slice() {
        [] => Ok(insert_new_album_table(content, missing)),
        [primary] => {
            insert_titles(primary, missing.iter().map(|album| album.title.as_str()));
            Ok(splice_blocks(content, &[&*primary]))
        }
        [primary, compilations] => {
            let mut touched = [false; 2];
            for album in missing {
                let (target, index) = if album.is_compilation {
                    (&mut *compilations, 1)
                } else {
                    (&mut *primary, 0)
                };
                target.insert(TableEntry::for_title(&album.title, TableKind::Albums));
                touched[index] = true;
            }
            let changed: Vec<&TableBlock> = [&*primary, &*compilations]
                .into_iter()
                .zip(touched)
                .filter_map(|(block, touched)| touched.then_some(block))
                .collect();
            Ok(splice_blocks(content, &changed))
        }
        _ => Err(PageError::TableShape {
            kind: TableKind::Albums,
            found,
            expected: "at most two",
        }),
    }
}

fn insert_titles<'a>(block: &mut TableBlock, titles: impl IntoIterator<Item = &'a str>) {
    let kind = block.kind();
    for title in titles {
        block.insert(TableEntry::for_title(title, kind));
    }
}

fn insert_new_album_table(content: &str, missing: &[AlbumCandidate]) -> String {
    let mut entries: Vec<TableEntry> = missing
        .iter()
        .map(|album| TableEntry::for_title(&album.title, TableKind::Albums))
        .collect();
    entries.sort_by(|left, right| left.sort_key().cmp(right.sort_key()));

    let rows = entries
        .iter()
        .map(TableEntry::serialized)
        .collect::<Vec<_>>()
        .join("\n");
    let table = format!("{NEW_ALBUM_TABLE_HEADER}{rows}\n|}}\n\n");

    match category_tail(content) {
        Some(tail) => {
            let mut output = String::with_capacity(content.len() + table.len() + 3);
            output.push_str(&content[..tail.start]);
            push_heading_break(&mut output);
            output.push_str(&table);
            if tail.has_notoc {
                output.push_str(NOTOC_MARKER);
                output.push('\n');
            }
            output.push_str(&content[tail.categories_start..]);
            output
        }
        None => {
            let mut output = content.to_string();
            push_heading_break(&mut output);
            output.push_str(&table);
            output
        }
    }
}

/// A heading only renders at the start of a line; separate it from
/// preceding text by a blank line.
fn push_heading_break(output: &mut String) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push_str("\n\n");
    }
}

struct CategoryTail {
    /// Where the new table goes: the `__NOTOC__` marker, or the whitespace
    /// before the first category link.
    start: usize,
    categories_start: usize,
    has_notoc: bool,
}

/// Locate the first `[[Category:` link together with an optional
/// `__NOTOC__` and whitespace directly before it.
fn category_tail(content: &str) -> Option<CategoryTail> {
    let categories_start = ["[[Category:", "[[category:"]
        .iter()
        .filter_map(|marker| content.find(marker))
        .min()?;

    let before = &content[..categories_start];
    let without_space = before.trim_end();
    match without_space.strip_suffix(NOTOC_MARKER) {
        Some(head) => Some(CategoryTail {
            start: head.len(),
            categories_start,
            has_notoc: true,
        }),
        None => Some(CategoryTail {
            start: without_space.len(),
            categories_start,
            has_notoc: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_albums, merge_songs};
    use crate::error::PageError;
    use crate::tables::{TableKind, locate_tables};
    use crate::transclusion::AlbumCandidate;

    fn song_page(rows: &[&str]) -> String {
        let body: String = rows
            .iter()
            .map(|row| format!("|-\n| {{{{pwt row|{row}}}}}\n"))
            .collect();
        format!(
            "{{{{ProdLinks|Kikuo}}}}\n==Songs==\n{{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{{{pwt head}}}}\n{body}|}}\n\n__NOTOC__\n[[Category:Producers]]"
        )
    }

    fn album_table(rows: &[&str]) -> String {
        let body: String = rows
            .iter()
            .map(|row| format!("|-\n| {{{{awt row|{row}}}}}\n"))
            .collect();
        format!(
            "{{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{{{awt head}}}}\n{body}|}}"
        )
    }

    fn song_titles(content: &str) -> Vec<String> {
        locate_tables(content, TableKind::Songs)[0]
            .entries()
            .iter()
            .map(|entry| entry.raw_parameters().to_string())
            .collect()
    }

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn inserts_songs_in_sorted_position_across_runs() {
        let page = song_page(&["a", "c"]);
        let with_b = merge_songs(&page, &owned(&["b"])).expect("merge");
        assert_eq!(song_titles(&with_b), owned(&["a", "b", "c"]));

        let with_d = merge_songs(&with_b, &owned(&["d"])).expect("merge");
        assert_eq!(song_titles(&with_d), owned(&["a", "b", "c", "d"]));
        assert!(with_d.ends_with("| {{pwt row|d}}\n|}\n\n__NOTOC__\n[[Category:Producers]]"));
    }

    #[test]
    fn insertion_uses_romanized_keys() {
        let page = song_page(&["Alpha", "Zeta"]);
        let merged = merge_songs(&page, &owned(&["夢の欠片 (Yume no Kakera)", "Beta"])).expect("merge");
        assert_eq!(
            song_titles(&merged),
            owned(&["Alpha", "Beta", "夢の欠片 (Yume no Kakera)", "Zeta"])
        );
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let page = song_page(&["Same|kanji=x"]);
        let merged = merge_songs(&page, &owned(&["Same", "SAME", "same"])).expect("merge");
        assert_eq!(
            song_titles(&merged),
            owned(&["Same", "SAME", "same", "Same|kanji=x"])
        );
    }

    #[test]
    fn empty_missing_list_leaves_content_untouched() {
        let page = "no tables here";
        assert_eq!(merge_songs(page, &[]).expect("merge"), page);
        assert_eq!(merge_albums(page, &[]).expect("merge"), page);
    }

    #[test]
    fn song_table_must_be_unique() {
        let missing = owned(&["x"]);
        let none = merge_songs("{{ProdLinks|Kikuo}}", &missing).expect_err("must fail");
        assert!(matches!(none, PageError::TableShape { found: 0, .. }));

        let page = song_page(&["a"]);
        let doubled = format!("{page}\n{page}");
        let twice = merge_songs(&doubled, &missing).expect_err("must fail");
        assert!(matches!(twice, PageError::TableShape { found: 2, .. }));
    }

    #[test]
    fn creates_album_table_before_category_links() {
        let page = "{{ProdLinks|Kikuo}}\nBio.\n\n__NOTOC__\n[[Category:Producers]]\n[[Category:Japanese]]";
        let merged = merge_albums(page, &[AlbumCandidate::new("Album X", false)]).expect("merge");
        assert_eq!(
            merged,
            "{{ProdLinks|Kikuo}}\nBio.\n\n==Discography==\n{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{awt head}}\n|-\n| {{awt row|Album X}}\n|}\n\n__NOTOC__\n[[Category:Producers]]\n[[Category:Japanese]]"
        );
        let blocks = locate_tables(&merged, TableKind::Albums);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].entries().len(), 1);
    }

    #[test]
    fn new_album_table_without_notoc_sits_before_categories() {
        let page = "Bio.\n\n[[category:Producers]]";
        let merged = merge_albums(page, &[AlbumCandidate::new("Album X", true)]).expect("merge");
        assert!(merged.starts_with("Bio.\n\n==Discography==\n"));
        assert!(merged.ends_with("| {{awt row|Album X}}\n|}\n\n[[category:Producers]]"));
    }

    #[test]
    fn new_album_table_is_sorted_and_appended_without_categories() {
        let page = "{{ProdLinks|Kikuo}}\n";
        let merged = merge_albums(
            page,
            &[
                AlbumCandidate::new("Zebra (album)", true),
                AlbumCandidate::new("夢 (Yume) (album)", false),
                AlbumCandidate::new("Apple (album)", false),
            ],
        )
        .expect("merge");
        assert!(merged.starts_with("{{ProdLinks|Kikuo}}\n==Discography==\n"));
        assert!(merged.ends_with(
            "| {{awt row|Apple (album)}}\n|-\n| {{awt row|夢 (Yume) (album)}}\n|-\n| {{awt row|Zebra (album)}}\n|}\n\n"
        ));
    }

    #[test]
    fn single_album_table_ignores_compilation_flag() {
        let page = format!("{}\n[[Category:Producers]]", album_table(&["B (album)"]));
        let merged = merge_albums(
            &page,
            &[
                AlbumCandidate::new("C (album)", true),
                AlbumCandidate::new("A (album)", false),
            ],
        )
        .expect("merge");
        let blocks = locate_tables(&merged, TableKind::Albums);
        assert_eq!(blocks.len(), 1);
        let titles: Vec<&str> = blocks[0]
            .entries()
            .iter()
            .map(|entry| entry.raw_parameters())
            .collect();
        assert_eq!(titles, vec!["A (album)", "B (album)", "C (album)"]);
        assert!(merged.ends_with("|}\n[[Category:Producers]]"));
    }

    #[test]
    fn two_album_tables_route_by_compilation_flag() {
        let page = format!(
            "==Albums==\n{}\n===Compilations===\n{}\n",
            album_table(&["M (album)"]),
            album_table(&["M Best (album)"])
        );
        let merged = merge_albums(
            &page,
            &[
                AlbumCandidate::new("Z Best (album)", true),
                AlbumCandidate::new("A (album)", false),
            ],
        )
        .expect("merge");
        let blocks = locate_tables(&merged, TableKind::Albums);
        let titles = |index: usize| -> Vec<String> {
            blocks[index]
                .entries()
                .iter()
                .map(|entry| entry.raw_parameters().to_string())
                .collect()
        };
        assert_eq!(titles(0), owned(&["A (album)", "M (album)"]));
        assert_eq!(titles(1), owned(&["M Best (album)", "Z Best (album)"]));
        assert!(merged.contains("|}\n===Compilations===\n{|"));
    }

    #[test]
    fn appended_album_table_starts_on_its_own_line() {
        let merged = merge_albums("{{ProdLinks|Kikuo}}", &[AlbumCandidate::new("Album X", false)])
            .expect("merge");
        assert!(merged.starts_with("{{ProdLinks|Kikuo}}\n\n==Discography==\n"));

        let page = "{{ProdLinks|Kikuo}}\nBio text.\n\n[[Category:Producers]]";
        let merged = merge_albums(page, &[AlbumCandidate::new("Album X", false)]).expect("merge");
        assert!(merged.starts_with("{{ProdLinks|Kikuo}}\nBio text.\n\n==Discography==\n"));
    }

    #[test]
    fn untouched_compilation_table_is_left_alone() {
        let empty = "{| class=\"sortable producer-table\"\n|-\n! {{awt head}}\n|}";
        let page = format!("{}\n===Compilations===\n{empty}\n", album_table(&["M (album)"]));
        let merged = merge_albums(&page, &[AlbumCandidate::new("A (album)", false)])
            .expect("merge");
        assert!(merged.ends_with(&format!("|}}\n===Compilations===\n{empty}\n")));
        assert_eq!(
            locate_tables(&merged, TableKind::Albums)[0].entries().len(),
            2
        );
    }

    #[test]
    fn titles_with_equals_sign_stay_positional() {
        let page = song_page(&["a"]);
        let merged = merge_songs(&page, &owned(&["E=MC2"])).expect("merge");
        assert!(merged.contains("| {{pwt row|E{{=}}MC2}}\n"));
        assert!(!merged.contains("{{pwt row|E=MC2}}"));
    }

    #[test]
    fn more_than_two_album_tables_is_an_error() {
        let table = album_table(&["A (album)"]);
        let page = format!("{table}\n{table}\n{table}");
        let error = merge_albums(&page, &[AlbumCandidate::new("B (album)", false)])
            .expect_err("must fail");
        assert!(matches!(error, PageError::TableShape { found: 3, .. }));
    }

    #[test]
    fn untouched_rows_keep_their_formatting() {
        let page = "{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{Pwt head}}\n|- style=\"background:#eee\"\n|  {{Pwt_row|b|kanji=ビ}}\n|}";
        let merged = merge_songs(page, &owned(&["a"])).expect("merge");
        assert_eq!(
            merged,
            "{| class=\"sortable producer-table\"\n|- class=\"vcolor-default\"\n! {{Pwt head}}\n|-\n| {{pwt row|a}}\n|- style=\"background:#eee\"\n|  {{Pwt_row|b|kanji=ビ}}\n|}"
        );
    }
}
