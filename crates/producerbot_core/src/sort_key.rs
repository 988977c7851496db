use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Accented capitals that may open a romanized parenthetical (pinyin tone marks).
const ROMANIZED_LEADING_ACCENTS: &[char] = &[
    'Ā', 'Á', 'Ǎ', 'À', 'Ē', 'É', 'Ě', 'È', 'Ō', 'Ó', 'Ǒ', 'Ò',
];

const SORT_IGNORED_CHARS: &[char] = &[
    '[', '(', ')', ']', '"', '\'', '¿', '?', '『', '』', '「', '」', ':', '’',
];

const ALBUM_SUFFIX: &str = " (album)";

/// Parameters of a single `{{pwt row|...}}` / `{{awt row|...}}` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowParameters {
    /// Page title with `1=` and `{{=}}` escapes removed.
    title: String,
    romanized: String,
    /// Non-empty `rom=` override.
    manual_rom: Option<String>,
    /// The raw argument string with the title removed.
    remainder: String,
}

impl RowParameters {
    pub fn parse(raw: &str, for_album: bool) -> Self {
        let title_token = raw.split('|').next().unwrap_or("");
        let title = leading_positional_regex()
            .replace(title_token, "")
            .replace("{{=}}", "=");
        let romanized = romanized_title(&title, for_album);
        let remainder = raw.replacen(&title, "", 1);

        let manual_rom = rom_regex()
            .captures(&remainder)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().to_string())
            .filter(|value| !value.is_empty());

        Self {
            title,
            romanized,
            manual_rom,
            remainder,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn manual_rom(&self) -> Option<&str> {
        self.manual_rom.as_deref()
    }

    /// Natural-language form: `kanji=`, or the first positional parameter.
    pub fn kanji(&self) -> Option<String> {
        kanji_regex()
            .captures(&self.remainder)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().to_string())
            .or_else(|| first_positional_parameter(&self.remainder))
    }

    pub fn sort_key(&self) -> String {
        let base = self.manual_rom.as_deref().unwrap_or(&self.romanized);
        let mut key = normalize_for_sort(base);
        key.push_str(&self.remainder);
        key
    }
}

/// Sort key for a raw row argument string.
pub fn sort_key(raw: &str, for_album: bool) -> String {
    RowParameters::parse(raw, for_album).sort_key()
}

/// Pick the romanized portion of a title such as `夢の欠片 (Yume no Kakera)`.
///
/// Falls back to the title itself when there is no trailing parenthetical
/// that looks romanized, or when the part outside the parenthetical is plain
/// ASCII already.
pub fn romanized_title(title: &str, for_album: bool) -> String {
    let mut candidate = title;
    if for_album {
        candidate = candidate.strip_suffix(ALBUM_SUFFIX).unwrap_or(candidate);
    }
    if let Some(position) = candidate.find(")/") {
        candidate = &candidate[..=position];
    }

    let Some(segment) = trailing_parenthetical(candidate) else {
        return title.to_string();
    };
    let segment = peel_nested_prefixes(segment);

    let original = title.replacen(&format!(" ({segment})"), "", 1);
    if original.chars().all(is_printable_ascii) {
        return title.to_string();
    }
    segment.to_string()
}

/// Leftmost `<ws>(SEGMENT)` that closes at the very end of `value`.
fn trailing_parenthetical(value: &str) -> Option<&str> {
    let body = value.strip_suffix(')')?;
    for (index, ch) in body.char_indices() {
        if !is_romanized_lead(ch) {
            continue;
        }
        let opens_parenthetical = body[..index]
            .strip_suffix('(')
            .and_then(|head| head.chars().next_back())
            .is_some_and(char::is_whitespace);
        if opens_parenthetical && !body[index..].contains(is_line_terminator) {
            return Some(&body[index..]);
        }
    }
    None
}

/// `A) (B) (C` -> `C`: drop everything through the first `(` while a `)`
/// precedes it.
fn peel_nested_prefixes(mut segment: &str) -> &str {
    while let Some(open) = segment.find('(') {
        if !segment[..open].contains(')') {
            break;
        }
        segment = &segment[open + 1..];
    }
    segment
}

fn normalize_for_sort(value: &str) -> String {
    let detoned: String = value
        .nfd()
        .filter(|ch| !('\u{0300}'..='\u{036f}').contains(ch))
        .collect();
    detoned
        .to_lowercase()
        .chars()
        .filter(|ch| !SORT_IGNORED_CHARS.contains(ch))
        .collect()
}

fn first_positional_parameter(remainder: &str) -> Option<String> {
    remainder
        .split('|')
        .skip(1)
        .find(|parameter| !named_parameter_regex().is_match(parameter))
        .map(ToString::to_string)
}

fn is_romanized_lead(ch: char) -> bool {
    is_printable_ascii(ch) || ROMANIZED_LEADING_ACCENTS.contains(&ch)
}

fn is_printable_ascii(ch: char) -> bool {
    (' '..='~').contains(&ch)
}

fn is_line_terminator(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn leading_positional_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\s*1\s*=\s*").expect("valid regex"))
}

fn kanji_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\|kanji\s*=\s*([^|]*)").expect("valid regex"))
}

fn rom_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\|rom\s*=\s*([^|]*)").expect("valid regex"))
}

fn named_parameter_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\s*\w+\s*=").expect("valid regex"))
}
