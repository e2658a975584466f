use unicode_normalization::UnicodeNormalization;

pub const UNNAMED_SEGMENT: &str = "unnamed";

const ILLEGAL_SEGMENT_CHARS: [char; 12] =
    ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\'', '#', '%'];

// Combining diacritical mark blocks. Spacing and non-spacing marks outside
// these (Indic vowel signs, viramas, Thai vowels) are letters of their
// script and must survive.
const DIACRITIC_RANGES: [(char, char); 5] = [
    ('\u{0300}', '\u{036F}'),
    ('\u{1AB0}', '\u{1AFF}'),
    ('\u{1DC0}', '\u{1DFF}'),
    ('\u{20D0}', '\u{20FF}'),
    ('\u{FE20}', '\u{FE2F}'),
];

fn is_diacritic(ch: char) -> bool {
    DIACRITIC_RANGES
        .iter()
        .any(|(start, end)| (*start..=*end).contains(&ch))
}

/// Turn a place name into a single folder name that is safe on disk and in
/// repository content URLs.
///
/// The name is NFKD-decomposed and combining diacritics are dropped, so
/// `São` becomes `Sao` while `दिल्ली` keeps its vowel signs. Path-hostile
/// characters, control characters and whitespace runs all become one `_`,
/// and adjacent underscores collapse. A name that
/// sanitizes to nothing (or to a relative-path alias) becomes `unnamed`.
pub fn sanitize_segment(name: &str) -> String {
    let decomposed = name
        .nfkd()
        .filter(|ch| !is_diacritic(*ch))
        .collect::<String>();

    let mut output = String::with_capacity(decomposed.len());
    for ch in decomposed.trim().chars() {
        let mapped = if ch.is_whitespace() || ch.is_control() || ILLEGAL_SEGMENT_CHARS.contains(&ch)
        {
            '_'
        } else {
            ch
        };
        if mapped == '_' && output.ends_with('_') {
            continue;
        }
        output.push(mapped);
    }

    if output.is_empty() || output == "." || output == ".." {
        return UNNAMED_SEGMENT.to_string();
    }
    output
}

/// Make a taken segment unique by appending the place id.
pub fn disambiguate_segment(segment: &str, id: &str) -> String {
    format!("{segment}_{}", sanitize_segment(id))
}

/// Append one already-sanitized segment to a slash-joined base path.
pub fn join_segment(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}
