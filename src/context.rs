//! Byte decoding around candidates and description scoring.

use crate::normalize::mean_word_len_ok;
use crate::scanner::PatternSet;

/// Accented letters kept when decoding: German umlauts and eszett plus the
/// common French accents. Values are Latin-1 code points.
const ACCENTED: &[u8] = &[
    0xC4, 0xD6, 0xDC, 0xE4, 0xF6, 0xFC, 0xDF, // Ä Ö Ü ä ö ü ß
    0xC0, 0xC2, 0xC7, 0xC8, 0xC9, 0xCA, // À Â Ç È É Ê
    0xE0, 0xE2, 0xE7, 0xE8, 0xE9, 0xEA, 0xEB, 0xEE, 0xEF, 0xF4, 0xF9, 0xFB, // à â ç è é ê ë î ï ô ù û
];

fn accented(code: u8) -> bool {
    ACCENTED.contains(&code)
}

/// Printable ASCII and allowed accented letters (single Latin-1 byte or its
/// two-byte UTF-8 form) survive. Every other byte becomes a space.
pub fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x20..=0x7e => out.push(b as char),
            0xC3 if i + 1 < bytes.len() && (0x80..0xC0).contains(&bytes[i + 1]) => {
                let code = 0x40 + bytes[i + 1];
                if accented(code) {
                    out.push(char::from(code));
                } else {
                    out.push(' ');
                }
                i += 1;
            }
            _ if accented(b) => out.push(char::from(b)),
            _ => out.push(' '),
        }
        i += 1;
    }
    out
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `decode` followed by `collapse_whitespace`.
pub fn clean(bytes: &[u8]) -> String {
    collapse_whitespace(&decode(bytes))
}

/// Share of bytes that decode to a visible character.
pub fn printable_ratio(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let visible = decode(bytes).chars().filter(|c| !c.is_whitespace()).count();
    visible as f64 / bytes.len() as f64
}

/// `bytes` without leading and trailing padding (NUL, control bytes, spaces).
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let padding = |b: &u8| *b <= 0x20 || *b == 0x7f;
    let start = bytes.iter().position(|b| !padding(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !padding(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// True when `bytes` holds at least one run of `min_run` printable bytes.
pub fn has_printable_run(bytes: &[u8], min_run: usize) -> bool {
    let mut run = 0;
    for &b in bytes {
        if (0x20..=0x7e).contains(&b) || accented(b) {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn strip_disallowed(text: &str) -> String {
    text.chars()
        .filter(|c| {
            c.is_alphanumeric() || *c == '_' || c.is_whitespace() || matches!(c, '-' | '.' | ',' | '(' | ')' | '/')
        })
        .collect()
}

/// Description for a candidate from the bytes on either side of it.
///
/// Around the earliest component keyword a window of up to
/// `context.max_chars` characters is cut, starting `lead_chars` ahead of
/// the keyword. Words cut at either edge are dropped. Without a keyword the
/// first `fallback_chars` characters are used. Anything shorter than
/// `min_chars`, or that reads as noise, yields an empty description.
///
/// The printable ratio is taken between the first and last visible byte, so
/// zero-filled page space around a record does not count against it.
pub fn describe(before: &[u8], after: &[u8], set: &PatternSet) -> String {
    let rules = &set.context;
    let mut raw = Vec::with_capacity(before.len() + after.len() + 1);
    raw.extend_from_slice(before);
    raw.push(b' ');
    raw.extend_from_slice(after);
    if printable_ratio(trim_padding(&raw)) < rules.min_printable_ratio {
        return String::new();
    }

    let text = clean(&raw);
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars.iter().flat_map(|c| c.to_lowercase()).collect();

    let picked = match earliest_keyword(&lower, &set.keywords) {
        // lowercasing can change the char count; only trust positions when it did not
        Some(pos) if lower.len() == chars.len() => {
            let start = pos.saturating_sub(rules.lead_chars);
            let end = (start + rules.max_chars).min(chars.len());
            let cut = whole_words(&chars, start, end);
            let desc = collapse_whitespace(&strip_disallowed(&cut));
            (desc.chars().count() >= rules.min_chars).then_some(desc)
        }
        _ => None,
    };

    let desc = picked.unwrap_or_else(|| {
        let stripped = collapse_whitespace(&strip_disallowed(&text));
        let head: String = stripped.chars().take(rules.fallback_chars).collect();
        let head = head.trim().to_string();
        if head.chars().count() >= rules.min_chars {
            head
        } else {
            String::new()
        }
    });

    let words: Vec<&str> = desc.split_whitespace().collect();
    if desc.is_empty() || !mean_word_len_ok(&words, set.text.min_avg_word, set.text.max_avg_word) {
        return String::new();
    }
    desc
}

fn earliest_keyword(lower: &[char], keywords: &[String]) -> Option<usize> {
    let needles: Vec<Vec<char>> = keywords.iter().map(|k| k.chars().collect()).collect();
    (0..lower.len()).find(|&i| {
        needles
            .iter()
            .any(|n| !n.is_empty() && lower[i..].starts_with(n))
    })
}

/// `chars[start..end]` without the partial words at its edges.
fn whole_words(chars: &[char], start: usize, end: usize) -> String {
    let mut s = start;
    if s > 0 && !chars[s - 1].is_whitespace() {
        while s < end && !chars[s].is_whitespace() {
            s += 1;
        }
    }
    let mut e = end;
    if e < chars.len() && !chars[e].is_whitespace() {
        while e > s && !chars[e - 1].is_whitespace() {
            e -= 1;
        }
    }
    chars[s..e].iter().collect::<String>().trim().to_string()
}

/// Ordering used by the merge rule: non-empty beats empty, longer beats
/// shorter, and equal-length distinct texts fall back to byte order.
///
/// The byte-order step trades first-write-wins for order independence: of
/// two distinct descriptions with the same length the greater one is kept,
/// whichever arrived first. Only byte-identical descriptions keep the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality<'a> {
    non_empty: bool,
    chars: usize,
    text: &'a str,
}

impl<'a> Quality<'a> {
    pub fn of(text: &'a str) -> Self {
        Quality {
            non_empty: !text.is_empty(),
            chars: text.chars().count(),
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternConfig;

    fn set() -> PatternSet {
        PatternConfig::default().compile().unwrap()
    }

    #[test]
    fn decode_keeps_ascii_and_allowed_accents() {
        assert_eq!(decode(b"Ab\x00c"), "Ab c");
        assert_eq!(decode(b"Geh\xe4use"), "Gehäuse");
        assert_eq!(decode("Gehäuse".as_bytes()), "Gehäuse");
        assert_eq!(decode("écrou".as_bytes()), "écrou");
        // Latin-1 'Ñ' is not on the list
        assert_eq!(decode(b"\xd1x"), " x");
        assert_eq!(decode(b"\xc3"), " ");
    }

    #[test]
    fn keyword_window_drops_partial_words() {
        let set = set();
        let after = b" Hydraulic valve block for the rear power take off unit \x00\x00\x01";
        let desc = describe(b"\x00\x12\x00junk", after, &set);
        assert!(desc.contains("Hydraulic valve block"), "{desc}");
        assert!(desc.chars().count() <= set.context.max_chars);
    }

    #[test]
    fn lead_text_ahead_of_keyword_is_word_aligned() {
        let set = set();
        let text = "catalogue entry number twelve front portal hub seal kit complete";
        let desc = describe(text.as_bytes(), b"", &set);
        assert!(desc.ends_with("portal hub seal kit complete"), "{desc}");
        assert!(!desc.starts_with("atalogue"));
        let first = desc.split(' ').next().unwrap();
        assert!(text.split(' ').any(|w| w == first), "{desc}");
    }

    #[test]
    fn fallback_without_keyword() {
        let set = set();
        let desc = describe(b"", b"Ersatzteil fuer die vordere Kabine links", &set);
        assert_eq!(desc, "Ersatzteil fuer die vordere Kabine links");
    }

    #[test]
    fn short_or_noisy_context_is_empty() {
        let set = set();
        assert_eq!(describe(b"\x00\x01", b"ab\x00", &set), "");
        assert_eq!(describe(&[0u8; 200], &[0xffu8; 200], &set), "");
        assert_eq!(describe(b"", b"x y z q w e r t u i o p a s d f", &set), "");
    }

    #[test]
    fn page_padding_does_not_count_as_noise() {
        let set = set();
        let mut after = b" Hydraulic valve block".to_vec();
        after.extend([0u8; 178]);
        let desc = describe(&[0u8; 100], &after, &set);
        assert_eq!(desc, "Hydraulic valve block");
    }

    #[test]
    fn interleaved_control_bytes_are_noise() {
        let set = set();
        let mut after = b"Seal".to_vec();
        after.extend([0x01u8; 120]);
        after.extend_from_slice(b"ring kit");
        assert_eq!(describe(b"", &after, &set), "");
        assert_eq!(describe(b"", b"Seal ring kit", &set), "Seal ring kit");
    }

    #[test]
    fn disallowed_characters_stripped() {
        let set = set();
        let desc = describe(b"", b"Seal ring <outer> #4, left (OEM)", &set);
        assert_eq!(desc, "Seal ring outer 4, left (OEM)");
    }

    #[test]
    fn printable_runs() {
        assert!(has_printable_run(b"\x00abcd\x00", 4));
        assert!(!has_printable_run(b"abc\x00abc", 4));
    }

    #[test]
    fn quality_order() {
        assert!(Quality::of("a") > Quality::of(""));
        assert!(Quality::of("longer") > Quality::of("short"));
        assert!(Quality::of("bbb") > Quality::of("aaa"));
        assert_eq!(Quality::of("same"), Quality::of("same"));
    }
}
