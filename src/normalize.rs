//! Canonicalization and rejection rules per entity class.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::scanner::PatternSet;
use crate::types::{EntityClass, EntityKey};

static BULLETIN_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SB[-\s]?([0-9]{1,6})|Bulletin\s+(?:No\.?\s*)?([0-9]{1,6}))\b").unwrap()
});

const ASCENDING: &str = "0123456789";
const DESCENDING: &str = "9876543210";

/// Why a candidate was dropped. Only counted, never logged per occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Shape,
    Prefix,
    RepeatedDigits,
    SequentialDigits,
    Sentinel,
    Length,
    WordCount,
    Symbols,
    WordLength,
    Noise,
    MissingVerb,
    UnknownModel,
}

/// `a123.456-78/90` → `A123 456 78 90`. `None` unless the stripped form is
/// one letter followed by ten digits.
pub fn normalize_identifier(raw: &str) -> Option<EntityKey> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '.' | '-' | '/'))
        .flat_map(char::to_uppercase)
        .collect();
    let (letter, digits) = compact.split_at_checked(1)?;
    if !letter.chars().all(|c| c.is_ascii_uppercase())
        || digits.len() != 10
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(EntityKey::new(&format!(
        "{}{} {} {} {}",
        letter,
        &digits[0..3],
        &digits[3..6],
        &digits[6..8],
        &digits[8..10]
    )))
}

pub fn validate_identifier(key: &EntityKey, set: &PatternSet) -> Result<(), Rejection> {
    let compact: String = key.as_str().chars().filter(|c| *c != ' ').collect();
    let mut chars = compact.chars();
    let letter = chars.next().ok_or(Rejection::Shape)?;
    let digits = chars.as_str();
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::Shape);
    }
    if !set.prefixes.contains(&letter) {
        return Err(Rejection::Prefix);
    }
    let first = digits.as_bytes()[0];
    if digits.bytes().all(|b| b == first) {
        return Err(Rejection::RepeatedDigits);
    }
    if digits == ASCENDING || digits == DESCENDING {
        return Err(Rejection::SequentialDigits);
    }
    if set.sentinels.contains(key) {
        return Err(Rejection::Sentinel);
    }
    Ok(())
}

pub fn accept_identifier(raw: &str, set: &PatternSet) -> Result<EntityKey, Rejection> {
    let key = normalize_identifier(raw).ok_or(Rejection::Shape)?;
    validate_identifier(&key, set)?;
    Ok(key)
}

/// `Unimog 1300` / `U 1300` / `u1300` → `U1300`; `ugn` → `UGN`.
pub fn normalize_model(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    let compact = match compact.strip_prefix("UNIMOG") {
        Some(rest) => format!("U{rest}"),
        None => compact,
    };
    if compact == "UGN" || compact == "UHN" {
        return Some(compact);
    }
    let digits = compact.strip_prefix('U')?;
    if (2..=4).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(compact)
    } else {
        None
    }
}

pub fn validate_model(model: &str, set: &PatternSet) -> Result<(), Rejection> {
    if set.models.is_empty() || set.models.contains(model) {
        Ok(())
    } else {
        Err(Rejection::UnknownModel)
    }
}

pub fn accept_model(raw: &str, set: &PatternSet) -> Result<String, Rejection> {
    let model = normalize_model(raw).ok_or(Rejection::Shape)?;
    validate_model(&model, set)?;
    Ok(model)
}

/// Readability gate for procedure and bulletin text.
pub fn validate_text(text: &str, class: EntityClass, set: &PatternSet) -> Result<(), Rejection> {
    let rules = &set.text;
    let len = text.chars().count();
    if len < rules.min_chars || len >= rules.max_chars {
        return Err(Rejection::Length);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < rules.min_words {
        return Err(Rejection::WordCount);
    }

    let symbols = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if symbols as f64 / len as f64 >= rules.max_symbol_ratio {
        return Err(Rejection::Symbols);
    }

    if !mean_word_len_ok(&words, rules.min_avg_word, rules.max_avg_word) {
        return Err(Rejection::WordLength);
    }

    let lower = text.to_lowercase();
    if set.noise_tokens.iter().any(|t| lower.contains(t.as_str())) {
        return Err(Rejection::Noise);
    }

    if class == EntityClass::Procedure && leading_verb(text, &set.verbs).is_none() {
        return Err(Rejection::MissingVerb);
    }
    Ok(())
}

pub(crate) fn mean_word_len_ok(words: &[&str], min: f64, max: f64) -> bool {
    if words.is_empty() {
        return false;
    }
    let total: usize = words.iter().map(|w| w.chars().count()).sum();
    let mean = total as f64 / words.len() as f64;
    mean >= min && mean < max
}

/// The configured verb `text` opens with, matched as a whole word.
pub fn leading_verb<'v>(text: &str, verbs: &'v [String]) -> Option<&'v str> {
    verbs
        .iter()
        .filter(|v| {
            text.strip_prefix(v.as_str())
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
        })
        .max_by_key(|v| v.len())
        .map(String::as_str)
}

/// `SB-1234` style number when the text carries one, else a stable
/// `AUTO-xxxxxxxx` tag derived from the content.
pub fn bulletin_reference(text: &str) -> String {
    if let Some(caps) = BULLETIN_NUMBER_RE.captures(text) {
        if let Some(n) = caps.get(1).or_else(|| caps.get(2)) {
            return format!("SB-{}", n.as_str());
        }
    }
    let digest = content_digest(text);
    format!("AUTO-{}", &digest[..8].to_uppercase())
}

/// Hex SHA-256 of the cleaned text.
pub fn content_digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn content_key(text: &str) -> EntityKey {
    EntityKey::new(&content_digest(text))
}

pub fn title_of(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
