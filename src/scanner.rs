//! Compiled signature set and window scanning.

use std::borrow::Cow;
use std::collections::HashSet;

use regex::bytes::{Regex, RegexBuilder};

use crate::error::{RecoveryError, Result};
use crate::patterns::{ContextRules, Encoding, PatternConfig, TextRules, VERBS_PLACEHOLDER};
use crate::reader::Window;
use crate::types::{CandidateMatch, EntityClass, EntityKey};

/// A decoded view over one window, in one encoding.
pub struct View<'a> {
    pub encoding: Encoding,
    pub bytes: Cow<'a, [u8]>,
    /// End of the previous window's data, in view units.
    pub min_end: usize,
    /// False while more windows follow. A match touching the end of a
    /// non-final view may still grow, and its after-context may be cut, so
    /// it is left to the next window.
    pub is_final: bool,
    base: u64,
    stride: u64,
}

impl<'a> View<'a> {
    pub fn latin1(window: &'a Window) -> Self {
        View {
            encoding: Encoding::Latin1,
            bytes: Cow::Borrowed(&window.data),
            min_end: window.prefix_len,
            is_final: true,
            base: window.offset,
            stride: 1,
        }
    }

    /// Narrows UTF-16LE code units with a zero high byte to single bytes.
    /// Other units become NUL. Units start at absolute offsets of the given
    /// parity, so strings at either alignment need one view each.
    pub fn utf16le(window: &Window, parity: u64) -> View<'static> {
        let skip = ((parity % 2 + 2 - window.offset % 2) % 2) as usize;
        let narrowed: Vec<u8> = window.data[skip.min(window.data.len())..]
            .chunks_exact(2)
            .map(|unit| match unit {
                [lo, 0] if (0x20..0x7f).contains(lo) || *lo == b'\t' => *lo,
                _ => 0,
            })
            .collect();
        // last whole unit the previous window could narrow
        let min_end = window.prefix_len.saturating_sub(skip) / 2;
        View {
            encoding: Encoding::Utf16le,
            bytes: Cow::Owned(narrowed),
            min_end,
            is_final: true,
            base: window.offset + skip as u64,
            stride: 2,
        }
    }

    pub fn absolute(&self, index: usize) -> u64 {
        self.base + index as u64 * self.stride
    }
}

#[derive(Debug)]
struct ClassPatterns {
    class: EntityClass,
    regexes: Vec<Regex>,
}

/// Everything compiled from a [`PatternConfig`]: the per-class regex lists
/// plus the vocabularies and limits the validator and context extractor read.
#[derive(Debug)]
pub struct PatternSet {
    version: String,
    classes: Vec<ClassPatterns>,
    pub(crate) prefixes: Vec<char>,
    pub(crate) sentinels: HashSet<EntityKey>,
    pub(crate) keywords: Vec<String>,
    pub(crate) verbs: Vec<String>,
    pub(crate) models: HashSet<String>,
    pub(crate) noise_tokens: Vec<String>,
    pub(crate) text: TextRules,
    pub(crate) context: ContextRules,
    encodings: Vec<Encoding>,
    max_match_len: usize,
}

impl PatternSet {
    pub fn compile(config: &PatternConfig) -> Result<PatternSet> {
        check_limits(config)?;

        let verbs_alt = verb_alternation(&config.action_verbs);
        let lists = [
            (EntityClass::Identifier, &config.identifier_patterns),
            (EntityClass::Procedure, &config.procedure_patterns),
            (EntityClass::Bulletin, &config.bulletin_patterns),
            (EntityClass::Model, &config.model_patterns),
        ];

        let mut classes = Vec::with_capacity(lists.len());
        for (class, patterns) in lists {
            let mut regexes = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let expanded = if pattern.contains(VERBS_PLACEHOLDER) {
                    if verbs_alt.is_empty() {
                        return Err(RecoveryError::InvalidConfig(format!(
                            "{class} pattern uses {VERBS_PLACEHOLDER} but no action verbs are configured"
                        )));
                    }
                    pattern.replace(VERBS_PLACEHOLDER, &verbs_alt)
                } else {
                    pattern.clone()
                };
                let re = RegexBuilder::new(&expanded)
                    .build()
                    .map_err(|reason| RecoveryError::InvalidPattern {
                        class,
                        pattern: pattern.clone(),
                        reason,
                    })?;
                regexes.push(re);
            }
            classes.push(ClassPatterns { class, regexes });
        }

        Ok(PatternSet {
            version: config.version.clone(),
            classes,
            prefixes: config.identifier_prefixes.chars().collect(),
            sentinels: config.sentinels.iter().map(|s| EntityKey::new(s)).collect(),
            keywords: config.component_keywords.iter().map(|k| k.to_lowercase()).collect(),
            verbs: config.action_verbs.clone(),
            models: config.models.iter().map(|m| m.to_uppercase()).collect(),
            noise_tokens: config.noise_tokens.iter().map(|t| t.to_lowercase()).collect(),
            text: config.text.clone(),
            context: config.context.clone(),
            encodings: config.encodings.clone(),
            max_match_len: config.max_match_len,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn max_match_len(&self) -> usize {
        self.max_match_len
    }

    /// Overlap the reader must carry so no match, nor the context on either
    /// side of it, is cut by a window boundary. One extra byte keeps a
    /// look-behind boundary in view. UTF-16 views see half as many units.
    pub fn required_overlap(&self) -> usize {
        let units = self.max_match_len + 1 + self.context.before_bytes + self.context.after_bytes;
        if self.encodings.contains(&Encoding::Utf16le) {
            units * 2
        } else {
            units
        }
    }

    pub fn pattern_count(&self, class: EntityClass) -> usize {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map_or(0, |c| c.regexes.len())
    }

    /// All matches in `view`, class by class, patterns in configured order.
    /// Within a class a span claimed by an earlier pattern is not reported
    /// again by a later one.
    pub fn scan(&self, view: &View<'_>) -> Vec<CandidateMatch> {
        let mut out = Vec::new();
        for patterns in &self.classes {
            self.scan_class(patterns, view, &mut out);
        }
        out.sort_by_key(|c| (c.start, c.class, c.pattern));
        out
    }

    /// Scan only one class, used to find references inside recovered text.
    pub fn scan_class_bytes(&self, class: EntityClass, bytes: &[u8]) -> Vec<CandidateMatch> {
        let view = View {
            encoding: Encoding::Latin1,
            bytes: Cow::Borrowed(bytes),
            min_end: 0,
            is_final: true,
            base: 0,
            stride: 1,
        };
        let mut out = Vec::new();
        if let Some(patterns) = self.classes.iter().find(|c| c.class == class) {
            self.scan_class(patterns, &view, &mut out);
        }
        out.sort_by_key(|c| c.start);
        out
    }

    /// A view owns a match when its after-context ends at or past the
    /// previous window's data end (`min_end`) and, unless the view is final,
    /// fits inside this one. Otherwise the next window sees it whole.
    fn scan_class(&self, patterns: &ClassPatterns, view: &View<'_>, out: &mut Vec<CandidateMatch>) {
        let tail = self.context.after_bytes;
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for (idx, re) in patterns.regexes.iter().enumerate() {
            for m in re.find_iter(&view.bytes) {
                if m.is_empty() || m.len() > self.max_match_len {
                    continue;
                }
                if claimed.iter().any(|&(s, e)| m.start() < e && s < m.end()) {
                    continue;
                }
                claimed.push((m.start(), m.end()));
                if m.end() + tail < view.min_end || (!view.is_final && m.end() + tail >= view.bytes.len()) {
                    continue;
                }
                out.push(CandidateMatch {
                    class: patterns.class,
                    pattern: idx,
                    start: m.start(),
                    end: m.end(),
                    offset: view.absolute(m.start()),
                });
            }
        }
    }
}

/// Longest verbs first. A verb with letters above ASCII also gets its
/// single-byte Latin-1 spelling, which is how most dump pages store it.
fn verb_alternation(verbs: &[String]) -> String {
    let mut sorted: Vec<&str> = verbs.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    sorted.dedup();
    sorted
        .iter()
        .flat_map(|v| std::iter::once(regex::escape(v)).chain(latin1_spelling(v)))
        .collect::<Vec<_>>()
        .join("|")
}

/// `None` for pure ASCII verbs and for verbs Latin-1 cannot spell.
fn latin1_spelling(verb: &str) -> Option<String> {
    if verb.is_ascii() {
        return None;
    }
    verb.chars()
        .map(|c| match u8::try_from(u32::from(c)) {
            Ok(b) if b.is_ascii() => Some(regex::escape(c.encode_utf8(&mut [0; 4]))),
            Ok(b) => Some(format!("(?-u:\\x{b:02X})")),
            Err(_) => None,
        })
        .collect()
}

fn check_limits(config: &PatternConfig) -> Result<()> {
    let invalid = |msg: &str| Err(RecoveryError::InvalidConfig(msg.to_string()));
    if config.max_match_len == 0 {
        return invalid("max_match_len must be at least 1");
    }
    if config.identifier_prefixes.is_empty()
        || !config.identifier_prefixes.chars().all(|c| c.is_ascii_uppercase())
    {
        return invalid("identifier_prefixes must be non-empty uppercase ASCII letters");
    }
    if config.text.min_chars >= config.text.max_chars {
        return invalid("text.min_chars must be below text.max_chars");
    }
    if config.text.min_avg_word >= config.text.max_avg_word {
        return invalid("text.min_avg_word must be below text.max_avg_word");
    }
    if !(0.0..=1.0).contains(&config.text.max_symbol_ratio)
        || !(0.0..=1.0).contains(&config.context.min_printable_ratio)
    {
        return invalid("ratios must lie within 0..=1");
    }
    if config.context.min_chars > config.context.max_chars {
        return invalid("context.min_chars must not exceed context.max_chars");
    }
    if config.encodings.is_empty() {
        return invalid("at least one encoding is required");
    }
    Ok(())
}
