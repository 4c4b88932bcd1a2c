//! Reader → scanner → validator → context → store, per source.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{clean, describe, has_printable_run};
use crate::error::{RecoveryError, Result};
use crate::normalize::{
    accept_identifier, accept_model, bulletin_reference, content_key, leading_verb, title_of,
    validate_text,
};
use crate::patterns::Encoding;
use crate::reader::{SourceDescriptor, Window, WindowReader};
use crate::scanner::{PatternSet, View};
use crate::store::MergeStore;
use crate::types::{CandidateMatch, EntityClass, EntityKey, EntityRecord, TextRecord};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Shortest printable run a window needs to be worth scanning (`UGN`).
const MIN_PRINTABLE_RUN: usize = 3;

/// Stop pulling windows once enough has been collected. Unset limits never fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopPolicy {
    pub max_entities: Option<usize>,
    pub max_text: Option<usize>,
}

impl StopPolicy {
    pub fn reached(&self, store: &MergeStore) -> bool {
        self.max_entities.is_some_and(|m| store.entity_count() >= m)
            || self.max_text.is_some_and(|m| store.text_count() >= m)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub stop: StopPolicy,
    /// Ticked once per finished source.
    pub progress: Option<ProgressBar>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub candidates: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl ClassCounts {
    fn absorb(&mut self, other: &ClassCounts) {
        self.candidates += other.candidates;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub classes: BTreeMap<EntityClass, ClassCounts>,
    pub windows: u64,
    pub blank_windows: u64,
    pub noise_windows: u64,
    pub bytes_scanned: u64,
    pub sources_attempted: Vec<String>,
    pub sources_failed: Vec<SourceFailure>,
    pub stopped_early: bool,
}

impl RunStats {
    pub fn class(&self, class: EntityClass) -> ClassCounts {
        self.classes.get(&class).copied().unwrap_or_default()
    }

    fn counts(&mut self, class: EntityClass) -> &mut ClassCounts {
        self.classes.entry(class).or_default()
    }

    fn absorb(&mut self, other: RunStats) {
        for (class, counts) in &other.classes {
            self.counts(*class).absorb(counts);
        }
        self.windows += other.windows;
        self.blank_windows += other.blank_windows;
        self.noise_windows += other.noise_windows;
        self.bytes_scanned += other.bytes_scanned;
        self.sources_attempted.extend(other.sources_attempted);
        self.sources_failed.extend(other.sources_failed);
        self.stopped_early |= other.stopped_early;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub pattern_version: String,
    pub entities: BTreeMap<EntityKey, EntityRecord>,
    pub free_text: Vec<TextRecord>,
    pub models: BTreeSet<String>,
    pub stats: RunStats,
}

impl ExtractionResult {
    pub fn procedures(&self) -> impl Iterator<Item = &TextRecord> {
        self.free_text.iter().filter(|t| t.class == EntityClass::Procedure)
    }

    pub fn bulletins(&self) -> impl Iterator<Item = &TextRecord> {
        self.free_text.iter().filter(|t| t.class == EntityClass::Bulletin)
    }
}

/// One run's shared state. Sources may be fed from several threads at once.
pub struct Extractor<'p> {
    patterns: &'p PatternSet,
    options: RunOptions,
    store: MergeStore,
    stats: Mutex<RunStats>,
    stopped: AtomicBool,
}

impl<'p> Extractor<'p> {
    pub fn new(patterns: &'p PatternSet, options: RunOptions) -> Self {
        Extractor {
            patterns,
            options,
            store: MergeStore::new(),
            stats: Mutex::new(RunStats::default()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    /// Scans one file source. Returns the number of windows scanned.
    ///
    /// `Err` means nothing could be read from it. A read failure after some
    /// windows is logged and recorded, but the windows already merged stand.
    pub fn scan_source(&self, source: &SourceDescriptor) -> Result<u64> {
        let label = source.label();
        let windows = match source.windows(self.patterns.required_overlap()) {
            Ok(w) => w,
            Err(e) => {
                self.fail(&label, &e);
                return Err(e);
            }
        };
        info!(source = %label, layout = ?source.layout, "scanning source");
        self.scan_windows(&label, windows)
            .map_err(|reason| source.unavailable(reason))
    }

    /// Consumes a live byte stream in windows of `window_size` bytes.
    pub fn scan_reader<R: Read>(&self, label: &str, reader: R, window_size: usize) -> Result<u64> {
        if window_size == 0 {
            return Err(RecoveryError::InvalidConfig(format!(
                "{label}: window size must be non-zero"
            )));
        }
        let windows = WindowReader::new(reader, window_size, self.patterns.required_overlap());
        self.scan_windows(label, windows)
            .map_err(|reason| RecoveryError::SourceUnavailable {
                source_label: label.to_string(),
                reason,
            })
    }

    fn fail(&self, label: &str, err: &RecoveryError) {
        warn!(source = %label, error = %err, "skipping source");
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.sources_attempted.push(label.to_string());
        stats.sources_failed.push(SourceFailure {
            source: label.to_string(),
            reason: err.to_string(),
        });
    }

    fn scan_windows<I>(&self, label: &str, windows: I) -> io::Result<u64>
    where
        I: Iterator<Item = io::Result<Window>>,
    {
        let mut local = RunStats {
            sources_attempted: vec![label.to_string()],
            ..Default::default()
        };
        let mut outcome = Ok(());
        let mut windows = windows.peekable();

        while let Some(window) = windows.next() {
            if self.stopped.load(Ordering::Relaxed) {
                local.stopped_early = true;
                break;
            }
            let window = match window {
                Ok(w) => w,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            local.windows += 1;
            local.bytes_scanned += window.payload().len() as u64;

            let blank = window.is_blank();
            if blank {
                local.blank_windows += 1;
                // a match deferred from the previous window ends at the prefix edge
                if window.prefix_len == 0 {
                    continue;
                }
            }
            let is_final = windows.peek().is_none();
            let found = self.scan_window(&window, is_final, blank, &mut local);
            debug!(source = %label, offset = window.offset, candidates = found, "window scanned");

            if self.options.stop.reached(&self.store) {
                self.stopped.store(true, Ordering::Relaxed);
                local.stopped_early = true;
                info!(source = %label, "stop policy reached");
                break;
            }
        }

        let scanned = local.windows;
        let failed = match outcome {
            Ok(()) => None,
            Err(e) => {
                warn!(source = %label, error = %e, windows = scanned, "read failed, source stopped");
                local.sources_failed.push(SourceFailure {
                    source: label.to_string(),
                    reason: e.to_string(),
                });
                Some(e)
            }
        };
        info!(
            source = %label,
            windows = scanned,
            blank = local.blank_windows,
            noise = local.noise_windows,
            "source done"
        );
        self.stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .absorb(local);

        match failed {
            Some(e) if scanned == 0 => Err(e),
            _ => Ok(scanned),
        }
    }

    /// Returns the number of candidates seen.
    fn scan_window(&self, window: &Window, is_final: bool, blank: bool, stats: &mut RunStats) -> usize {
        let mut found = 0;
        let mut all_noise = true;
        let views = self.patterns.encodings().iter().flat_map(|encoding| match encoding {
            Encoding::Latin1 => vec![View::latin1(window)],
            Encoding::Utf16le => vec![View::utf16le(window, 0), View::utf16le(window, 1)],
        });
        for mut view in views {
            view.is_final = is_final;
            if !has_printable_run(&view.bytes, MIN_PRINTABLE_RUN) {
                continue;
            }
            all_noise = false;
            for candidate in self.patterns.scan(&view) {
                found += 1;
                self.handle(&view, &candidate, stats);
            }
        }
        if all_noise && !blank {
            stats.noise_windows += 1;
        }
        found
    }

    fn handle(&self, view: &View<'_>, candidate: &CandidateMatch, stats: &mut RunStats) {
        let set = self.patterns;
        let bytes = &view.bytes[candidate.start..candidate.end];
        let accepted = match candidate.class {
            EntityClass::Identifier => {
                let raw = String::from_utf8_lossy(bytes);
                match accept_identifier(&raw, set) {
                    Ok(key) => {
                        let rules = &set.context;
                        let before = &view.bytes[candidate.start.saturating_sub(rules.before_bytes)..candidate.start];
                        let after_end = (candidate.end + rules.after_bytes).min(view.bytes.len());
                        let after = &view.bytes[candidate.end..after_end];
                        let description = describe(before, after, set);
                        self.store.upsert(key, &description, EntityClass::Identifier);
                        true
                    }
                    Err(_) => false,
                }
            }
            EntityClass::Model => match accept_model(&String::from_utf8_lossy(bytes), set) {
                Ok(model) => {
                    self.store.add_model(model);
                    true
                }
                Err(_) => false,
            },
            class @ (EntityClass::Procedure | EntityClass::Bulletin) => {
                let text = clean(bytes);
                match validate_text(&text, class, set) {
                    Ok(()) => {
                        self.store.upsert_text(self.text_record(text, class));
                        true
                    }
                    Err(_) => false,
                }
            }
        };

        let counts = stats.counts(candidate.class);
        counts.candidates += 1;
        if accepted {
            counts.accepted += 1;
        } else {
            counts.rejected += 1;
        }
    }

    fn text_record(&self, text: String, class: EntityClass) -> TextRecord {
        let set = self.patterns;
        let reference = match class {
            EntityClass::Procedure => leading_verb(&text, &set.verbs)
                .unwrap_or_default()
                .to_string(),
            _ => bulletin_reference(&text),
        };
        let part_refs = set
            .scan_class_bytes(EntityClass::Identifier, text.as_bytes())
            .iter()
            .filter_map(|c| accept_identifier(&text[c.start..c.end], set).ok())
            .collect();
        let model_refs = set
            .scan_class_bytes(EntityClass::Model, text.as_bytes())
            .iter()
            .filter_map(|c| accept_model(&text[c.start..c.end], set).ok())
            .collect();
        TextRecord {
            key: content_key(&text),
            class,
            title: title_of(&text, set.text.title_chars),
            reference,
            part_refs,
            model_refs,
            observation_count: 1,
            content: text,
        }
    }

    pub fn finish(self) -> ExtractionResult {
        let finalized = self.store.finalize();
        let stats = self.stats.into_inner().unwrap_or_else(|p| p.into_inner());
        ExtractionResult {
            pattern_version: self.patterns.version().to_string(),
            entities: finalized.entities,
            free_text: finalized.free_text,
            models: finalized.models,
            stats,
        }
    }
}

#[cfg(feature = "rayon")]
fn scan_all(extractor: &Extractor<'_>, sources: &[SourceDescriptor]) -> usize {
    sources
        .par_iter()
        .map(|s| scan_one(extractor, s))
        .filter(|ok| *ok)
        .count()
}

#[cfg(not(feature = "rayon"))]
fn scan_all(extractor: &Extractor<'_>, sources: &[SourceDescriptor]) -> usize {
    sources
        .iter()
        .map(|s| scan_one(extractor, s))
        .filter(|ok| *ok)
        .count()
}

fn scan_one(extractor: &Extractor<'_>, source: &SourceDescriptor) -> bool {
    let ok = extractor.scan_source(source).is_ok();
    if let Some(pb) = &extractor.options.progress {
        pb.inc(1);
    }
    ok
}

/// Runs every source into one store. Fails only when no source was readable.
pub fn run(
    sources: &[SourceDescriptor],
    patterns: &PatternSet,
    options: &RunOptions,
) -> Result<ExtractionResult> {
    let attempted: Vec<String> = sources.iter().map(SourceDescriptor::label).collect();
    if sources.is_empty() {
        return Err(RecoveryError::NoReadableSource { attempted });
    }
    info!(sources = sources.len(), patterns = patterns.version(), "starting run");

    let extractor = Extractor::new(patterns, options.clone());
    let readable = scan_all(&extractor, sources);
    if readable == 0 {
        return Err(RecoveryError::NoReadableSource { attempted });
    }

    let result = extractor.finish();
    info!(
        entities = result.entities.len(),
        free_text = result.free_text.len(),
        models = result.models.len(),
        stopped_early = result.stats.stopped_early,
        "run finished"
    );
    Ok(result)
}
