//! Signature-based recovery of catalog records from opaque binary dumps.
//!
//! A run reads each source in overlapping windows, scans every window for
//! part identifiers, procedure text, service bulletins and model codes,
//! validates and describes each hit, and merges repeated sightings into one
//! best record per key.

pub mod context;
pub mod error;
pub mod export;
pub mod normalize;
pub mod patterns;
pub mod pipeline;
pub mod reader;
pub mod scanner;
pub mod store;
pub mod types;

pub use error::{ExportError, RecoveryError, Result};
pub use patterns::{ContextRules, Encoding, PatternConfig, TextRules};
pub use pipeline::{run, ClassCounts, ExtractionResult, Extractor, RunOptions, RunStats, StopPolicy};
pub use reader::{SourceDescriptor, SourceLayout, Window, WindowReader};
pub use scanner::PatternSet;
pub use store::{Finalized, MergeStore};
pub use types::{CandidateMatch, EntityClass, EntityKey, EntityRecord, TextRecord};
