use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::error::ExportError;
use crate::pipeline::{ExtractionResult, RunStats};
use crate::types::{EntityRecord, TextRecord};

/// Review document handed to people checking a run by hand.
#[derive(Debug, Serialize)]
pub struct Document<'a> {
    pub generated_at: String,
    pub pattern_version: &'a str,
    pub stats: &'a RunStats,
    pub parts: Vec<&'a EntityRecord>,
    pub procedures: Vec<&'a TextRecord>,
    pub bulletins: Vec<&'a TextRecord>,
    pub models: &'a BTreeSet<String>,
}

impl<'a> Document<'a> {
    pub fn new(result: &'a ExtractionResult) -> Self {
        Document {
            generated_at: Utc::now().to_rfc3339(),
            pattern_version: &result.pattern_version,
            stats: &result.stats,
            parts: result.entities.values().collect(),
            procedures: result.procedures().collect(),
            bulletins: result.bulletins().collect(),
            models: &result.models,
        }
    }
}

pub fn to_string(result: &ExtractionResult) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&Document::new(result))?)
}

pub fn write(result: &ExtractionResult, path: &Path) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &Document::new(result))?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::sample;
    use serde_json::Value;

    #[test]
    fn document_shape() {
        let doc: Value = serde_json::from_str(&to_string(&sample()).unwrap()).unwrap();
        assert_eq!(doc["pattern_version"], "wis-patterns/1");
        assert!(chrono::DateTime::parse_from_rfc3339(doc["generated_at"].as_str().unwrap()).is_ok());
        assert_eq!(doc["parts"].as_array().unwrap().len(), 3);
        assert_eq!(doc["parts"][0]["key"], "A001 890 38 67");
        assert_eq!(doc["parts"][0]["class"], "identifier");
        assert_eq!(doc["procedures"][0]["reference"], "Remove");
        assert_eq!(doc["bulletins"][0]["reference"], "SB-2041");
        assert_eq!(doc["models"], serde_json::json!(["U1300", "UGN"]));
        assert!(doc["stats"]["stopped_early"].is_boolean());
    }

    #[test]
    fn writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wis.json");
        write(&sample(), &path).unwrap();
        let doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["models"].as_array().unwrap().len(), 2);
    }
}
