use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use itertools::Itertools;

use crate::error::ExportError;
use crate::export::{capped, PART_CONFLICT_CLAUSE, SCHEMA};
use crate::pipeline::ExtractionResult;
use crate::types::{EntityKey, TextRecord};

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn refs_json(items: &[impl serde::Serialize]) -> Result<String, ExportError> {
    Ok(quote(&serde_json::to_string(items)?))
}

/// A transactional import script for the whole result.
pub fn render(result: &ExtractionResult) -> Result<String, ExportError> {
    let mut out = String::new();
    writeln!(out, "-- wis_forensics export, patterns {}", result.pattern_version)?;
    writeln!(
        out,
        "-- {} parts, {} free-text records, {} models",
        result.entities.len(),
        result.free_text.len(),
        result.models.len()
    )?;
    out.push_str("BEGIN;\n");
    out.push_str(SCHEMA.trim());
    out.push_str("\n\n");

    for rec in result.entities.values() {
        writeln!(
            out,
            "INSERT INTO wis_parts (part_number, description, observations) VALUES ({}, {}, {}) {};",
            quote(rec.key.as_str()),
            quote(&capped(&rec.description)),
            rec.observation_count,
            PART_CONFLICT_CLAUSE
        )?;
    }

    for rec in result.procedures() {
        writeln!(
            out,
            "INSERT INTO wis_procedures (content_hash, title, content, action_verb, part_refs, model_refs, observations) \
VALUES ({}, {}, {}, {}, {}, {}, {}) ON CONFLICT (content_hash) DO NOTHING;",
            quote(rec.key.as_str()),
            quote(&rec.title),
            quote(&rec.content),
            quote(&rec.reference),
            refs_json(&rec.part_refs)?,
            refs_json(&rec.model_refs)?,
            rec.observation_count
        )?;
    }

    for rec in result.bulletins() {
        writeln!(out, "{}", bulletin_insert(rec)?)?;
    }

    for model in &result.models {
        writeln!(
            out,
            "INSERT INTO wis_models (model_code) VALUES ({}) ON CONFLICT (model_code) DO NOTHING;",
            quote(model)
        )?;
    }
    out.push_str("COMMIT;\n");

    let summary = prefix_summary(result.entities.keys());
    if !summary.is_empty() {
        out.push_str("\n-- parts per prefix\n");
        for (prefix, n) in summary {
            writeln!(out, "-- {prefix}: {n}")?;
        }
    }
    Ok(out)
}

fn bulletin_insert(rec: &TextRecord) -> Result<String, ExportError> {
    Ok(format!(
        "INSERT INTO wis_bulletins (content_hash, bulletin_number, title, content, part_refs, model_refs, observations) \
VALUES ({}, {}, {}, {}, {}, {}, {}) ON CONFLICT (content_hash) DO NOTHING;",
        quote(rec.key.as_str()),
        quote(&rec.reference),
        quote(&rec.title),
        quote(&rec.content),
        refs_json(&rec.part_refs)?,
        refs_json(&rec.model_refs)?,
        rec.observation_count
    ))
}

/// Part counts keyed by the letter and first three digits.
pub fn prefix_summary<'a>(keys: impl Iterator<Item = &'a EntityKey>) -> Vec<(String, usize)> {
    keys.map(|k| k.as_str().chars().take(4).collect::<String>())
        .counts()
        .into_iter()
        .sorted()
        .collect()
}

pub fn write(result: &ExtractionResult, path: &Path) -> Result<(), ExportError> {
    fs::write(path, render(result)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::sample;

    #[test]
    fn script_carries_conditional_upsert() {
        let sql = render(&sample()).unwrap();
        assert!(sql.starts_with("-- wis_forensics export"));
        assert!(sql.contains("BEGIN;\n"));
        assert!(sql.contains("COMMIT;\n"));
        assert!(sql.contains(
            "WHERE (LENGTH(excluded.description), excluded.description) > (LENGTH(wis_parts.description), wis_parts.description)"
        ));
        assert!(sql.contains("'Driver''s side bracket'"));
        assert!(sql.contains("'SB-2041'"));
        assert!(sql.contains("-- A001: 2\n"));
        assert!(sql.contains("-- B373: 1\n"));
    }

    #[test]
    fn script_runs_against_sqlite() {
        let result = sample();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&render(&result).unwrap()).unwrap();
        // importing twice is harmless
        conn.execute_batch(&render(&result).unwrap()).unwrap();
        let parts: i64 = conn
            .query_row("SELECT COUNT(*) FROM wis_parts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(parts, 3);
        let verb: String = conn
            .query_row("SELECT action_verb FROM wis_procedures", [], |r| r.get(0))
            .unwrap();
        assert_eq!(verb, "Remove");
    }

    #[test]
    fn descriptions_are_capped() {
        let mut result = sample();
        let long = "x".repeat(800);
        for rec in result.entities.values_mut() {
            rec.description = long.clone();
        }
        let sql = render(&result).unwrap();
        assert!(sql.contains(&format!("'{}'", "x".repeat(500))));
        assert!(!sql.contains(&"x".repeat(501)));
    }
}
