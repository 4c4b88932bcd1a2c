//! Serializers over one [`ExtractionResult`](crate::pipeline::ExtractionResult).
//!
//! The SQL script and the SQLite database share one schema and one
//! conditional upsert, so re-importing never replaces a description with a
//! worse one.

pub mod json;
pub mod sql;
pub mod sqlite;

/// Longest description written to any table.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wis_parts (
    part_number  TEXT PRIMARY KEY,
    description  TEXT NOT NULL DEFAULT '',
    observations INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS wis_procedures (
    content_hash TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    content      TEXT NOT NULL,
    action_verb  TEXT,
    part_refs    TEXT,
    model_refs   TEXT,
    observations INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS wis_bulletins (
    content_hash    TEXT PRIMARY KEY,
    bulletin_number TEXT NOT NULL,
    title           TEXT NOT NULL,
    content         TEXT NOT NULL,
    part_refs       TEXT,
    model_refs      TEXT,
    observations    INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_wis_bulletins_number ON wis_bulletins(bulletin_number);

CREATE TABLE IF NOT EXISTS wis_models (
    model_code TEXT PRIMARY KEY
);
"#;

/// Same ordering as the in-memory merge: longer wins, then byte order.
pub const PART_CONFLICT_CLAUSE: &str = "ON CONFLICT (part_number) DO UPDATE SET description = excluded.description \
WHERE (LENGTH(excluded.description), excluded.description) > (LENGTH(wis_parts.description), wis_parts.description)";

pub(crate) fn capped(text: &str) -> String {
    text.chars().take(MAX_DESCRIPTION_CHARS).collect()
}

#[cfg(test)]
pub(crate) fn sample() -> crate::pipeline::ExtractionResult {
    use crate::pipeline::ExtractionResult;
    use crate::types::{EntityClass, EntityKey, EntityRecord, TextRecord};

    let mut result = ExtractionResult {
        pattern_version: "wis-patterns/1".to_string(),
        ..Default::default()
    };
    for (key, desc) in [
        ("A001 890 38 67", "Seal ring, rear hub"),
        ("A001 990 01 02", "Driver's side bracket"),
        ("B373 611 19 24", "Hydraulic valve block"),
    ] {
        let key = EntityKey::new(key);
        result.entities.insert(
            key.clone(),
            EntityRecord {
                key,
                description: desc.to_string(),
                class: EntityClass::Identifier,
                observation_count: 2,
            },
        );
    }
    result.free_text.push(TextRecord {
        key: crate::normalize::content_key("Remove the portal hub cover."),
        class: EntityClass::Procedure,
        title: "Remove the portal hub cover.".to_string(),
        content: "Remove the portal hub cover.".to_string(),
        reference: "Remove".to_string(),
        part_refs: vec![EntityKey::new("A001 890 38 67")],
        model_refs: vec!["U1300".to_string()],
        observation_count: 1,
    });
    result.free_text.push(TextRecord {
        key: crate::normalize::content_key("SB-2041: Brake hose routing changed"),
        class: EntityClass::Bulletin,
        title: "SB-2041: Brake hose routing changed".to_string(),
        content: "SB-2041: Brake hose routing changed".to_string(),
        reference: "SB-2041".to_string(),
        part_refs: Vec::new(),
        model_refs: Vec::new(),
        observation_count: 3,
    });
    result.models.insert("U1300".to_string());
    result.models.insert("UGN".to_string());
    result
}
