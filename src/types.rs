use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Identifier,
    Procedure,
    Bulletin,
    Model,
}

impl EntityClass {
    pub const ALL: [EntityClass; 4] = [
        EntityClass::Identifier,
        EntityClass::Procedure,
        EntityClass::Bulletin,
        EntityClass::Model,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Identifier => "identifier",
            EntityClass::Procedure => "procedure",
            EntityClass::Bulletin => "bulletin",
            EntityClass::Model => "model",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical merge key. Case and whitespace are folded on construction, so
/// two keys compare equal iff their canonical text does.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(raw: &str) -> Self {
        let folded = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        EntityKey(folded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw signature hit. `start`/`end` index into the scanned view, `offset` is
/// the absolute source position of `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMatch {
    pub class: EntityClass,
    pub pattern: usize,
    pub start: usize,
    pub end: usize,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub description: String,
    pub class: EntityClass,
    pub observation_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecord {
    pub key: EntityKey,
    pub class: EntityClass,
    pub title: String,
    pub content: String,
    /// Leading action verb for procedures, bulletin number for bulletins.
    pub reference: String,
    pub part_refs: Vec<EntityKey>,
    pub model_refs: Vec<String>,
    pub observation_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_folds_case_and_whitespace() {
        assert_eq!(EntityKey::new(" a123  456\t78 90 "), EntityKey::new("A123 456 78 90"));
        assert_eq!(EntityKey::new("a123 456 78 90").as_str(), "A123 456 78 90");
    }

    #[test]
    fn class_names() {
        assert_eq!(EntityClass::Identifier.to_string(), "identifier");
        assert_eq!(EntityClass::Bulletin.as_str(), "bulletin");
    }
}
