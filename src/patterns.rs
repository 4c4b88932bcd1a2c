//! Pattern and vocabulary configuration.
//!
//! Everything the scanner, validator and context extractor need is data held
//! in [`PatternConfig`]. The built-in defaults are versioned; a TOML or JSON
//! file and `WIS_*` environment variables can override any field.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scanner::PatternSet;

pub const DEFAULT_VERSION: &str = "wis-patterns/1";

/// Placeholder in procedure patterns, replaced by the escaped verb alternation.
pub const VERBS_PLACEHOLDER: &str = "{verbs}";

/// Text encodings the scanner looks at in each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw bytes: ASCII plus single-byte accented letters.
    Latin1,
    /// Little-endian UTF-16 strings, narrowed to their ASCII code units.
    Utf16le,
}

/// Length and shape limits for procedure and bulletin text.
///
/// Lower bounds are inclusive, upper bounds exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextRules {
    pub min_chars: usize,
    pub max_chars: usize,
    pub min_words: usize,
    pub max_symbol_ratio: f64,
    pub min_avg_word: f64,
    pub max_avg_word: f64,
    pub title_chars: usize,
}

impl Default for TextRules {
    fn default() -> Self {
        TextRules {
            min_chars: 20,
            max_chars: 500,
            min_words: 4,
            max_symbol_ratio: 0.2,
            min_avg_word: 2.0,
            max_avg_word: 15.0,
            title_chars: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextRules {
    /// Bytes taken before a candidate.
    pub before_bytes: usize,
    /// Bytes taken after a candidate.
    pub after_bytes: usize,
    /// Characters kept ahead of the first keyword hit.
    pub lead_chars: usize,
    pub max_chars: usize,
    pub min_chars: usize,
    pub fallback_chars: usize,
    /// Share of context bytes that must decode to visible characters.
    pub min_printable_ratio: f64,
}

impl Default for ContextRules {
    fn default() -> Self {
        ContextRules {
            before_bytes: 100,
            after_bytes: 200,
            lead_chars: 20,
            max_chars: 100,
            min_chars: 10,
            fallback_chars: 80,
            min_printable_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub version: String,
    /// Ordered most specific first; later patterns only claim unclaimed spans.
    pub identifier_patterns: Vec<String>,
    pub procedure_patterns: Vec<String>,
    pub bulletin_patterns: Vec<String>,
    pub model_patterns: Vec<String>,
    /// Letters allowed in front of the ten identifier digits.
    pub identifier_prefixes: String,
    /// Canonical keys that are always rejected.
    pub sentinels: Vec<String>,
    pub component_keywords: Vec<String>,
    pub action_verbs: Vec<String>,
    /// Known model codes. Empty accepts any normalized model.
    pub models: Vec<String>,
    pub noise_tokens: Vec<String>,
    /// Longest match any pattern may produce; drives window overlap.
    pub max_match_len: usize,
    pub text: TextRules,
    pub context: ContextRules,
    pub encodings: Vec<Encoding>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            version: DEFAULT_VERSION.to_string(),
            identifier_patterns: strings(&[
                r"[A-Z][0-9]{3}[ \t]{1,3}[0-9]{3}[ \t]{1,3}[0-9]{2}[ \t]{1,3}[0-9]{2}",
                r"[A-Z][0-9]{3}\.[0-9]{3}\.[0-9]{2}\.[0-9]{2}",
                r"[A-Z][0-9]{3}-[0-9]{3}-[0-9]{2}-[0-9]{2}",
                r"[A-Z][0-9]{3}/[0-9]{3}/[0-9]{2}/[0-9]{2}",
                r"[A-Z][ \t]{1,3}[0-9]{3}[ \t]{1,3}[0-9]{3}[ \t]{1,3}[0-9]{2}[ \t]{1,3}[0-9]{2}",
                r"[A-Z][0-9]{10}(?-u:\b)",
                r"[A-Z][0-9]{3}[ \t]{0,3}[0-9]{3}[ \t]{0,3}[0-9]{2}[ \t]{0,3}[0-9]{2}",
            ]),
            procedure_patterns: strings(&[
                r"(?-u:\b)(?:{verbs})(?-u:\b)(?-u:[\x20-\x2d\x2f-\x3a\x3c-\x7b\x7d\x7e\x80-\xff]){0,400}(?-u:\.)?",
            ]),
            bulletin_patterns: strings(&[
                r"(?i)Technical[ ]+Service[ ]+Bulletin(?-u:[\x20-\x7b\x7d\x7e\x80-\xff]){0,400}",
                r"(?i)Service[ ]+Bulletin(?-u:[\x20-\x7b\x7d\x7e\x80-\xff]){0,400}",
                r"(?-u:\b)SB[- ][0-9]{1,6}:(?-u:[\x20-\x7b\x7d\x7e\x80-\xff]){0,400}",
                r"(?-u:\b)(?:19|20)[0-9]{2}-[0-9]{2}-[0-9]{2}(?-u:[\x20-\x7b\x7d\x7e\x80-\xff]){20,400}",
            ]),
            model_patterns: strings(&[
                r"(?-u:\b)Unimog[ ]+[0-9]{3,4}(?-u:\b)",
                r"(?-u:\b)U[ ]?[0-9]{3,4}(?-u:\b)",
                r"(?-u:\b)U(?:GN|HN)(?-u:\b)",
            ]),
            identifier_prefixes: "ABMNW".to_string(),
            sentinels: Vec::new(),
            component_keywords: strings(&[
                // English
                "shaft", "seal", "bearing", "gasket", "valve", "pump", "filter", "hub", "axle",
                "gear", "spring", "bolt", "nut", "washer", "bushing", "pin", "ring", "hose",
                "bracket", "mount", "sensor", "switch", "relay", "module", "actuator",
                "cylinder", "piston", "rod", "cable", "lever", "clutch", "brake",
                "differential", "transmission", "transfer", "case", "portal", "reduction",
                "planetary", "steering", "hydraulic", "pneumatic", "electrical", "wiring",
                "harness", "connector", "fuse", "circuit",
                // German
                "welle", "dichtung", "lager", "ventil", "pumpe", "nabe", "achse", "getriebe",
                "feder", "schraube", "mutter", "scheibe", "buchse", "stift", "schlauch",
                "halter", "schalter", "modul", "zylinder", "kolben", "stange", "kabel",
                "hebel", "kupplung", "bremse", "verteiler", "gehäuse", "untersetzung",
                "lenkung", "hydraulik", "pneumatik", "elektrisch", "kabelbaum", "stecker",
                "sicherung", "kreis",
                // French
                "arbre", "joint", "roulement", "soupape", "pompe", "filtre", "moyeu",
                "essieu", "engrenage", "ressort", "boulon", "écrou", "rondelle", "douille",
                "goupille", "anneau", "tuyau", "support", "interrupteur", "relais",
                "cylindre", "tige", "câble", "levier", "embrayage", "frein", "différentiel",
                "boîte",
            ]),
            action_verbs: strings(&[
                "Remove", "Install", "Replace", "Check", "Adjust", "Test", "Inspect", "Torque",
                "Connect", "Disconnect", "Drain", "Fill", "Bleed", "Clean", "Measure", "Mount",
                "Dismount", "Repair", "Service", "Calibrate", "Align",
                // German
                "Entfernen", "Einbauen", "Ausbauen", "Ersetzen", "Prüfen", "Einstellen",
                "Testen", "Reparieren", "Montieren", "Demontieren", "Inspizieren",
                // French
                "Déposer", "Installer", "Remplacer", "Vérifier", "Régler",
            ]),
            models: strings(&[
                "U1000", "U1100", "U1200", "U1300", "U1400", "U1500", "U1600", "U1700",
                "U2100", "U2150", "U2450", "U3000", "U4000", "U5000", "U5023", "U400", "U500",
                "U404", "U406", "U411", "U416", "U421", "U424", "U425", "U427", "U435",
                "U437", "U20", "UGN", "UHN",
            ]),
            noise_tokens: strings(&["icon", "button", "checkbox", "_", ".dll", ".exe"]),
            max_match_len: 512,
            text: TextRules::default(),
            context: ContextRules::default(),
            encodings: vec![Encoding::Latin1],
        }
    }
}

impl PatternConfig {
    pub fn builder() -> PatternConfigBuilder {
        PatternConfigBuilder {
            config: PatternConfig::default(),
        }
    }

    /// Layers the built-in defaults, an optional file and `WIS_*` variables
    /// (`WIS_TEXT__MIN_WORDS=2` sets `text.min_words`).
    pub fn load(path: Option<&Path>) -> Result<PatternConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&PatternConfig::default())?);
        if let Some(p) = path {
            builder = builder.add_source(File::from(p));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("WIS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn compile(&self) -> Result<PatternSet> {
        PatternSet::compile(self)
    }
}

/// Programmatic construction on top of the defaults.
#[derive(Debug, Clone)]
pub struct PatternConfigBuilder {
    config: PatternConfig,
}

impl PatternConfigBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn identifier_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.identifier_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn procedure_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.procedure_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn bulletin_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.bulletin_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn model_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.model_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn sentinel(mut self, key: impl Into<String>) -> Self {
        self.config.sentinels.push(key.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.component_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn action_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.action_verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_match_len(mut self, len: usize) -> Self {
        self.config.max_match_len = len;
        self
    }

    pub fn text_rules(mut self, rules: TextRules) -> Self {
        self.config.text = rules;
        self
    }

    pub fn context_rules(mut self, rules: ContextRules) -> Self {
        self.config.context = rules;
        self
    }

    pub fn encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.config.encodings = encodings;
        self
    }

    pub fn into_config(self) -> PatternConfig {
        self.config
    }

    pub fn build(self) -> Result<PatternSet> {
        PatternSet::compile(&self.config)
    }
}
