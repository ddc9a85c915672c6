//! WikiNER Core - Domain models, errors, and shared types
//!
//! This crate defines the core abstractions used throughout WikiNER:
//! - Page titles and Wikidata identifiers (QIDs)
//! - The closed NER category label set
//! - Entity records and the title -> record mapping
//! - Common error types
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, LoggingConfig, PipelineConfig, WikidataConfig, WikipediaConfig,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for WikiNER operations
#[derive(Error, Debug)]
pub enum WikinerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WikinerError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WikinerError>;

// ============================================================================
// Titles and Identifiers
// ============================================================================

/// A Wikipedia page title, normalized for lookup
///
/// Spaces are replaced by underscores, matching the form used in page URLs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Title(String);

impl Title {
    /// Normalize a raw title. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.replace(' ', "_")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable form (underscores back to spaces)
    pub fn display_name(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl std::fmt::Display for Title {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wikidata item identifier (e.g. `Q1001`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qid(String);

impl Qid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Qid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Qid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// NER Categories
// ============================================================================

/// Entity category assigned to a Wikidata item
///
/// Older mapping files used the short tags `PER`, `ORG`, `LOC` and `EVE`;
/// those are accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    #[serde(alias = "PER")]
    Person,
    #[serde(alias = "ORG")]
    Organization,
    #[serde(alias = "LOC")]
    Location,
    #[serde(alias = "EVE")]
    Event,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Self::Person,
        Self::Organization,
        Self::Location,
        Self::Event,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = WikinerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PERSON" | "PER" => Ok(Self::Person),
            "ORGANIZATION" | "ORG" => Ok(Self::Organization),
            "LOCATION" | "LOC" => Ok(Self::Location),
            "EVENT" | "EVE" => Ok(Self::Event),
            _ => Err(WikinerError::Other(anyhow::anyhow!(
                "unknown category: {s}"
            ))),
        }
    }
}

// ============================================================================
// Entity Records
// ============================================================================

/// Classification outcome for one title
///
/// A record without an identifier never carries a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Wikidata identifier, `null` when the title could not be resolved
    #[serde(alias = "QID", default)]
    pub identifier: Option<Qid>,

    /// Category, omitted when the item matched none
    #[serde(
        alias = "NER_Category",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Category>,
}

impl EntityRecord {
    /// Record for a title with no Wikidata item
    pub fn unresolved() -> Self {
        Self {
            identifier: None,
            category: None,
        }
    }

    /// Record for a resolved title
    pub fn resolved(qid: Qid, category: Option<Category>) -> Self {
        Self {
            identifier: Some(qid),
            category,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.identifier.is_some()
    }

    /// Category, honoring the "no identifier, no category" rule even for
    /// records read from hand-edited files
    pub fn effective_category(&self) -> Option<Category> {
        self.identifier.as_ref().and(self.category)
    }
}

/// Title -> record mapping, ordered by title for stable output
pub type NerMapping = BTreeMap<Title, EntityRecord>;

// ============================================================================
// Tests
// ============================================================================
