//! Source maps
//!
//! A transformed file may carry up to two maps: the transformer's own
//! (original → intermediate) and the coverage instrumenter's
//! (intermediate → final). This module holds the v3 map type, reads and
//! writes inline `sourceMappingURL` comments, and composes the two stages
//! into a single original → final map.

mod compose;
pub mod inline;
pub mod vlq;

pub use compose::{compose, compose_maps};
pub use inline::{append_inline_map, extract_inline_map, strip_inline_map, InlineMapError};
pub use vlq::MappingsError;

use serde::{Deserialize, Serialize};

fn v3() -> u32 {
    3
}

/// A v3 source map
///
/// Fields not modelled here are kept in `extra` so a map that passes
/// through untouched serializes back to the same JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    #[serde(default = "v3")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,

    #[serde(default)]
    pub names: Vec<String>,

    pub mappings: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SourceMap {
    /// An empty map for a single source
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: None,
            source_root: None,
            sources: vec![source.into()],
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Parse a map from its JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to compact JSON, the form persisted next to cache entries
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode `mappings` into absolute segments
    pub fn decoded_mappings(&self) -> Result<vlq::Lines, MappingsError> {
        vlq::decode(&self.mappings)
    }

    /// Fill `sourcesContent` with the original text when this map
    /// describes a single source and does not already embed it.
    pub fn embed_single_source(&mut self, original: &str) {
        if self.sources.len() != 1 {
            return;
        }
        let has_content = self
            .sources_content
            .as_ref()
            .is_some_and(|c| c.first().is_some_and(Option::is_some));
        if !has_content {
            self.sources_content = Some(vec![Some(original.to_string())]);
        }
    }
}

/// A map as handed over by a transformer: already structured, or JSON text
#[derive(Debug, Clone, PartialEq)]
pub enum RawSourceMap {
    Structured(SourceMap),
    Json(String),
}

impl RawSourceMap {
    /// Resolve into a structured map
    pub fn parse(self) -> Result<SourceMap, serde_json::Error> {
        match self {
            Self::Structured(map) => Ok(map),
            Self::Json(json) => SourceMap::from_json(&json),
        }
    }
}

impl From<SourceMap> for RawSourceMap {
    fn from(map: SourceMap) -> Self {
        Self::Structured(map)
    }
}
