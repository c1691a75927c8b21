// SPDX-License-Identifier: MPL-2.0
use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    event::{EventClassifier, EventTags},
    extract::OpaqueKeys,
    provenance::ProvenanceTracker,
    pseudonymize::{secret_key, MaskPolicy},
    utils::DiffAlgorithm,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration file `{path}`")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("the pattern masking policy needs a pattern")]
    MissingPattern,
    #[error("invalid masking pattern")]
    InvalidPattern(#[from] regex::Error),
}

/// Everything the pipeline can be told about the layout of a log file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Column holding the event type.
    pub event_column: String,
    /// Column holding the JSON parameters.
    pub json_column: String,
    /// Column holding the tile id. Used when present in the file, otherwise the id is read from the JSON.
    pub tile_column: Option<String>,
    /// Key of the tile id inside the JSON parameters.
    pub tile_key: String,
    pub event_tags: EventTags,
    /// Keys whose subtrees are never text-mined.
    pub opaque_keys: Vec<String>,
    pub diff_algorithm: DiffAlgorithm,
    pub masking: MaskingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_column: "event".to_string(),
            json_column: "parameters".to_string(),
            tile_column: Some("tileId".to_string()),
            tile_key: "tileId".to_string(),
            event_tags: EventTags::default(),
            opaque_keys: vec!["serializedObject".to_string()],
            diff_algorithm: DiffAlgorithm::default(),
            masking: MaskingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.to_owned(),
            source,
        })
    }

    pub fn opaque_keys(&self) -> OpaqueKeys {
        OpaqueKeys::new(self.opaque_keys.iter().cloned())
    }

    pub fn classifier(&self) -> EventClassifier {
        EventClassifier {
            tags: self.event_tags.clone(),
            tile_key: self.tile_key.clone(),
            tile_column: self.tile_column.clone(),
        }
    }

    pub fn tracker(&self) -> ProvenanceTracker {
        ProvenanceTracker::new(self.classifier(), self.opaque_keys(), self.diff_algorithm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskPolicyKind {
    #[default]
    Content,
    Random,
    Pattern,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown masking policy `{0}` (expected one of: content, random, pattern)")]
pub struct UnknownMaskPolicy(String);

impl FromStr for MaskPolicyKind {
    type Err = UnknownMaskPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(MaskPolicyKind::Content),
            "random" => Ok(MaskPolicyKind::Random),
            "pattern" => Ok(MaskPolicyKind::Pattern),
            _ => Err(UnknownMaskPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaskingConfig {
    /// Columns to mask. Each column is its own identifier space.
    pub columns: Vec<String>,
    pub policy: MaskPolicyKind,
    /// Regex for the pattern policy.
    pub pattern: Option<String>,
    /// Secret keying content-derived tokens.
    pub secret: Option<String>,
    /// Mapping file to preload (if it exists) and to write back after the run.
    pub mapping_path: Option<PathBuf>,
}

impl MaskingConfig {
    pub fn policy(&self) -> Result<MaskPolicy, ConfigError> {
        Ok(match self.policy {
            MaskPolicyKind::Content => match &self.secret {
                Some(secret) => MaskPolicy::keyed(secret),
                None => MaskPolicy::content_derived(),
            },
            MaskPolicyKind::Random => MaskPolicy::Random,
            MaskPolicyKind::Pattern => {
                let pattern = self.pattern.as_deref().ok_or(ConfigError::MissingPattern)?;
                MaskPolicy::Pattern {
                    pattern: Regex::new(pattern)?,
                    fallback_key: self.secret.as_deref().map(secret_key),
                }
            }
        })
    }
}
