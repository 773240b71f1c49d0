use serde::{Deserialize, Serialize};
use std::{fs::read_to_string, path::Path};

use crate::error::TraceGraphError;

/// When the subtree index is recomputed after the hierarchy changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildStrategy {
    /// Rebuild inside every mutation that moves the hierarchy.
    Eager,
    /// Mark the index invalid and rebuild on the next read.
    #[default]
    Lazy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pending change messages held before the oldest ones are dropped. 0 means unbounded.
    pub queue_capacity: usize,
    /// Change messages addressed to a version other than the loaded one are always dropped;
    /// with this set they are also announced as [`crate::event::Event::ChangeDropped`].
    pub notify_foreign_versions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            queue_capacity: 1024,
            notify_foreign_versions: false,
        }
    }
}

/// Engine settings, usually read from a `tracegraph.toml`:
///
/// ```toml
/// rebuild = "eager"
/// max_undo_depth = 200
///
/// [sync]
/// queue_capacity = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rebuild: RebuildStrategy,
    /// 0 keeps the full history.
    pub max_undo_depth: usize,
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rebuild: RebuildStrategy::default(),
            max_undo_depth: 500,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<EngineConfig, TraceGraphError> {
        Ok(toml::from_str(content)?)
    }

    /// Read the config at `path`. A missing file yields the defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<EngineConfig, TraceGraphError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read engine config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(EngineConfig::default());
        }
        let content = read_to_string(path)?;
        EngineConfig::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, TraceGraphError> {
        Ok(toml::to_string(self)?)
    }
}
