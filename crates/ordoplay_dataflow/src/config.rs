// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace configuration.

use crate::history::MAX_HISTORY;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "dataflow.ron";

/// Settings shared by every graph of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Maximum cached outputs, `None` for unbounded
    pub cache_capacity: Option<usize>,
    /// Undo depth of historied graphs that do not set their own
    pub history_depth: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            cache_capacity: None,
            history_depth: MAX_HISTORY,
        }
    }
}

impl WorkspaceConfig {
    /// Cache capacity as the cache expects it; zero means unbounded
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.cache_capacity.and_then(NonZeroUsize::new)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        ron::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Load from a RON file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            tracing::debug!("No workspace config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}
