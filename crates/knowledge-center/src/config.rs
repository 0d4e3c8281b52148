use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// JSON file the store is loaded from and flushed to; in-memory only when unset.
    pub path: Option<PathBuf>,
    /// Element patterns are only suggested above this success rate.
    pub pattern_min_success_rate: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            pattern_min_success_rate: 0.7,
        }
    }
}
