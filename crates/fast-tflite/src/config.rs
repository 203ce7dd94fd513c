//! Runtime configuration, loadable from TOML.
//!
//! ```toml
//! default_delegate = "core-ml"
//! max_model_bytes = 104857600
//! asset_root = "/opt/app/assets"
//! result_channel_capacity = 4
//! ```

use crate::delegate::ComputeDelegate;
use crate::source::StaticAssetResolver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Delegate used by hosts that do not pick one per model.
    pub default_delegate: ComputeDelegate,
    /// Models larger than this are rejected after fetching. `None` disables the check.
    pub max_model_bytes: Option<u64>,
    pub user_agent: String,
    /// Directory that relative bundled-asset paths are joined onto.
    pub asset_root: Option<PathBuf>,
    /// Pending per-frame results kept for observers before new ones are dropped.
    pub result_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_delegate: ComputeDelegate::Default,
            max_model_bytes: None,
            user_agent: concat!("fast-tflite/", env!("CARGO_PKG_VERSION")).to_string(),
            asset_root: None,
            result_channel_capacity: 8,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// An empty asset table rooted at `asset_root`, ready for the host to register its assets.
    pub fn asset_resolver(&self) -> StaticAssetResolver {
        match &self.asset_root {
            Some(root) => StaticAssetResolver::new().with_root(root.clone()),
            None => StaticAssetResolver::new(),
        }
    }
}
