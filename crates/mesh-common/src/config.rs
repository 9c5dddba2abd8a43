//! Node configuration file.
//!
//! JSON, every field optional:
//!
//! ```json
//! {
//!   "store_dir": "/var/lib/meshkey",
//!   "namespace": "identity",
//!   "max_generate_attempts": 16,
//!   "log_level": "info"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default directory for the file-backed key store.
pub const DEFAULT_STORE_DIR: &str = "meshkey-store";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Directory holding one JSON document per key store namespace.
    pub store_dir: PathBuf,
    /// Key store namespace for the node identity.
    pub namespace: String,
    /// Bound on key generation draws.
    pub max_generate_attempts: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            namespace: "identity".into(),
            max_generate_attempts: 16,
            log_level: "info".into(),
        }
    }
}

impl NodeConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_generate_attempts == 0 {
            return Err(Error::config("max_generate_attempts must be at least 1"));
        }
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        Ok(())
    }
}
