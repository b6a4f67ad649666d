//! # Configuration
//!
//! Runtime knobs are managed by [`confique`], which handles layered loading
//! from TOML files, environment variables, and compiled defaults.
//!
//! ## Resolution Order
//!
//! 1. **Environment variables**: `RXMODEL_ID_PREFIX`, `RXMODEL_MAX_DISPATCH_DEPTH`.
//! 2. **TOML file**: only when loaded through [`Settings::from_file`].
//! 3. **Compiled Defaults**: Built-in fallbacks via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `id_prefix` | `c` | Prefix of generated entity unique ids (`c1`, `c2`, ...) |
//! | `max_dispatch_depth` | `64` | Times one bus may re-enter its own dispatch before events are dropped |
//!
//! The process-wide settings are resolved once. Call [`install`] before the
//! first entity is created to override them programmatically.

use std::path::Path;

use confique::Config;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModelError, Result};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Configuration for rxmodel.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Prefix of generated entity unique ids.
    #[config(default = "c", env = "RXMODEL_ID_PREFIX")]
    pub id_prefix: String,

    /// How deep listeners may re-enter dispatch before further events are
    /// dropped with a warning.
    #[config(default = 64, env = "RXMODEL_MAX_DISPATCH_DEPTH")]
    pub max_dispatch_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id_prefix: "c".to_string(),
            max_dispatch_depth: 64,
        }
    }
}

impl Settings {
    /// Load settings from the environment on top of compiled defaults.
    pub fn from_env() -> Result<Self> {
        Settings::builder()
            .env()
            .load()
            .map_err(|e| ModelError::Settings(e.to_string()))
    }

    /// Load settings from a TOML file; environment variables still win.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Settings::builder()
            .env()
            .file(path.as_ref())
            .load()
            .map_err(|e| ModelError::Settings(e.to_string()))
    }
}

/// Install process-wide settings. Fails (returning the rejected settings)
/// when settings were already resolved.
pub fn install(settings: Settings) -> std::result::Result<(), Settings> {
    SETTINGS.set(settings)
}

/// Process-wide settings, loaded from the environment on first use.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        Settings::from_env().unwrap_or_else(|err| {
            warn!(%err, "invalid rxmodel settings, falling back to defaults");
            Settings::default()
        })
    })
}
