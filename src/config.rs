//! Service configuration
//!
//! Settings are layered: compiled defaults, then an optional
//! `qdo.toml`, then `QDO_`-prefixed environment variables, and finally
//! the command-line flags applied by the binary.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "qdo.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Port the admin API listens on.
    pub http_port: u16,
    /// Directory of the task database.
    pub db_path: String,
    /// Emit logs as JSON instead of human-readable lines.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "qdo.db".to_string(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    /// Load settings, optionally from an explicit file (which is then
    /// required to exist).
    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.as_ref())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(Environment::with_prefix("QDO").try_parsing(true));

        let config = builder.build().context("failed to read configuration")?;
        config
            .try_deserialize()
            .context("failed to parse configuration")
    }
}
