//! Configuration for the voice client
//!
//! Defaults, overlaid by an optional TOML file under the platform config
//! directory, overlaid by environment variables. All file fields are
//! optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::{Error, Result};

/// Default assistant service websocket endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws";

/// Default connection establishment timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Assistant service websocket URL
    pub server_url: String,

    /// Directory holding the owner id store
    pub data_dir: PathBuf,

    /// How long to wait for the websocket to open before failing
    pub connect_timeout: Duration,
}

/// Optional TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    /// Assistant service websocket URL
    #[serde(default)]
    server_url: Option<String>,

    /// Data directory override
    #[serde(default)]
    data_dir: Option<PathBuf>,

    /// Connection timeout in seconds
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from defaults, config file, and environment.
    ///
    /// Reads `<config dir>/ally-voice/config.toml` when present, then applies
    /// `ALLY_SERVER_URL` and `ALLY_DATA_DIR` overrides.
    ///
    /// # Errors
    ///
    /// Returns error if the platform directories cannot be determined or the
    /// config file fails to parse
    pub fn load() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "ally-voice")
            .ok_or_else(|| Error::Config("could not determine home directory".to_string()))?;

        let file = Self::read_file(&dirs.config_dir().join("config.toml"))?;

        let mut config = Self {
            server_url: file
                .server_url
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            data_dir: file
                .data_dir
                .unwrap_or_else(|| dirs.data_dir().to_path_buf()),
            connect_timeout: file
                .connect_timeout_secs
                .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs),
        };

        if let Ok(url) = std::env::var("ALLY_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(dir) = std::env::var("ALLY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        tracing::debug!(
            server_url = %config.server_url,
            data_dir = %config.data_dir.display(),
            "loaded configuration"
        );

        Ok(config)
    }

    /// Parse the config file at `path`, or defaults when it does not exist.
    fn read_file(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Path of the owner id store under the data directory
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("ally.db")
    }
}
