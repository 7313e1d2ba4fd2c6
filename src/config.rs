//! Configuration for the ingestion client.
//! Parsed from a TOML file, then patched with command line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist::DEFAULT_DIR_FORMAT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub alert: AlertSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long to wait for each reply
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive timeouts before the whole session is reset
    #[serde(default = "default_retries")]
    pub retries: u8,
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Candidate roots for the output tree, first existing directory wins
    #[serde(default = "default_base_paths")]
    pub base_paths: Vec<PathBuf>,
    #[serde(default = "default_dir_format")]
    pub dir_format: String,
    /// Output sampling rate in Hz, 0 keeps the native rate
    #[serde(default)]
    pub target_sps: u32,
    /// Output channel spacing in meters, 0 keeps the native spacing
    #[serde(default)]
    pub target_dx: f64,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_paths: default_base_paths(),
            dir_format: default_dir_format(),
            target_sps: 0,
            target_dx: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSection {
    #[serde(default)]
    pub enabled: bool,
    pub token: Option<String>,
    pub channel: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for AlertSection {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            channel: None,
            api_url: default_api_url(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5555
}
fn default_timeout_ms() -> u64 {
    3000
}
fn default_retries() -> u8 {
    3
}
fn default_base_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}
fn default_dir_format() -> String {
    DEFAULT_DIR_FORMAT.into()
}
fn default_api_url() -> String {
    "https://api.telegram.org".into()
}

impl Config {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.producer.timeout_ms)
    }

    /// Reject settings the loop can't run with
    pub fn validate(&self) -> Result<()> {
        if self.producer.retries == 0 {
            return Err(Error::Config("producer.retries must be at least 1".into()));
        }
        if self.producer.timeout_ms == 0 {
            return Err(Error::Config("producer.timeout_ms must be positive".into()));
        }
        if !self.output.target_dx.is_finite() || self.output.target_dx < 0.0 {
            return Err(Error::Config(format!(
                "output.target_dx must be a non-negative distance, got {}",
                self.output.target_dx
            )));
        }
        if !self.output.dir_format.contains("{yyyymmdd}") {
            return Err(Error::Config(
                "output.dir_format must contain {yyyymmdd}".into(),
            ));
        }
        Ok(())
    }

    /// First configured base path that is an existing directory
    pub fn base_path(&self) -> Result<&Path> {
        self.output
            .base_paths
            .iter()
            .find(|p| p.is_dir())
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                Error::Config(format!(
                    "none of the output paths {:?} is an accessible directory",
                    self.output.base_paths
                ))
            })
    }
}
