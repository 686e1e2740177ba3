use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::ipc::DEFAULT_KEY_PATH;
use crate::source::pipe::DEFAULT_PIPE_PATH;
use crate::source::SourceKind;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_pipe_path")]
    pub pipe_path: PathBuf,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            pipe_path: default_pipe_path(),
            device: None,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
        }
    }
}

fn default_kind() -> SourceKind { SourceKind::Pipe }
fn default_pipe_path() -> PathBuf { DEFAULT_PIPE_PATH.into() }
fn default_key_path() -> PathBuf { DEFAULT_KEY_PATH.into() }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Explicit path, else `./bandpipe.toml`, else the per-user config file.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    let local = PathBuf::from("bandpipe.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("bandpipe").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("bandpipe").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Effective run settings: CLI values win, config fills the rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub source: SourceKind,
    pub pipe_path: PathBuf,
    pub device: Option<String>,
    pub key_path: PathBuf,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: Config) -> Self {
        Self {
            source: cli.source.unwrap_or(config.source.kind),
            pipe_path: cli.pipe_path.clone().unwrap_or(config.source.pipe_path),
            device: cli.device.clone().or(config.source.device),
            key_path: cli.ipc_path.clone().unwrap_or(config.ipc.key_path),
        }
    }
}
