use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub assets: AssetsConfig,
  #[serde(default)]
  pub share: ShareConfig,
  #[serde(default)]
  pub clipboard: ClipboardConfig,
  /// Override for the directory holding the cache and state databases
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
  /// Origin the application's assets are fetched from (e.g. "https://app.example")
  pub base_url: String,
  /// Version tag naming the generation populated on startup
  pub version: String,
  /// Cache name prefix; the eviction sweep only touches generations under it
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Origin-relative paths precached on startup
  #[serde(default)]
  pub precache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
  /// Path share requests are redirected to
  #[serde(default = "default_app_root")]
  pub app_root: String,
  /// Grace delay before delivering to a freshly opened session
  #[serde(default = "default_grace_delay_ms")]
  pub grace_delay_ms: u64,
}

impl Default for ShareConfig {
  fn default() -> Self {
    Self {
      app_root: default_app_root(),
      grace_delay_ms: default_grace_delay_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipboardConfig {
  /// Minimum interval between executed clipboard checks
  #[serde(default = "default_cooldown_ms")]
  pub cooldown_ms: u64,
  /// Age beyond which a pending link is treated as absent
  #[serde(default = "default_pending_max_age_ms")]
  pub pending_max_age_ms: u64,
}

impl Default for ClipboardConfig {
  fn default() -> Self {
    Self {
      cooldown_ms: default_cooldown_ms(),
      pending_max_age_ms: default_pending_max_age_ms(),
    }
  }
}

fn default_cache_prefix() -> String {
  "shelfmark-assets".to_string()
}

fn default_app_root() -> String {
  "/".to_string()
}

fn default_grace_delay_ms() -> u64 {
  crate::share::DEFAULT_GRACE_DELAY_MS
}

fn default_cooldown_ms() -> u64 {
  crate::clipboard::DEFAULT_COOLDOWN_MS
}

fn default_pending_max_age_ms() -> u64 {
  crate::clipboard::DEFAULT_MAX_AGE_MS
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shelfmark.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shelfmark/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shelfmark/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shelfmark.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shelfmark").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
