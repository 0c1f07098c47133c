//! Configuration surface for Workspace Scout
//!
//! Loaded from `<config_dir>/workspace-scout/config.toml`. A missing file means
//! defaults; every field carries a serde default so partial files work. Values
//! outside the ranges the preferences UI allows are clamped by [`Config::validated`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_DIR_NAME: &str = "workspace-scout";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resource profile selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceMode {
    #[default]
    Balanced,
    Performance,
    MemorySaver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Editor workspace storage directories to scan
    pub storage_roots: Vec<PathBuf>,

    /// Replace a folder workspace by a `.code-workspace` file found inside it
    pub prefer_workspace_file: bool,

    /// Git metadata cache lifetime
    pub git_cache_ttl_secs: u64,

    pub performance_mode: PerformanceMode,

    pub max_batch_size: usize,
    pub min_batch_size: usize,

    /// Delay between batches (milliseconds), scaled by the performance mode
    pub processing_delay_ms: u64,

    pub enable_diagnostics: bool,

    /// Interval between full refreshes in watch mode
    pub refresh_interval_secs: u64,

    pub prefetch_batch_size: usize,
    pub prefetch_queue_limit: usize,
    pub prefetch_idle_delay_ms: u64,

    /// Launcher used to build open intents
    pub editor_command: String,
    pub new_window: bool,

    /// Where logs and persisted state documents live
    pub state_dir: PathBuf,

    /// Quarantine destination for orphaned store directories
    pub backup_dir: Option<PathBuf>,

    /// Overrides the platform trash location
    pub trash_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_roots: default_storage_roots(),
            prefer_workspace_file: false,
            git_cache_ttl_secs: 300,
            performance_mode: PerformanceMode::Balanced,
            max_batch_size: 10,
            min_batch_size: 2,
            processing_delay_ms: 100,
            enable_diagnostics: false,
            refresh_interval_secs: 300,
            prefetch_batch_size: 5,
            prefetch_queue_limit: 200,
            prefetch_idle_delay_ms: 2000,
            editor_command: "code".to_string(),
            new_window: false,
            state_dir: default_state_dir(),
            backup_dir: None,
            trash_dir: None,
        }
    }
}

fn default_storage_roots() -> Vec<PathBuf> {
    [
        "~/.config/Code/User/workspaceStorage",
        "~/.config/Code - Insiders/User/workspaceStorage",
        "~/.config/VSCodium/User/workspaceStorage",
        "~/.var/app/com.visualstudio.code/config/Code/User/workspaceStorage",
    ]
    .iter()
    .map(|p| expand_path(Path::new(p)))
    .collect()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Expands `~` and environment variables; falls back to the raw path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            debug!("Could not expand {}: {}", raw, e);
            path.to_path_buf()
        }
    }
}

/// Default location: `<config_dir>/workspace-scout/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the config at `path`, or defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default().validated());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config.validated())
}

fn clamp_logged<T: PartialOrd + Copy + std::fmt::Debug>(name: &str, value: T, lo: T, hi: T) -> T {
    if value < lo {
        warn!("{} = {:?} below minimum, using {:?}", name, value, lo);
        lo
    } else if value > hi {
        warn!("{} = {:?} above maximum, using {:?}", name, value, hi);
        hi
    } else {
        value
    }
}

impl Config {
    /// Clamp every bounded field into its allowed range and expand paths.
    pub fn validated(mut self) -> Self {
        self.git_cache_ttl_secs = clamp_logged("git_cache_ttl_secs", self.git_cache_ttl_secs, 60, 3600);
        self.max_batch_size = clamp_logged("max_batch_size", self.max_batch_size, 2, 20);
        self.min_batch_size = clamp_logged("min_batch_size", self.min_batch_size, 1, self.max_batch_size);
        self.processing_delay_ms =
            clamp_logged("processing_delay_ms", self.processing_delay_ms, 50, 1000);
        self.refresh_interval_secs =
            clamp_logged("refresh_interval_secs", self.refresh_interval_secs, 1, 3600);
        self.prefetch_batch_size = self.prefetch_batch_size.max(1);
        self.prefetch_queue_limit = self.prefetch_queue_limit.max(1);

        self.storage_roots = self.storage_roots.iter().map(|p| expand_path(p)).collect();
        self.state_dir = expand_path(&self.state_dir);
        self.backup_dir = self.backup_dir.as_deref().map(expand_path);
        self.trash_dir = self.trash_dir.as_deref().map(expand_path);
        self
    }

    pub fn git_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.git_cache_ttl_secs)
    }

    /// Inter-batch delay after applying the performance mode
    pub fn inter_batch_delay(&self) -> Duration {
        let base = self.processing_delay_ms;
        let ms = match self.performance_mode {
            PerformanceMode::Balanced => base,
            PerformanceMode::Performance => base / 2,
            PerformanceMode::MemorySaver => base * 2,
        };
        Duration::from_millis(ms)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("backups"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
