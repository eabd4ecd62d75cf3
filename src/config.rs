use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration.
///
/// Every field has a documented default so a missing or partial config file
/// still yields a fully populated `Config`. File values win over defaults;
/// unknown keys are ignored.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Directory where captured case files are written.
    pub output_directory: PathBuf,
    /// Buffer poll interval in seconds.
    pub polling_interval: f64,
    /// Encoding recorded for persisted files. Writes are always UTF-8.
    pub file_encoding: String,
    /// Emit notification events for processed captures.
    pub enable_notifications: bool,
    /// Create the output directory on startup if it does not exist.
    pub auto_create_directory: bool,
    /// Hard ceiling on accepted content size, in megabytes.
    pub max_file_size_mb: u64,
    /// Run the background context-analysis enrichment path after each save.
    pub context_processing_enabled: bool,
    /// Whole-document analysis deadline in seconds.
    pub context_processing_timeout: f64,
    /// Analyze chunks concurrently and use larger chunk windows.
    pub performance_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("./casedata"),
            polling_interval: 1.0,
            file_encoding: "utf-8".to_string(),
            enable_notifications: true,
            auto_create_directory: true,
            max_file_size_mb: 10,
            context_processing_enabled: true,
            context_processing_timeout: 30.0,
            performance_mode: true,
        }
    }
}

impl Config {
    /// Content size ceiling in bytes.
    pub fn max_content_bytes(&self) -> usize {
        (self.max_file_size_mb as usize) * 1024 * 1024
    }

    /// Chunk window size in bytes. Larger windows in performance mode keep
    /// the chunk count (and per-chunk dispatch overhead) down.
    pub fn chunk_size(&self) -> usize {
        if self.performance_mode {
            1000
        } else {
            500
        }
    }

    /// Overlap carried between consecutive chunk windows, in bytes.
    pub fn chunk_overlap(&self) -> usize {
        if self.performance_mode {
            200
        } else {
            100
        }
    }
}

/// Load configuration from a TOML file, merging file values over defaults.
///
/// A missing file is not an error — the documented defaults apply.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    // `!(v > 0.0)` also rejects NaN, and non-finite values would panic
    // later in Duration::from_secs_f64.
    if !config.polling_interval.is_finite() || !(config.polling_interval > 0.0) {
        anyhow::bail!("polling_interval must be a positive number");
    }
    if config.max_file_size_mb == 0 {
        anyhow::bail!("max_file_size_mb must be > 0");
    }
    if !config.context_processing_timeout.is_finite()
        || !(config.context_processing_timeout > 0.0)
    {
        anyhow::bail!("context_processing_timeout must be a positive number");
    }

    Ok(config)
}
