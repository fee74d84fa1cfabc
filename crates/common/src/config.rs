//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ButtercutResult;

/// Environment variable that overrides [`AppConfig::storage_dir`].
pub const STORAGE_DIR_ENV: &str = "BUTTERCUT_STORAGE_DIR";

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding job records, uploads, and rendered artifacts.
    pub storage_dir: PathBuf,

    /// Encoder and render defaults.
    #[serde(default)]
    pub render: RenderSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Encoder invocation and supervision parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Encoder binary (resolved through `PATH` when not absolute).
    pub ffmpeg_bin: PathBuf,

    /// Probe binary.
    pub ffprobe_bin: PathBuf,

    /// Constant rate factor for the video re-encode.
    pub crf: u32,

    /// x264 preset.
    pub preset: String,

    /// Font size for text overlays.
    pub font_size: u32,

    /// Canvas used when the source geometry cannot be probed.
    pub default_canvas_width: u32,
    pub default_canvas_height: u32,

    /// Watchdog limit for a single encoder run. `None` disables it.
    pub max_render_secs: Option<u64>,

    /// Minimum percentage increase between two reported progress values.
    pub progress_step: f64,

    /// Maximum characters of diagnostic text stored in a job message.
    pub diagnostic_chars: usize,

    /// Bytes of encoder stderr retained for failure reporting.
    pub diagnostic_capture_bytes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "buttercut=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            render: RenderSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            crf: 18,
            preset: "veryfast".to_string(),
            font_size: 48,
            default_canvas_width: 1280,
            default_canvas_height: 720,
            max_render_secs: None,
            progress_step: 1.0,
            diagnostic_chars: 200,
            diagnostic_capture_bytes: 8192,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location.
    ///
    /// A missing file yields the defaults. `BUTTERCUT_STORAGE_DIR` takes
    /// precedence over the stored value. An unreadable or malformed file is
    /// an error; callers fall back to [`AppConfig::fallback`] once they can
    /// report it.
    pub fn load() -> ButtercutResult<Self> {
        Self::load_from(&config_file_path()).map(Self::with_env_overrides)
    }

    /// Defaults with environment overrides applied.
    pub fn fallback() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load config from `path`, without environment overrides.
    pub fn load_from(path: &Path) -> ButtercutResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.storage_dir = PathBuf::from(dir);
            }
        }
        self
    }

    /// Save config to the standard location.
    pub fn save(&self) -> ButtercutResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ButtercutResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Directory holding persisted job records.
    pub fn jobs_dir(&self) -> PathBuf {
        self.storage_dir.join("jobs")
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("buttercut").join("config.json")
}

/// Default storage directory.
fn default_storage_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("buttercut").join("storage")
}
