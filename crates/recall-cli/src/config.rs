use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use recall_core::{AnnounceMode, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;

/// CLI configuration: defaults, then the TOML file, then `RECALL_*`
/// environment variables. Command-line flags are applied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// V4L2 device path. `None` picks the first capture device.
    #[serde(default)]
    pub camera_device: Option<String>,

    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Key file for embedding encryption, created on first use.
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// Maximum Euclidean distance accepted as a match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    #[serde(default)]
    pub announce: AnnounceMode,

    #[serde(default = "default_speech_command")]
    pub speech_command: String,

    /// Frames discarded after the camera starts streaming (AGC/AE settling).
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: usize,

    #[serde(default = "default_encrypt_embeddings")]
    pub encrypt_embeddings: bool,
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("recall")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

fn default_db_path() -> PathBuf {
    data_dir().join("people.db")
}

fn default_key_path() -> PathBuf {
    data_dir().join("embedding.key")
}

fn default_match_threshold() -> f32 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_speech_command() -> String {
    recall_hw::DEFAULT_SPEECH_COMMAND.to_string()
}

fn default_warmup_frames() -> usize {
    4
}

fn default_encrypt_embeddings() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: None,
            model_dir: default_model_dir(),
            db_path: default_db_path(),
            key_path: default_key_path(),
            match_threshold: default_match_threshold(),
            announce: AnnounceMode::default(),
            speech_command: default_speech_command(),
            warmup_frames: default_warmup_frames(),
            encrypt_embeddings: default_encrypt_embeddings(),
        }
    }
}

impl Config {
    /// Load all layers. An explicit `path` must exist; the default location
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/recall/config.toml`, falling back to `~/.config`.
    pub fn config_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"))
            .join("recall")
            .join("config.toml")
    }

    /// Override fields from `RECALL_*` variables. Unparseable values are
    /// ignored with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("RECALL_CAMERA_DEVICE") {
            self.camera_device = Some(device).filter(|d| !d.is_empty());
        }
        if let Some(dir) = var("RECALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("RECALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = var("RECALL_KEY_PATH") {
            self.key_path = PathBuf::from(path);
        }
        if let Some(command) = var("RECALL_SPEECH_COMMAND") {
            self.speech_command = command;
        }
        self.match_threshold = env_parse(&var, "RECALL_MATCH_THRESHOLD", self.match_threshold);
        self.announce = env_parse(&var, "RECALL_ANNOUNCE", self.announce);
        self.warmup_frames = env_parse(&var, "RECALL_WARMUP_FRAMES", self.warmup_frames);
        self.encrypt_embeddings = var("RECALL_ENCRYPT_EMBEDDINGS")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(self.encrypt_embeddings);
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.match_threshold)?;
        if self.speech_command.trim().is_empty() {
            bail!("speech_command must not be empty");
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(recall_core::engine::SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(recall_core::engine::ARCFACE_MODEL_FILE)
    }
}

pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        bail!("match threshold must be a positive number, got {threshold}");
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            default
        }),
        None => default,
    }
}
