//! Runtime configuration shared by the daemon and the CLI.
//!
//! Values come from an optional TOML file named by `FACERANK_CONFIG`, then
//! `FACERANK_*` environment variables override individual keys.

use crate::intake::{QueryMode, DEFAULT_MAX_UPLOAD_BYTES};
use crate::pipeline::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus {other:?} (expected session or system)")),
        }
    }
}

/// facerank configuration. Zero means "no limit" for the numeric caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference images.
    pub gallery_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where uploaded queries are staged (system temp dir when unset).
    pub staging_dir: Option<PathBuf>,
    pub query_mode: QueryMode,
    /// Seconds before a single comparison is abandoned.
    pub compare_timeout_secs: u64,
    /// Gallery images examined per scan.
    pub max_gallery_size: usize,
    pub max_upload_bytes: usize,
    /// Results returned per query.
    pub top_k: usize,
    pub cache_gallery: bool,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("./static/gallery"),
            model_dir: default_model_dir(),
            staging_dir: None,
            query_mode: QueryMode::TempFile,
            compare_timeout_secs: 0,
            max_gallery_size: 0,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            top_k: 0,
            cache_gallery: true,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load the config file named by `FACERANK_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("FACERANK_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACERANK_*` variables, read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("FACERANK_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACERANK_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACERANK_STAGING_DIR") {
            self.staging_dir = Some(PathBuf::from(v));
        }
        env_parse(&var, "FACERANK_QUERY_MODE", &mut self.query_mode)?;
        env_parse(&var, "FACERANK_COMPARE_TIMEOUT_SECS", &mut self.compare_timeout_secs)?;
        env_parse(&var, "FACERANK_MAX_GALLERY_SIZE", &mut self.max_gallery_size)?;
        env_parse(&var, "FACERANK_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes)?;
        env_parse(&var, "FACERANK_TOP_K", &mut self.top_k)?;
        env_parse(&var, "FACERANK_BUS", &mut self.bus)?;
        env_bool(&var, "FACERANK_CACHE_GALLERY", &mut self.cache_gallery)?;
        Ok(())
    }

    /// Pipeline settings derived from this config.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be positive".into()));
        }
        let non_zero = |n: usize| (n > 0).then_some(n);
        Ok(PipelineConfig {
            gallery_dir: self.gallery_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            query_mode: self.query_mode,
            compare_timeout: (self.compare_timeout_secs > 0)
                .then(|| Duration::from_secs(self.compare_timeout_secs)),
            max_gallery_size: non_zero(self.max_gallery_size),
            max_upload_bytes: self.max_upload_bytes,
            top_k: non_zero(self.top_k),
            cache_gallery: self.cache_gallery,
        })
    }
}

/// `$XDG_DATA_HOME/facerank/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facerank/models")
}

fn env_parse<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = var(key) {
        *slot = raw
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{key}={raw:?}: {e}")))?;
    }
    Ok(())
}

/// `true`/`false` in any case, or `1`/`0`.
fn env_bool(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(raw) = var(key) {
        *slot = match raw.trim() {
            "1" => true,
            "0" => false,
            v if v.eq_ignore_ascii_case("true") => true,
            v if v.eq_ignore_ascii_case("false") => false,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "{key}={raw:?}: expected true, false, 1 or 0"
                )))
            }
        };
    }
    Ok(())
}
