use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::DEFAULT_YOLO_HINTS;
use crate::pipeline::DEFAULT_PLACEHOLDER;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_MAX_UPLOAD_MB: u64 = 10;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct DetectdConfigFile {
    api: Option<ApiConfigFile>,
    models: Option<ModelsConfigFile>,
    inference: Option<InferenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_mb: Option<u64>,
    cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
    hints: Option<Vec<String>>,
    weights_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    input_size: Option<u32>,
    placeholder_width: Option<u32>,
    placeholder_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DetectdConfig {
    pub api_addr: String,
    pub max_upload_mb: u64,
    pub cors_origins: Vec<String>,
    pub models: ModelSettings,
    pub inference: InferenceSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub hints: Vec<String>,
    pub weights_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub input_size: u32,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

impl Default for DetectdConfig {
    fn default() -> Self {
        Self::from_file(DetectdConfigFile::default())
    }
}

impl DetectdConfig {
    /// Load from the file named by `SWIFTDETECT_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SWIFTDETECT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DetectdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }

    fn from_file(file: DetectdConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_mb: api.max_upload_mb.unwrap_or(DEFAULT_MAX_UPLOAD_MB),
            cors_origins: api.cors_origins.unwrap_or_else(|| vec!["*".to_string()]),
            models: ModelSettings {
                dir: models
                    .dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR)),
                hints: models.hints.unwrap_or_else(|| {
                    DEFAULT_YOLO_HINTS.iter().map(|s| s.to_string()).collect()
                }),
                weights_url: models.weights_url,
            },
            inference: InferenceSettings {
                input_size: inference.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                placeholder_width: inference
                    .placeholder_width
                    .unwrap_or(DEFAULT_PLACEHOLDER.0),
                placeholder_height: inference
                    .placeholder_height
                    .unwrap_or(DEFAULT_PLACEHOLDER.1),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SWIFTDETECT_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("SWIFTDETECT_MODELS_DIR") {
            if !dir.trim().is_empty() {
                self.models.dir = PathBuf::from(dir);
            }
        }
        if let Ok(origins) = std::env::var("SWIFTDETECT_CORS_ORIGINS") {
            let parsed = split_csv(&origins);
            if !parsed.is_empty() {
                self.cors_origins = parsed;
            }
        }
        if let Ok(url) = std::env::var("SWIFTDETECT_WEIGHTS_URL") {
            if !url.trim().is_empty() {
                self.models.weights_url = Some(url);
            }
        }
        if let Ok(mb) = std::env::var("SWIFTDETECT_MAX_UPLOAD_MB") {
            self.max_upload_mb = mb
                .trim()
                .parse()
                .map_err(|_| anyhow!("SWIFTDETECT_MAX_UPLOAD_MB must be an integer number of MiB"))?;
        }
        if let Ok(size) = std::env::var("SWIFTDETECT_INPUT_SIZE") {
            self.inference.input_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("SWIFTDETECT_INPUT_SIZE must be an integer pixel size"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_upload_mb == 0 {
            return Err(anyhow!("max_upload_mb must be greater than zero"));
        }
        if self.inference.placeholder_width == 0 || self.inference.placeholder_height == 0 {
            return Err(anyhow!("placeholder dimensions must be greater than zero"));
        }
        let size = self.inference.input_size;
        if size == 0 || size % 32 != 0 {
            return Err(anyhow!(
                "input_size must be a positive multiple of 32, got {}",
                size
            ));
        }
        Ok(())
    }
}

/// `.toml` files are TOML, everything else is JSON.
fn read_config_file(path: &Path) -> Result<DetectdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
