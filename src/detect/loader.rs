use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::detect::catalog::{EngineDescriptor, YOLO_ENGINE};
use crate::detect::engine::Engine;
use crate::detect::error::EngineLoadError;

/// Builds an engine for a descriptor.
///
/// The registry never constructs real backends itself; it goes through a loader so the
/// set of backends (and, in tests, their failure modes) can be swapped.
pub trait EngineLoader: Send + Sync {
    fn load(&self, descriptor: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError>;
}

/// Loader for on-disk model weights under `<models_dir>/<engine>/`.
#[derive(Clone, Debug)]
pub struct DefaultEngineLoader {
    models_dir: PathBuf,
    input_size: u32,
    weights_url: Option<String>,
}

impl DefaultEngineLoader {
    pub fn new(models_dir: impl Into<PathBuf>, input_size: u32) -> Self {
        Self {
            models_dir: models_dir.into(),
            input_size,
            weights_url: None,
        }
    }

    /// Base URL to fetch missing well-known weights from (`fetch-weights` feature).
    pub fn with_weights_url(mut self, url: Option<String>) -> Self {
        self.weights_url = url;
        self
    }

    /// Square model input side handed to real engines.
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Locate weights for `name`: the engine's models dir first, then `name` as a path,
    /// then a download when a weights URL is configured.
    pub fn resolve_weights(&self, engine_kind: &str, name: &str) -> Result<PathBuf, EngineLoadError> {
        let dir = self.models_dir.join(engine_kind);
        let local = dir.join(name);
        if local.is_file() {
            return Ok(local);
        }
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        if let Some(base_url) = &self.weights_url {
            if is_plain_file_name(name) {
                return fetch_weights(base_url, name, &local).map(|_| local);
            }
        }
        Err(EngineLoadError::WeightsNotFound {
            name: name.to_string(),
            searched: dir,
        })
    }

    #[cfg(feature = "backend-tract")]
    fn load_yolo(&self, name: &str) -> Result<Arc<dyn Engine>, EngineLoadError> {
        let path = self.resolve_weights(YOLO_ENGINE, name)?;
        let engine = crate::detect::backends::YoloEngine::load(&path, self.input_size())?;
        Ok(Arc::new(engine))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn load_yolo(&self, _name: &str) -> Result<Arc<dyn Engine>, EngineLoadError> {
        Err(EngineLoadError::BackendUnavailable("tract-onnx"))
    }
}

impl EngineLoader for DefaultEngineLoader {
    fn load(&self, descriptor: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
        match descriptor.engine_kind.as_str() {
            YOLO_ENGINE => self.load_yolo(&descriptor.model_name),
            other => Err(EngineLoadError::UnknownEngine(other.to_string())),
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

#[cfg(feature = "fetch-weights")]
fn fetch_weights(base_url: &str, name: &str, dest: &Path) -> Result<(), EngineLoadError> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
    let fail = |message: String| EngineLoadError::Fetch {
        url: url.clone(),
        message,
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
    }
    log::info!("fetching weights {} -> {}", url, dest.display());
    let response = ureq::get(&url).call().map_err(|e| fail(e.to_string()))?;
    let partial = dest.with_extension("part");
    let mut file = std::fs::File::create(&partial).map_err(|e| fail(e.to_string()))?;
    std::io::copy(&mut response.into_reader(), &mut file).map_err(|e| fail(e.to_string()))?;
    std::fs::rename(&partial, dest).map_err(|e| fail(e.to_string()))?;
    Ok(())
}

#[cfg(not(feature = "fetch-weights"))]
fn fetch_weights(base_url: &str, name: &str, _dest: &Path) -> Result<(), EngineLoadError> {
    Err(EngineLoadError::Fetch {
        url: format!("{}/{}", base_url.trim_end_matches('/'), name),
        message: "built without the fetch-weights feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_engine_kind_is_rejected() {
        let loader = DefaultEngineLoader::new("/nonexistent", 640);
        let err = loader
            .load(&EngineDescriptor::new("tensorflow", "ssd"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "UnknownEngine");
    }

    #[test]
    fn resolves_weights_from_models_dir_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("yolo")).unwrap();
        let weights = dir.path().join("yolo").join("m1.onnx");
        std::fs::write(&weights, b"onnx").unwrap();

        let loader = DefaultEngineLoader::new(dir.path(), 640);
        assert_eq!(loader.resolve_weights("yolo", "m1.onnx").unwrap(), weights);
    }

    #[test]
    fn missing_weights_without_fetch_url() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DefaultEngineLoader::new(dir.path(), 640);
        let err = loader.resolve_weights("yolo", "absent.onnx").unwrap_err();
        assert!(matches!(err, EngineLoadError::WeightsNotFound { .. }));
        assert!(err.to_string().contains("absent.onnx"));
    }

    #[cfg(not(feature = "fetch-weights"))]
    #[test]
    fn fetch_url_without_feature_reports_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DefaultEngineLoader::new(dir.path(), 640)
            .with_weights_url(Some("http://127.0.0.1:9/weights/".into()));
        let err = loader.resolve_weights("yolo", "yolo11n.onnx").unwrap_err();
        assert_eq!(err.kind(), "FetchError");
        assert!(err.to_string().contains("http://127.0.0.1:9/weights/yolo11n.onnx"));
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn yolo_without_tract_backend_is_unavailable() {
        let loader = DefaultEngineLoader::new("/nonexistent", 640);
        let err = loader
            .load(&EngineDescriptor::new("yolo", "yolo11n.onnx"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "BackendUnavailable");
    }
}
