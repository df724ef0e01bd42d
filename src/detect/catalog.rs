use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const SYNTHETIC_ENGINE: &str = "synthetic";
pub const SYNTHETIC_MODEL: &str = "moving_box";
pub const YOLO_ENGINE: &str = "yolo";

/// Well-known YOLO exports offered even when not on disk yet.
pub const DEFAULT_YOLO_HINTS: &[&str] = &[
    "yolo11n.onnx",
    "yolo11s.onnx",
    "yolov8n.onnx",
    "yolov8s.onnx",
];

/// A selectable `(engine, model)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineDescriptor {
    #[serde(rename = "engine")]
    pub engine_kind: String,
    #[serde(rename = "name")]
    pub model_name: String,
}

impl EngineDescriptor {
    pub fn new(engine_kind: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            engine_kind: engine_kind.into(),
            model_name: model_name.into(),
        }
    }

    pub fn synthetic() -> Self {
        Self::new(SYNTHETIC_ENGINE, SYNTHETIC_MODEL)
    }

    pub fn is_synthetic(&self) -> bool {
        self.engine_kind == SYNTHETIC_ENGINE
    }
}

impl fmt::Display for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.engine_kind, self.model_name)
    }
}

/// Where on disk models for an engine kind live, relative to the models dir.
struct ModelLocation {
    engine_kind: &'static str,
    subdir: &'static str,
    extension: &'static str,
}

const MODEL_LOCATIONS: &[ModelLocation] = &[ModelLocation {
    engine_kind: YOLO_ENGINE,
    subdir: "yolo",
    extension: "onnx",
}];

/// Enumerates selectable engines. Only ever reads the filesystem.
#[derive(Clone, Debug)]
pub struct CatalogScanner {
    models_dir: PathBuf,
    hints: Vec<String>,
}

impl CatalogScanner {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            hints: DEFAULT_YOLO_HINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the well-known YOLO hints.
    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Hints first, then discovered models, then the synthetic engine.
    ///
    /// First occurrence of a pair wins and order is preserved.
    pub fn scan(&self) -> Vec<EngineDescriptor> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |desc: EngineDescriptor| {
            if seen.insert(desc.clone()) {
                out.push(desc);
            }
        };

        for hint in &self.hints {
            push(EngineDescriptor::new(YOLO_ENGINE, hint.as_str()));
        }
        for location in MODEL_LOCATIONS {
            let dir = self.models_dir.join(location.subdir);
            for name in model_files(&dir, location.extension) {
                push(EngineDescriptor::new(location.engine_kind, name));
            }
        }
        push(EngineDescriptor::synthetic());

        log::debug!(
            "catalog scan of {} found {} engines",
            self.models_dir.display(),
            out.len()
        );
        out
    }
}

/// File names with `extension` directly inside `dir`, sorted. Missing dir is empty.
fn model_files(dir: &Path, extension: &str) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("skipping model dir {}: {}", dir.display(), err);
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}
