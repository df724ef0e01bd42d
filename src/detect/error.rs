use std::path::PathBuf;

use thiserror::Error;

/// Failure to construct an engine for a descriptor.
///
/// Recovered by the registry: the synthetic engine is installed and the error is
/// recorded as the selection's `last_error`.
#[derive(Debug, Error)]
pub enum EngineLoadError {
    #[error("weights for '{name}' not found (looked in {})", searched.display())]
    WeightsNotFound { name: String, searched: PathBuf },

    #[error("backend '{0}' is not compiled into this build")]
    BackendUnavailable(&'static str),

    #[error("unknown engine kind '{0}'")]
    UnknownEngine(String),

    #[error("failed to prepare model: {0}")]
    Model(String),

    #[error("failed to fetch weights from {url}: {message}")]
    Fetch { url: String, message: String },
}

impl EngineLoadError {
    /// Stable short name of the failure, used as the prefix of recorded diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineLoadError::WeightsNotFound { .. } => "WeightsNotFound",
            EngineLoadError::BackendUnavailable(_) => "BackendUnavailable",
            EngineLoadError::UnknownEngine(_) => "UnknownEngine",
            EngineLoadError::Model(_) => "ModelError",
            EngineLoadError::Fetch { .. } => "FetchError",
        }
    }

    /// `"<kind>: <message>"`, the form stored in `ActiveSelection::last_error`.
    pub fn diagnostic(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Failure during a single `infer` call. Degrades that call to an empty batch.
#[derive(Debug, Error)]
pub enum EngineRuntimeError {
    #[error("engine '{0}' needs decoded pixels")]
    MissingPixels(&'static str),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Degradations the inference pipeline recovered from.
///
/// None of these reach the caller as a failure; they are reported alongside the batch
/// so callers and tests can tell which recovery happened.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("input could not be decoded: {0}")]
    Decode(String),

    #[error(transparent)]
    EngineRuntime(#[from] EngineRuntimeError),

    #[error("class filter names not in active label set: {}", .0.join(", "))]
    UnknownFilter(Vec<String>),
}
