use image::RgbImage;

use crate::detect::error::EngineRuntimeError;
use crate::detect::result::{DetectionBatch, EngineParams};

/// Opaque diagnostic map returned by `Engine::describe`.
pub type EngineInfo = serde_json::Map<String, serde_json::Value>;

/// What an engine is asked to look at.
///
/// `Dims` is used when the caller's bytes could not be decoded; only engines that do
/// not need pixels (the synthetic engine) can serve it.
#[derive(Clone, Copy, Debug)]
pub enum EngineInput<'a> {
    Image(&'a RgbImage),
    Dims { width: u32, height: u32 },
}

impl EngineInput<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            EngineInput::Image(img) => img.dimensions(),
            EngineInput::Dims { width, height } => (*width, *height),
        }
    }
}

/// Detection engine capability.
///
/// Engines are shared across request tasks behind an `Arc` and invoked outside the
/// registry lock, so `infer` takes `&self`. An engine must not let a backend panic or
/// error escape `infer` other than as an `EngineRuntimeError`.
pub trait Engine: Send + Sync {
    /// Implementation name, reported as `impl` in registry status.
    fn name(&self) -> &'static str;

    /// Class names indexed by class id. Empty when the backend exposes none.
    fn labels(&self) -> &[String] {
        &[]
    }

    /// Run detection on one frame.
    fn infer(
        &self,
        input: EngineInput<'_>,
        params: &EngineParams,
    ) -> Result<DetectionBatch, EngineRuntimeError>;

    /// Optional diagnostic snapshot.
    fn describe(&self) -> Result<Option<EngineInfo>, EngineRuntimeError> {
        Ok(None)
    }
}

/// Label for `class_id`, or the decimal id when the backend reports a class outside
/// its label set.
pub fn label_for(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| class_id.to_string())
}
