mod backends;
mod catalog;
mod engine;
mod error;
mod loader;
mod registry;
mod result;

pub use backends::yolo::{DEFAULT_CONFIDENCE, DEFAULT_IOU};
pub use backends::SyntheticEngine;
#[cfg(feature = "backend-tract")]
pub use backends::YoloEngine;
pub use catalog::{
    CatalogScanner, EngineDescriptor, DEFAULT_YOLO_HINTS, SYNTHETIC_ENGINE, SYNTHETIC_MODEL,
    YOLO_ENGINE,
};
pub use engine::{label_for, Engine, EngineInfo, EngineInput};
pub use error::{DetectError, EngineLoadError, EngineRuntimeError};
pub use loader::{DefaultEngineLoader, EngineLoader};
pub use registry::{ActiveEngine, ActiveSelection, EngineRegistry, RegistryStatus, FALLBACK_LABEL};
pub use result::{BoundingBox, ClassFilter, Detection, DetectionBatch, EngineParams, InferenceParams};
