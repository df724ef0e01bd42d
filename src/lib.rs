//! SwiftDetect
//!
//! Object detection served over HTTP and WebSocket, with the detection backend
//! switchable at runtime.
//!
//! # Architecture
//!
//! The service holds three guarantees:
//!
//! 1. **Always an engine**: a synthetic engine is always available, and any failed
//!    switch lands on it with the failure recorded.
//! 2. **Never fail a frame**: undecodable input yields a liveness box, engine errors
//!    yield an empty batch, stale class filters are dropped.
//! 3. **Consistent switches**: a request sees one engine for its whole run, and the
//!    active descriptor, labels and last error always change together.
//!
//! # Module Structure
//!
//! - `detect`: engine contract, backends, catalog scan, loader, registry
//! - `pipeline`: per-request decode, infer, filter and shape
//! - `api`: HTTP routes, the frame stream, and the server thread
//! - `config`: `detectd` configuration file plus environment overrides

pub mod api;
pub mod config;
pub mod detect;
pub mod pipeline;

pub use detect::{
    CatalogScanner, DefaultEngineLoader, Detection, DetectionBatch, EngineDescriptor,
    EngineRegistry, InferenceParams,
};
pub use pipeline::{InferencePipeline, InferenceReport};
