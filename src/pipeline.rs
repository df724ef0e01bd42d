//! Inference request pipeline.
//!
//! Every request (or streamed frame) goes decode -> capture active engine -> infer ->
//! filter -> shape. No step can fail the request: bad input degrades to the synthetic
//! liveness box, engine failures degrade to an empty batch, and stale class names are
//! dropped. What was recovered is reported in `InferenceReport::recovered`.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::detect::{
    ClassFilter, DetectError, Detection, DetectionBatch, EngineInput, EngineParams,
    EngineRegistry, EngineRuntimeError, InferenceParams,
};

/// Frame size assumed when input bytes cannot be decoded.
pub const DEFAULT_PLACEHOLDER: (u32, u32) = (640, 480);

/// A batch plus the degradations that produced it.
#[derive(Debug)]
pub struct InferenceReport {
    pub batch: DetectionBatch,
    pub recovered: Vec<DetectError>,
}

#[derive(Clone)]
pub struct InferencePipeline {
    registry: Arc<EngineRegistry>,
    placeholder: (u32, u32),
}

impl InferencePipeline {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self {
            registry,
            placeholder: DEFAULT_PLACEHOLDER,
        }
    }

    pub fn with_placeholder(mut self, width: u32, height: u32) -> Self {
        self.placeholder = (width, height);
        self
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Run one frame and return only the batch.
    pub fn run_inference(&self, raw: &[u8], params: &InferenceParams) -> DetectionBatch {
        self.run(raw, params).batch
    }

    pub fn run(&self, raw: &[u8], params: &InferenceParams) -> InferenceReport {
        let started = Instant::now();
        let mut recovered = Vec::new();
        let active = self.registry.active_engine();

        let image = match decode_image(raw) {
            Ok(image) => Some(image),
            Err(err) => {
                log::debug!("{}; serving liveness box", err);
                recovered.push(err);
                None
            }
        };
        // Undecodable frames go to the synthetic engine: real engines need pixels.
        let (engine, input) = match &image {
            Some(image) => (active.engine.clone(), EngineInput::Image(image)),
            None => (
                self.registry.synthetic_engine(),
                EngineInput::Dims {
                    width: self.placeholder.0,
                    height: self.placeholder.1,
                },
            ),
        };
        let frame = input.dimensions();

        // The active label set says nothing about the liveness box, so it skips the
        // class allow-list.
        let classes = match &image {
            Some(_) => resolve_classes(
                params.class_filter.as_ref(),
                &active.selection.labels,
                &mut recovered,
            ),
            None => None,
        };
        let engine_params = EngineParams {
            confidence_threshold: params.confidence_threshold,
            iou_threshold: params.iou_threshold,
            classes,
        };

        let raw_batch = match catch_unwind(AssertUnwindSafe(|| engine.infer(input, &engine_params))) {
            Ok(Ok(batch)) => batch,
            Ok(Err(err)) => {
                log::warn!("engine {} failed, returning empty batch: {}", engine.name(), err);
                recovered.push(err.into());
                DetectionBatch::empty()
            }
            Err(_) => {
                log::warn!("engine {} panicked, returning empty batch", engine.name());
                recovered.push(
                    EngineRuntimeError::Inference(format!("{} panicked", engine.name())).into(),
                );
                DetectionBatch::empty()
            }
        };

        let detections = post_filter(
            raw_batch.detections,
            engine_params.classes.as_ref(),
            params.min_area_ratio,
            params.max_results,
            frame,
        );

        let wall_ms = started.elapsed().as_secs_f64() * 1000.0;
        // A zero reading is treated as "unmeasured" and the engine's own time is used.
        let elapsed_ms = if wall_ms > 0.0 {
            wall_ms
        } else {
            raw_batch.elapsed_ms
        };

        InferenceReport {
            batch: DetectionBatch {
                elapsed_ms,
                detections,
            },
            recovered,
        }
    }
}

fn decode_image(raw: &[u8]) -> Result<RgbImage, DetectError> {
    image::load_from_memory(raw)
        .map(|img| img.to_rgb8())
        .map_err(|e| DetectError::Decode(e.to_string()))
}

/// Resolve a caller filter to class ids. Unknown names are dropped and recorded; an
/// empty result means no filtering.
fn resolve_classes(
    filter: Option<&ClassFilter>,
    labels: &[String],
    recovered: &mut Vec<DetectError>,
) -> Option<BTreeSet<usize>> {
    let ids = match filter? {
        ClassFilter::Ids(ids) => ids.clone(),
        ClassFilter::Names(names) => {
            let mut ids = BTreeSet::new();
            let mut unknown = Vec::new();
            for name in names {
                let matches: Vec<usize> = labels
                    .iter()
                    .enumerate()
                    .filter(|(_, label)| *label == name)
                    .map(|(id, _)| id)
                    .collect();
                if matches.is_empty() {
                    unknown.push(name.clone());
                }
                ids.extend(matches);
            }
            if !unknown.is_empty() {
                recovered.push(DetectError::UnknownFilter(unknown));
            }
            ids
        }
    };
    (!ids.is_empty()).then_some(ids)
}

/// Class allow-list, then area ratio, then cap. Order of survivors is untouched.
pub(crate) fn post_filter(
    detections: Vec<Detection>,
    classes: Option<&BTreeSet<usize>>,
    min_area_ratio: Option<f32>,
    max_results: Option<usize>,
    frame: (u32, u32),
) -> Vec<Detection> {
    let frame_area = frame.0 as f32 * frame.1 as f32;
    let min_pixels = min_area_ratio.filter(|r| *r > 0.0).map(|r| r * frame_area);

    let filtered = detections
        .into_iter()
        .filter(|d| classes.map_or(true, |allowed| allowed.contains(&d.class_id)))
        .filter(|d| min_pixels.map_or(true, |min| d.bbox.area() >= min));

    match max_results.filter(|n| *n > 0) {
        Some(n) => filtered.take(n).collect(),
        None => filtered.collect(),
    }
}
