#![cfg(feature = "backend-tract")]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backends::yolo::{self, DecodeParams};
use crate::detect::engine::{Engine, EngineInfo, EngineInput};
use crate::detect::error::{EngineLoadError, EngineRuntimeError};
use crate::detect::result::{Detection, DetectionBatch, EngineParams};

/// YOLO detector running exported ONNX weights through tract.
///
/// Frames are stretch-resized to a square model input. Weights are read once at
/// construction; `infer` only touches the prepared plan.
pub struct YoloEngine {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    weights_path: PathBuf,
}

impl YoloEngine {
    /// Load an ONNX model from disk and prepare it for `input_size`x`input_size` input.
    pub fn load(weights_path: &Path, input_size: u32) -> Result<Self, EngineLoadError> {
        let onnx = tract_onnx::onnx();
        let proto = onnx.proto_model_for_path(weights_path).map_err(|e| {
            EngineLoadError::Model(format!(
                "failed to read ONNX model from {}: {:#}",
                weights_path.display(),
                e
            ))
        })?;
        let labels = sidecar_labels(weights_path)
            .or_else(|| {
                proto
                    .metadata_props
                    .iter()
                    .find(|prop| prop.key == "names")
                    .and_then(|prop| parse_names_metadata(&prop.value))
            })
            .unwrap_or_default();

        let side = input_size as usize;
        let model = onnx
            .model_for_proto_model(&proto)
            .and_then(|m| {
                m.with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
                )
            })
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| EngineLoadError::Model(format!("{:#}", e)))?;

        log::info!(
            "loaded yolo weights {} ({} labels, input {}px)",
            weights_path.display(),
            labels.len(),
            input_size
        );
        Ok(Self {
            model,
            input_size,
            labels,
            weights_path: weights_path.to_path_buf(),
        })
    }

    fn build_input(&self, rgb: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(rgb, side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn extract(
        &self,
        outputs: &TVec<TValue>,
        source: (u32, u32),
        params: &EngineParams,
    ) -> Result<Vec<Detection>, String> {
        let output = outputs
            .first()
            .ok_or_else(|| "model produced no outputs".to_string())?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| format!("model output tensor was not f32: {:#}", e))?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        let side = self.input_size as f32;
        yolo::decode(
            &data,
            &shape,
            &self.labels,
            &DecodeParams {
                confidence: params
                    .confidence_threshold
                    .unwrap_or(yolo::DEFAULT_CONFIDENCE),
                iou: params.iou_threshold.unwrap_or(yolo::DEFAULT_IOU),
                classes: params.classes.as_ref(),
                scale_x: source.0 as f32 / side,
                scale_y: source.1 as f32 / side,
            },
        )
    }
}

impl Engine for YoloEngine {
    fn name(&self) -> &'static str {
        "YoloEngine"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(
        &self,
        input: EngineInput<'_>,
        params: &EngineParams,
    ) -> Result<DetectionBatch, EngineRuntimeError> {
        let started = Instant::now();
        let EngineInput::Image(rgb) = input else {
            return Err(EngineRuntimeError::MissingPixels(self.name()));
        };

        let tensor = self.build_input(rgb);
        let outputs = catch_unwind(AssertUnwindSafe(|| self.model.run(tvec!(tensor.into()))))
            .map_err(|_| EngineRuntimeError::Inference("tract panicked during run".into()))?
            .map_err(|e| EngineRuntimeError::Inference(format!("{:#}", e)))?;

        let detections = match self.extract(&outputs, rgb.dimensions(), params) {
            Ok(detections) => detections,
            Err(message) => {
                log::warn!("yolo result extraction failed, returning no detections: {}", message);
                Vec::new()
            }
        };

        Ok(DetectionBatch {
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            detections,
        })
    }

    fn describe(&self) -> Result<Option<EngineInfo>, EngineRuntimeError> {
        let mut info = EngineInfo::new();
        info.insert(
            "weights_path".into(),
            self.weights_path.display().to_string().into(),
        );
        info.insert("labels".into(), self.labels.len().into());
        info.insert("input_size".into(), self.input_size.into());
        info.insert("runtime".into(), "tract-onnx".into());
        Ok(Some(info))
    }
}

/// Labels from `<weights>.labels`, one class name per line.
fn sidecar_labels(weights_path: &Path) -> Option<Vec<String>> {
    let raw = std::fs::read_to_string(weights_path.with_extension("labels")).ok()?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    (!labels.is_empty()).then_some(labels)
}

/// Upper bound on class ids accepted from model metadata.
const MAX_METADATA_CLASSES: usize = 10_000;

/// Parse the exporter's `names` metadata, e.g. `{0: 'person', 1: 'bicycle'}`.
pub(crate) fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut pairs = Vec::new();
    for entry in body.split(',') {
        let Some((id, name)) = entry.split_once(':') else {
            continue;
        };
        let Ok(id) = id.trim().parse::<usize>() else {
            continue;
        };
        let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
        pairs.push((id, name.to_string()));
    }
    let max_id = pairs.iter().map(|(id, _)| *id).max()?;
    if max_id >= MAX_METADATA_CLASSES {
        log::warn!("ignoring names metadata with class id {}", max_id);
        return None;
    }
    let len = max_id + 1;
    let mut labels: Vec<String> = (0..len).map(|id| id.to_string()).collect();
    for (id, name) in pairs {
        labels[id] = name;
    }
    Some(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exporter_names() {
        let labels = parse_names_metadata("{0: 'person', 1: 'bicycle', 3: \"car\"}").unwrap();
        assert_eq!(labels, vec!["person", "bicycle", "2", "car"]);
        assert!(parse_names_metadata("not a dict").is_none());
    }

    #[test]
    fn rejects_out_of_range_class_ids() {
        assert!(parse_names_metadata("{999999999999: 'x'}").is_none());
        assert!(parse_names_metadata(&format!("{{{}: 'x'}}", usize::MAX)).is_none());
        assert!(parse_names_metadata("{0: 'a', 10000: 'b'}").is_none());
        assert_eq!(parse_names_metadata("{9999: 'b'}").unwrap().len(), 10_000);
    }

    #[test]
    fn missing_weights_is_a_model_error() {
        let err = YoloEngine::load(Path::new("/nonexistent/yolo.onnx"), 640)
            .err()
            .unwrap();
        assert_eq!(err.kind(), "ModelError");
    }
}
