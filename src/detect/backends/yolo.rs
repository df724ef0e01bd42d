//! Decoding of YOLO (v8/v11 export) output tensors.
//!
//! The head emits `[1, 4 + classes, candidates]`: rows 0..4 are `cx, cy, w, h` in
//! model-input pixels, the remaining rows are per-class scores.

use std::collections::BTreeSet;

use crate::detect::engine::label_for;
use crate::detect::result::{BoundingBox, Detection};

pub const DEFAULT_CONFIDENCE: f32 = 0.15;
pub const DEFAULT_IOU: f32 = 0.45;
/// Upper bound on boxes kept after NMS.
pub const MAX_DETECTIONS: usize = 300;

#[derive(Clone, Debug)]
pub struct DecodeParams<'a> {
    pub confidence: f32,
    pub iou: f32,
    pub classes: Option<&'a BTreeSet<usize>>,
    /// Multipliers from model-input pixels back to source-image pixels.
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Turn a raw head tensor into scored, NMS-filtered detections, best first.
pub fn decode(
    data: &[f32],
    shape: &[usize],
    labels: &[String],
    params: &DecodeParams<'_>,
) -> Result<Vec<Detection>, String> {
    let (rows, candidates) = match shape {
        [1, rows, candidates] if *rows > 4 => (*rows, *candidates),
        _ => return Err(format!("unexpected output shape {:?}", shape)),
    };
    if data.len() != rows * candidates {
        return Err(format!(
            "output holds {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * candidates
        ));
    }
    let at = |row: usize, i: usize| data[row * candidates + i];

    let mut found = Vec::new();
    for i in 0..candidates {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, i)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score <= params.confidence {
            continue;
        }
        if let Some(allowed) = params.classes {
            if !allowed.contains(&class_id) {
                continue;
            }
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }
        found.push(Detection {
            class_id,
            label: label_for(labels, class_id),
            score,
            bbox: BoundingBox::from_corners(
                (cx - w / 2.0) * params.scale_x,
                (cy - h / 2.0) * params.scale_y,
                (cx + w / 2.0) * params.scale_x,
                (cy + h / 2.0) * params.scale_y,
            ),
        });
    }

    found.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(non_max_suppression(found, params.iou))
}

/// Greedy class-wise NMS over detections already sorted by descending score.
fn non_max_suppression(sorted: Vec<Detection>, iou: f32) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::new();
    for det in sorted {
        if kept.len() >= MAX_DETECTIONS {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}
