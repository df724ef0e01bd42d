use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::engine::{Engine, EngineInput};
use crate::detect::error::EngineRuntimeError;
use crate::detect::result::{BoundingBox, Detection, DetectionBatch, EngineParams};

/// Side of the box relative to the shorter frame edge.
const BOX_SCALE: f32 = 0.3;
/// Horizontal and vertical speed in pixels per second.
const SPEED_X: f64 = 120.0;
const SPEED_Y: f64 = 90.0;
const SCORE: f32 = 0.9;
const REPORTED_MS: f64 = 1.0;

/// Synthetic engine: one square box drifting across the frame.
///
/// Needs no pixels and never fails, which makes it the liveness signal and the
/// fallback whenever a real engine cannot be loaded.
pub struct SyntheticEngine {
    labels: Vec<String>,
    clock: fn() -> f64,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self {
            labels: vec!["object".to_string()],
            clock: unix_seconds,
        }
    }

    /// Pin the clock, mostly for deterministic tests.
    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "SyntheticEngine"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(
        &self,
        input: EngineInput<'_>,
        _params: &EngineParams,
    ) -> Result<DetectionBatch, EngineRuntimeError> {
        let (width, height) = input.dimensions();
        let bbox = moving_box((self.clock)(), width, height);
        Ok(DetectionBatch {
            elapsed_ms: REPORTED_MS,
            detections: vec![Detection {
                class_id: 0,
                label: self.labels[0].clone(),
                score: SCORE,
                bbox,
            }],
        })
    }
}

/// Box position at time `t` (seconds) for a `width`x`height` frame.
pub(crate) fn moving_box(t: f64, width: u32, height: u32) -> BoundingBox {
    let size = width.min(height) as f32 * BOX_SCALE;
    let span_x = (width as f64 - size as f64).max(1.0);
    let span_y = (height as f64 - size as f64).max(1.0);
    let x = (t * SPEED_X) % span_x;
    let y = (t * SPEED_Y) % span_y;
    BoundingBox::new(x as f32, y as f32, size, size)
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
