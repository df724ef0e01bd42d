//! Continuous-frame inference over a WebSocket.
//!
//! Each inbound binary message is one encoded frame; each reply is one JSON text
//! message. Closing the socket ends only this loop.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::api::handlers::{run_blocking, InferQuery};
use crate::api::ApiState;
use crate::detect::{DetectionBatch, InferenceParams};
use crate::pipeline::InferencePipeline;

/// One reply on the stream: the batch tagged with its send time.
#[derive(Debug, Serialize)]
pub struct StreamMessage {
    /// Seconds since the Unix epoch.
    pub ts: f64,
    #[serde(flatten)]
    pub batch: DetectionBatch,
}

pub async fn infer_stream(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<InferQuery>,
) -> impl IntoResponse {
    let params = query.into_params();
    ws.on_upgrade(move |socket| serve_frames(socket, state.pipeline, params))
}

async fn serve_frames(mut socket: WebSocket, pipeline: InferencePipeline, params: InferenceParams) {
    log::debug!("inference stream opened");
    let mut frames = 0u64;
    while let Some(message) = socket.recv().await {
        let data = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                log::debug!("inference stream receive failed: {}", err);
                break;
            }
        };

        let reply = frame_reply(&pipeline, data, &params).await;
        let text = match serde_json::to_string(&reply) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("failed to encode stream reply: {}", err);
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
        frames += 1;
    }
    log::debug!("inference stream closed after {} frames", frames);
}

pub(crate) async fn frame_reply(
    pipeline: &InferencePipeline,
    data: Vec<u8>,
    params: &InferenceParams,
) -> StreamMessage {
    let batch = run_blocking(pipeline.clone(), data, params.clone()).await;
    StreamMessage {
        ts: unix_seconds(),
        batch,
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::detect::{EngineRegistry, DefaultEngineLoader, EngineDescriptor};

    fn pipeline() -> InferencePipeline {
        let registry = EngineRegistry::new(Vec::new(), DefaultEngineLoader::new("/nonexistent", 640));
        registry.select(&EngineDescriptor::synthetic());
        InferencePipeline::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn garbage_frame_gets_liveness_box() {
        let reply = frame_reply(&pipeline(), b"not an image".to_vec(), &InferenceParams::default()).await;
        assert!(reply.ts > 0.0);
        assert_eq!(reply.batch.detections.len(), 1);
        assert_eq!(reply.batch.detections[0].label, "object");
    }

    #[tokio::test]
    async fn reply_flattens_batch_fields() {
        let reply = frame_reply(&pipeline(), Vec::new(), &InferenceParams::default()).await;
        let value = serde_json::to_value(&reply).unwrap();
        assert!(value["ts"].is_f64());
        assert!(value["time_ms"].is_number());
        assert!(value["detections"].is_array());
    }
}
