use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::detect::{
    ClassFilter, DetectionBatch, EngineDescriptor, InferenceParams, RegistryStatus,
};
use crate::pipeline::InferencePipeline;

/// Query parameters shared by the image and stream endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct InferQuery {
    pub conf: Option<f32>,
    pub iou: Option<f32>,
    pub max_results: Option<usize>,
    /// Comma-separated label names.
    pub include_classes: Option<String>,
    pub min_area_ratio: Option<f32>,
}

impl InferQuery {
    pub fn into_params(self) -> InferenceParams {
        InferenceParams {
            confidence_threshold: self.conf,
            iou_threshold: self.iou,
            max_results: self.max_results,
            class_filter: self
                .include_classes
                .as_deref()
                .and_then(ClassFilter::from_csv),
            min_area_ratio: self.min_area_ratio,
        }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn infer_image(
    State(state): State<ApiState>,
    Query(query): Query<InferQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<DetectionBatch>> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::bad_request("multipart field 'file' is required"))?;

    let batch = run_blocking(state.pipeline.clone(), upload, query.into_params()).await;
    Ok(Json(batch))
}

pub async fn list_models(State(state): State<ApiState>) -> Json<Vec<EngineDescriptor>> {
    Json(state.pipeline.registry().list_available().to_vec())
}

/// Switch engines. Always answers with whatever ended up active, which is the
/// synthetic engine when the requested one failed to load.
pub async fn select_model(
    State(state): State<ApiState>,
    Json(requested): Json<EngineDescriptor>,
) -> ApiResult<Json<EngineDescriptor>> {
    let registry = state.pipeline.registry().clone();
    let selection = tokio::task::spawn_blocking(move || registry.select(&requested))
        .await
        .map_err(|e| ApiError::Internal(format!("model switch task failed: {}", e)))?;
    Ok(Json(selection.descriptor))
}

pub async fn active_model(State(state): State<ApiState>) -> Json<EngineDescriptor> {
    Json(state.pipeline.registry().active().descriptor)
}

pub async fn labels(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.pipeline.registry().labels())
}

pub async fn status(State(state): State<ApiState>) -> Json<RegistryStatus> {
    Json(state.pipeline.registry().status())
}

/// Run the pipeline on the blocking pool. A lost task degrades like an engine failure.
pub(crate) async fn run_blocking<B>(
    pipeline: InferencePipeline,
    data: B,
    params: InferenceParams,
) -> DetectionBatch
where
    B: AsRef<[u8]> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || pipeline.run_inference(data.as_ref(), &params)).await
    {
        Ok(batch) => batch,
        Err(err) => {
            log::warn!("inference task did not complete: {}", err);
            DetectionBatch::empty()
        }
    }
}
