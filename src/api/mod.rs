//! HTTP and WebSocket surface over the inference pipeline.
//!
//! The server runs on its own thread with a dedicated tokio runtime so callers stay
//! synchronous: `ApiServer::spawn` returns once the socket is bound and
//! `ApiHandle::stop` drains and joins.

mod error;
mod handlers;
mod stream;

use std::net::{SocketAddr, TcpListener};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::pipeline::InferencePipeline;

pub use error::{ApiError, ApiResult};
pub use handlers::InferQuery;
pub use stream::StreamMessage;

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared handler state. Cloning is cheap; the registry sits behind an `Arc`.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: InferencePipeline,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors_origins: vec!["*".to_string()],
        }
    }
}

pub fn router(state: ApiState, cfg: &ApiConfig) -> Router {
    let v1 = Router::new()
        .route("/infer/image", post(handlers::infer_image))
        .route("/infer/stream", get(stream::infer_stream))
        .route("/models", get(handlers::list_models))
        .route("/models/select", post(handlers::select_model))
        .route("/models/active", get(handlers::active_model))
        .route("/models/labels", get(handlers::labels))
        .route("/models/status", get(handlers::status));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        .layer(cors_layer(&cfg.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(600));
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: InferencePipeline) -> Self {
        Self {
            cfg,
            state: ApiState { pipeline },
        }
    }

    /// Bind and start serving. Bind errors surface here, not on the server thread.
    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("swiftdetect-worker")
            .build()?;
        let app = router(self.state, &self.cfg);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = std::thread::Builder::new()
            .name("swiftdetect-api".to_string())
            .spawn(move || {
                let result: Result<()> = runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await?;
                    Ok(())
                });
                if let Err(err) = result {
                    log::error!("detection api stopped: {}", err);
                }
            })?;

        log::info!("detection api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}
