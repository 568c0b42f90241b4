//! Local HTTP proxy in front of the analysis backend
//!
//! Endpoints:
//! - POST /detect   - logo detection, body forwarded verbatim
//! - POST /analyze  - emotion analysis, body forwarded verbatim
//! - GET  /fbx      - product model bytes (`?product=<file>`)
//! - GET  /health   - liveness

use crate::api::DetectRequest;
use crate::error::ProxyError;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;

/// Shared proxy state: outbound client and backend base URL
#[derive(Clone, Debug)]
pub struct ProxyState {
    http: reqwest::Client,
    backend: String,
}

impl ProxyState {
    pub fn new(backend: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), backend)
    }

    pub fn with_client(http: reqwest::Client, backend: impl Into<String>) -> Self {
        Self {
            http,
            backend: backend.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.backend)
    }
}

/// Build the axum router with all endpoints.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/detect", post(detect))
        .route("/analyze", post(analyze))
        .route("/fbx", get(fbx))
        .route("/health", get(health))
        .with_state(state)
}

async fn detect(
    State(state): State<ProxyState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ProxyError> {
    let has_image = serde_json::from_value::<DetectRequest>(body.clone())
        .map(|req| !req.image_data.is_empty())
        .unwrap_or(false);
    if !has_image {
        return Err(ProxyError::BadRequest("No image data provided".into()));
    }

    let resp = state.http.post(state.url("detect")).json(&body).send().await?;
    relay(resp, "application/json").await
}

async fn analyze(
    State(state): State<ProxyState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ProxyError> {
    let resp = state.http.post(state.url("analyze")).json(&body).send().await?;
    relay(resp, "application/json").await
}

#[derive(Deserialize)]
struct FbxQuery {
    product: Option<String>,
}

async fn fbx(
    State(state): State<ProxyState>,
    Query(query): Query<FbxQuery>,
) -> Result<Response, ProxyError> {
    let product = query
        .product
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Product name is required".into()))?;

    let resp = state
        .http
        .get(state.url("fbx"))
        .query(&[("product", product.as_str())])
        .send()
        .await?;
    relay(resp, "application/octet-stream").await
}

async fn health(State(state): State<ProxyState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "backend": state.backend }))
}

/// Pass the backend's status, content type, and body through unchanged
async fn relay(resp: reqwest::Response, default_type: &str) -> Result<Response, ProxyError> {
    let status = StatusCode::from_u16(resp.status().as_u16())
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .map(|v| v.as_bytes().to_vec())
        .unwrap_or_else(|| default_type.as_bytes().to_vec());
    let body = resp.bytes().await?;

    if !status.is_success() {
        tracing::warn!(%status, "Backend returned an error");
    }

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .map_err(|e| ProxyError::Upstream(e.to_string()))
}

/// Serve the proxy on `addr` until the process exits
pub async fn serve(addr: SocketAddr, state: ProxyState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, backend = %state.backend, "Proxy listening");
    axum::serve(listener, router(state)).await
}

/// Run the proxy on its own thread and runtime, leaving the UI thread free
pub fn spawn_background(
    addr: SocketAddr,
    backend: String,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("brandcam-proxy".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to start proxy runtime: {e}");
                    return;
                }
            };
            if let Err(e) = runtime.block_on(serve(addr, ProxyState::new(backend))) {
                tracing::error!(%addr, "Proxy stopped: {e}");
            }
        })
}
