//! Async HTTP client for the detect, analyze, and asset endpoints

use crate::api::{AnalysisResponse, AnalyzeRequest, DetectRequest, DetectResponse, ErrorBody};
use crate::error::ClientError;

/// Thin wrapper over `reqwest` bound to one base URL (the local proxy or
/// the backend itself)
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST `/detect`; `image_data` is sent exactly as given
    pub async fn detect(&self, image_data: &str) -> Result<bool, ClientError> {
        let body = DetectRequest {
            image_data: image_data.to_string(),
        };
        let resp = self.http.post(self.url("detect")).json(&body).send().await?;
        let resp = check_status(resp).await?;

        let bytes = resp.bytes().await?;
        let parsed: DetectResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.logo_detected)
    }

    /// POST `/analyze`
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("analyze"))
            .json(request)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET `/fbx?product=<file_name>`, returning the raw asset bytes
    pub async fn fetch_asset(&self, file_name: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self
            .http
            .get(self.url("fbx"))
            .query(&[("product", file_name)])
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(resp.bytes().await?.to_vec())
    }
}

/// Turn a non-2xx response into `ClientError::Status`, preferring the
/// `error` field of a JSON error body as the message
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.bytes().await.unwrap_or_default();
    let message = match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(err) => err.error,
        Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("").to_string(),
        Err(_) => String::from_utf8_lossy(&body).into_owned(),
    };

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::EmotionAnalysis;
    use crate::test_support::{spawn_backend, test_client};
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[tokio::test]
    async fn detect_sends_payload_and_reads_verdict() {
        let app = Router::new().route(
            "/detect",
            post(|Json(req): Json<DetectRequest>| async move {
                Json(DetectResponse {
                    logo_detected: req.image_data == "AAAA",
                })
            }),
        );
        let client = test_client(spawn_backend(app).await);

        assert!(client.detect("AAAA").await.unwrap());
        assert!(!client.detect("BBBB").await.unwrap());
    }

    #[tokio::test]
    async fn analyze_returns_parsed_result() {
        let app = Router::new().route(
            "/analyze",
            post(|Json(req): Json<AnalyzeRequest>| async move {
                Json(AnalysisResponse {
                    selected_product: format!("for-{}", req.file_name),
                    analysis: EmotionAnalysis {
                        dominant_emotion: "happy".into(),
                        emotions: [("happy".to_string(), 91.5)].into_iter().collect(),
                    },
                })
            }),
        );
        let client = test_client(spawn_backend(app).await);

        let result = client
            .analyze(&AnalyzeRequest {
                file_name: "face.jpg".into(),
                content_type: "image/jpeg".into(),
                image_data: "AAAA".into(),
            })
            .await
            .unwrap();

        assert_eq!(result.selected_product, "for-face.jpg");
        assert_eq!(result.analysis.emotions["happy"], 91.5);
    }

    #[tokio::test]
    async fn error_body_becomes_status_error() {
        let app = Router::new().route(
            "/analyze",
            post(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ErrorBody::new("no face found")),
                )
            }),
        );
        let client = test_client(spawn_backend(app).await);

        let err = client
            .analyze(&AnalyzeRequest {
                file_name: "x.png".into(),
                content_type: "image/png".into(),
                image_data: "AAAA".into(),
            })
            .await
            .unwrap_err();

        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "no face found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_asset_encodes_product_query() {
        let app = Router::new().route(
            "/fbx",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                q.get("product").cloned().unwrap_or_default().into_bytes()
            }),
        );
        let client = test_client(format!("{}/", spawn_backend(app).await));

        let body = client.fetch_asset("my chair&co.fbx").await.unwrap();
        assert_eq!(body, b"my chair&co.fbx");
    }

    #[tokio::test]
    async fn malformed_json_is_decode_error() {
        let app = Router::new().route("/detect", post(|| async { "not json" }));
        let client = test_client(spawn_backend(app).await);

        assert!(matches!(
            client.detect("AAAA").await,
            Err(ClientError::Decode(_))
        ));
    }
}
