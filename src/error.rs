//! Error types for the capture, render, and network paths

use thiserror::Error;

/// Failure acquiring or driving a camera feed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device available")]
    NotFound,
    #[error("camera device error: {0}")]
    Device(String),
}

/// Failure in the render surface or its output
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("container already hosts surface {0}")]
    ContainerBusy(u64),
    #[error("output surface has been disposed")]
    Disposed,
    #[error("output buffer is not preserved between frames")]
    BufferNotPreserved,
    #[error("nothing has been rendered yet")]
    NoFrame,
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("gpu error: {0}")]
    Gpu(String),
}

/// Failure talking to the backend (directly or through the proxy)
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure decoding an FBX asset
#[derive(Debug, Error)]
pub enum FbxError {
    #[error("not a binary FBX file")]
    BadMagic,
    #[error("ASCII FBX is not supported")]
    AsciiUnsupported,
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("invalid record at offset {offset}: {reason}")]
    InvalidRecord { offset: usize, reason: String },
    #[error("unknown property type {0:?}")]
    UnknownProperty(char),
    #[error("unsupported array encoding {0}")]
    UnsupportedEncoding(u32),
    #[error("array decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("no mesh geometry found")]
    NoGeometry,
    #[error("geometry {geometry}: {reason}")]
    BadGeometry { geometry: String, reason: String },
}

/// Failure loading a product model into a surface
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model fetch failed: {0}")]
    Fetch(#[from] ClientError),
    #[error("model parse failed: {0}")]
    Parse(#[from] FbxError),
    #[error("model load superseded by a newer request")]
    Stale,
    #[error("model worker failed: {0}")]
    Worker(String),
}

/// Failure answering a proxy request; rendered as `{ "error": ... }`
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> axum::http::StatusCode {
        match self {
            ProxyError::BadRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Upstream(e.to_string())
    }
}

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let body = crate::api::ErrorBody::new(self.to_string());
        (self.status(), axum::Json(body)).into_response()
    }
}
