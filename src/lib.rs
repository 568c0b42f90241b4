//! Webcam logo detection and 3D product viewer
//!
//! The desktop shell in `main.rs` drives these pieces; everything here runs
//! headless so it can be tested without a window.

pub mod api;
pub mod capture;
pub mod client;
pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod media;
pub mod model;
pub mod proxy;
pub mod render;
pub mod shared_state;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::client::ApiClient;

    /// Serve `app` on an ephemeral local port, returning its base URL
    pub async fn spawn_backend(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Client that ignores any proxy settings in the environment
    pub fn test_client(base: impl Into<String>) -> ApiClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        ApiClient::with_client(http, base)
    }
}
