//! Upload view: send a photo for emotion analysis

use crate::Route;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use brandcam::api::AnalyzeRequest;
use brandcam::client::ApiClient;
use brandcam::config::Config;
use brandcam::shared_state::AnalysisStore;
use dioxus::prelude::*;
use std::path::Path;

/// Build the analyze request for an image on disk
async fn read_request(path: &Path) -> Result<AnalyzeRequest, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Could not read {}: {e}", path.display()))?;
    let content_type = image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(AnalyzeRequest {
        file_name,
        content_type: content_type.to_string(),
        image_data: STANDARD.encode(bytes),
    })
}

#[component]
pub fn UploadImage() -> Element {
    let config = use_context::<Config>();
    let store = use_context::<AnalysisStore>();
    let mut path = use_signal(String::new);
    let mut loading = use_signal(|| false);
    let mut error = use_signal(|| None::<String>);

    let api = ApiClient::new(config.proxy_url());
    let nav = navigator();

    let upload = move |evt: FormEvent| {
        evt.prevent_default();
        let api = api.clone();
        let store = store.clone();
        async move {
            let selected = path().trim().to_string();
            if selected.is_empty() {
                error.set(Some("Choose an image file first".into()));
                return;
            }

            loading.set(true);
            error.set(None);
            let result = match read_request(Path::new(&selected)).await {
                Ok(request) => api.analyze(&request).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            loading.set(false);

            match result {
                Ok(analysis) => {
                    tracing::info!(product = %analysis.selected_product, "Analysis received");
                    store.set(analysis);
                    nav.push(Route::Analyze {});
                }
                Err(e) => {
                    tracing::warn!("Upload failed: {e}");
                    error.set(Some(e));
                }
            }
        }
    };

    rsx! {
        div { class: "min-h-screen bg-gray-900 text-white p-8",
            div { class: "max-w-2xl mx-auto",
                h1 { class: "text-3xl font-bold mb-4", "Upload Image" }
                p { class: "text-gray-400 mb-6", "Choose a photo to analyze." }

                form { class: "flex items-center gap-4", onsubmit: upload,
                    input {
                        class: "flex-1 bg-gray-800 border border-gray-700 rounded-lg p-3",
                        placeholder: "/path/to/photo.jpg",
                        value: "{path}",
                        oninput: move |e| path.set(e.value()),
                    }
                    button {
                        class: "px-6 py-3 bg-blue-600 hover:bg-blue-700 rounded-lg font-medium transition",
                        r#type: "submit",
                        disabled: loading(),
                        if loading() { "Sending..." } else { "Upload" }
                    }
                }

                if let Some(e) = error() {
                    div { class: "text-red-400 mt-4",
                        strong { "Error: " }
                        "{e}"
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_carries_name_type_and_bare_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let request = read_request(&path).await.unwrap();
        assert_eq!(request.file_name, "face.png");
        assert_eq!(request.content_type, "image/png");
        assert_eq!(request.image_data, "AQID");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = read_request(Path::new("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        assert!(err.contains("Could not read"));
    }
}
