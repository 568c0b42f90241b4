//! Detect view: live camera canvas that hands off to upload once the logo
//! is spotted

use crate::components::{use_render_surface, SurfaceView};
use crate::Route;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use brandcam::client::ApiClient;
use brandcam::config::Config;
use brandcam::detect::{DetectionClient, DetectionFlow};
use brandcam::render::{SurfaceConfig, SurfaceHandles};
use dioxus::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[component]
pub fn Detect() -> Element {
    let mut started = use_signal(|| false);

    rsx! {
        div { class: "min-h-screen bg-gray-900 text-white p-8 flex flex-col items-center",
            h1 { class: "text-3xl font-bold mb-8", "Logo Detection" }
            if started() {
                DetectionCanvas {}
            } else {
                button {
                    class: "px-6 py-3 bg-blue-600 hover:bg-blue-700 rounded-lg font-medium transition",
                    onclick: move |_| started.set(true),
                    "Start"
                }
            }
        }
    }
}

/// Read an image file into a data URI for an `img` element
fn overlay_source(path: &Path) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read logo overlay {path:?}: {e}");
            return None;
        }
    };
    let format = image::guess_format(&bytes).ok()?;
    Some(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

#[component]
fn DetectionCanvas() -> Element {
    let config = use_context::<Config>();
    let detected = use_hook(|| Arc::new(AtomicBool::new(false)));
    let overlay = use_hook(|| config.logo_overlay.as_deref().and_then(overlay_source));

    let canvas = use_render_surface(
        SurfaceConfig {
            width: config.canvas_width,
            height: config.canvas_height,
            preserve_output_buffer: true,
            use_live_background: true,
            ..Default::default()
        },
        {
            let detected = detected.clone();
            let client = DetectionClient::new(ApiClient::new(config.proxy_url()));
            let sampler = config.sampler_config();
            move |handles: &SurfaceHandles| {
                let flow = DetectionFlow::start(handles, client, sampler, move |_seq| {
                    detected.store(true, Ordering::SeqCst);
                });
                Some(flow.into_cleanup())
            }
        },
    );

    let nav = navigator();
    use_future(move || {
        let detected = detected.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if detected.load(Ordering::SeqCst) {
                    nav.push(Route::UploadImage {});
                    break;
                }
            }
        }
    });

    rsx! {
        SurfaceView {
            canvas,
            style: format!("width: {}px; height: {}px;", config.canvas_width, config.canvas_height),
            if let Some(src) = overlay {
                img {
                    class: "absolute inset-0 w-full h-full pointer-events-none",
                    style: "object-fit: contain; opacity: 0.2;",
                    src: "{src}",
                }
            }
        }
    }
}
