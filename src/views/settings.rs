//! Settings view component

use brandcam::config::{Config, RendererKind};
use dioxus::prelude::*;
use std::path::PathBuf;

fn optional_path(value: String) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// Settings page component
#[component]
pub fn Settings() -> Element {
    let mut config = use_signal(Config::load);
    let mut save_status = use_signal(String::new);

    // Save handler
    let save_config = move |_| match config().save() {
        Ok(_) => save_status.set("Settings saved. Restart to apply.".to_string()),
        Err(e) => save_status.set(format!("Error: {}", e)),
    };

    let camera_dir = config()
        .camera_dir
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let logo_overlay = config()
        .logo_overlay
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    rsx! {
        div { class: "min-h-screen bg-gray-900 text-white p-8",
            div { class: "max-w-2xl mx-auto",
                h1 { class: "text-3xl font-bold mb-8", "Settings" }

                // Backend
                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Backend URL" }
                    input {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        value: config().backend_url,
                        oninput: move |e| config.write().backend_url = e.value(),
                    }
                }

                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Proxy Address" }
                    input {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        value: config().proxy_addr,
                        oninput: move |e| config.write().proxy_addr = e.value(),
                    }
                }

                // Detection interval
                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Detection Interval" }
                    select {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        value: config().detect_interval_ms.to_string(),
                        onchange: move |e| {
                            config.write().detect_interval_ms = e.value().parse().unwrap_or(2000);
                        },
                        option { value: "1000", "Every second" }
                        option { value: "2000", "Every 2 seconds" }
                        option { value: "5000", "Every 5 seconds" }
                    }
                }

                // JPEG quality
                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2",
                        "Capture Quality: {config().jpeg_quality}"
                    }
                    input {
                        r#type: "range",
                        class: "w-full",
                        min: "50",
                        max: "100",
                        step: "1",
                        value: config().jpeg_quality.to_string(),
                        oninput: move |e| {
                            config.write().jpeg_quality = e.value().parse().unwrap_or(92);
                        }
                    }
                }

                // Renderer
                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Renderer" }
                    select {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        value: format!("{:?}", config().renderer),
                        onchange: move |e| {
                            config.write().renderer = match e.value().as_str() {
                                "Gpu" => RendererKind::Gpu,
                                _ => RendererKind::Software,
                            };
                        },
                        option { value: "Software", "Software" }
                        option { value: "Gpu", "GPU (wgpu)" }
                    }
                }

                // Camera
                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Camera Frames Folder" }
                    input {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        placeholder: "Use webcam",
                        value: camera_dir,
                        oninput: move |e| config.write().camera_dir = optional_path(e.value()),
                    }
                }

                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Webcam Index" }
                    input {
                        r#type: "number",
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        min: "0",
                        value: config().camera_index.to_string(),
                        oninput: move |e| config.write().camera_index = e.value().parse().unwrap_or(0),
                    }
                }

                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Camera Frame Rate" }
                    select {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        value: config().camera_fps.to_string(),
                        onchange: move |e| {
                            config.write().camera_fps = e.value().parse().unwrap_or(30);
                        },
                        option { value: "15", "15 FPS" }
                        option { value: "30", "30 FPS" }
                        option { value: "60", "60 FPS" }
                    }
                }

                div { class: "mb-6",
                    label { class: "block text-sm font-medium mb-2", "Logo Overlay Image" }
                    input {
                        class: "w-full bg-gray-800 border border-gray-700 rounded-lg p-3",
                        placeholder: "None",
                        value: logo_overlay,
                        oninput: move |e| config.write().logo_overlay = optional_path(e.value()),
                    }
                }

                // Log folder
                div { class: "mb-8",
                    label { class: "block text-sm font-medium mb-2", "Log Folder" }
                    div { class: "bg-gray-800 border border-gray-700 rounded-lg p-3 text-sm text-gray-400 truncate",
                        "{config().log_dir.display()}"
                    }
                }

                // Save button
                div { class: "flex items-center gap-4",
                    button {
                        class: "px-6 py-3 bg-blue-600 hover:bg-blue-700 rounded-lg font-medium transition",
                        onclick: save_config,
                        "Save Settings"
                    }
                    span { class: "text-green-400", "{save_status}" }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_path_means_none() {
        assert_eq!(optional_path("   ".into()), None);
        assert_eq!(optional_path(" /tmp/f ".into()), Some(PathBuf::from("/tmp/f")));
    }
}
