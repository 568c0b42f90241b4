//! Analysis result and the suggested product's model

use crate::components::ModelViewer;
use brandcam::shared_state::AnalysisStore;
use dioxus::prelude::*;

#[component]
pub fn Analyze() -> Element {
    let store = use_context::<AnalysisStore>();

    let Some(analysis) = store.get() else {
        return rsx! {
            div { class: "min-h-screen bg-gray-900 text-white p-8",
                p { "No analysis yet. Upload an image first." }
            }
        };
    };

    let pretty = serde_json::to_string_pretty(&analysis).unwrap_or_default();

    rsx! {
        div { class: "min-h-screen bg-gray-900 text-white p-8",
            h1 { class: "text-3xl font-bold mb-6", "Analysis Result" }

            h2 { class: "text-xl font-medium mb-2", "API Response" }
            pre { class: "bg-gray-800 rounded-lg p-3 mb-8 max-w-2xl overflow-x-auto text-sm",
                "{pretty}"
            }

            h2 { class: "text-xl font-medium mb-2", "3D Model Viewer" }
            ModelViewer {
                key: "{analysis.selected_product}",
                product: analysis.selected_product.clone(),
            }
        }
    }
}
