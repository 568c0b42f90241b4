use crate::Route;
use dioxus::prelude::*;

/// Navigation bar across the detect, upload, and analyze pages
#[component]
pub fn Navbar() -> Element {
    rsx! {
        div {
            id: "navbar",
            class: "flex gap-6 px-8 py-3 bg-gray-800 text-gray-200",
            Link {
                to: Route::Detect {},
                "Detect"
            }
            Link {
                to: Route::UploadImage {},
                "Upload"
            }
            Link {
                to: Route::Analyze {},
                "Analysis"
            }
            Link {
                to: Route::Settings {},
                "Settings"
            }
        }

        Outlet::<Route> {}
    }
}
