use brandcam::config::Config;
use brandcam::diagnostics::init_diagnostics;
use brandcam::proxy;
use brandcam::shared_state::AnalysisStore;
use dioxus::prelude::*;
use std::net::SocketAddr;

mod components;
mod views;

use views::{Analyze, Detect, Navbar, Settings, UploadImage};

#[derive(Debug, Clone, Routable, PartialEq)]
#[rustfmt::skip]
enum Route {
    #[layout(Navbar)]
        #[route("/")]
        Detect {},
        #[route("/upload")]
        UploadImage {},
        #[route("/analyze")]
        Analyze {},
        #[route("/settings")]
        Settings {},
}

fn main() {
    let config = Config::load();
    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = init_diagnostics(&config.log_dir);
    tracing::info!(backend = %config.backend_url, proxy = %config.proxy_addr, "Brandcam starting");

    match config.proxy_addr.parse::<SocketAddr>() {
        Ok(addr) => {
            if let Err(e) = proxy::spawn_background(addr, config.backend_url.clone()) {
                tracing::error!("Failed to start proxy thread: {e}");
            }
        }
        Err(e) => tracing::error!("Invalid proxy address {:?}: {e}", config.proxy_addr),
    }

    dioxus::LaunchBuilder::new()
        .with_context(config)
        .with_context(AnalysisStore::new())
        .launch(App);
}

#[component]
fn App() -> Element {
    rsx! {
        Router::<Route> {}
    }
}
