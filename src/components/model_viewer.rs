//! Product model turning over the live camera background

use super::{use_render_surface, SurfaceView};
use brandcam::client::ApiClient;
use brandcam::config::Config;
use brandcam::error::LoadError;
use brandcam::model::{LoadState, ModelLoader};
use brandcam::render::{SurfaceConfig, SurfaceHandles};
use dioxus::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

/// The loader bound to `handles`, reusing the one in `slot` while it still
/// draws into the same surface
fn bind_loader(
    slot: &mut Option<ModelLoader>,
    handles: &SurfaceHandles,
    api: impl FnOnce() -> ApiClient,
) -> ModelLoader {
    match slot {
        Some(loader) if loader.surface_id() == handles.id() => loader.clone(),
        _ => {
            let loader = ModelLoader::new(api(), handles);
            *slot = Some(loader.clone());
            loader
        }
    }
}

#[component]
pub fn ModelViewer(product: String) -> Element {
    let config = use_context::<Config>();
    let mut load_state = use_signal(LoadState::default);
    let loader = use_hook(|| Rc::new(RefCell::new(None::<ModelLoader>)));

    let canvas = use_render_surface(
        SurfaceConfig {
            width: config.canvas_width,
            height: config.viewer_height,
            use_live_background: true,
            ..Default::default()
        },
        |_| None,
    );

    // Runs again whenever the product or the surface changes
    let proxy_url = config.proxy_url();
    use_effect(use_reactive!(|product, canvas| {
        let Some(handles) = canvas.handles() else {
            return;
        };
        let loader = bind_loader(&mut loader.borrow_mut(), handles, || {
            ApiClient::new(proxy_url.clone())
        });

        load_state.set(LoadState::Loading {
            product: product.clone(),
        });
        spawn(async move {
            // Failures are already logged by the loader; the state says why
            match loader.load(&product).await {
                Err(LoadError::Stale) => {}
                _ => load_state.set(loader.state()),
            }
        });
    }));

    let status = match load_state() {
        LoadState::Loaded { .. } => None,
        LoadState::Failed { product, error } => Some(format!("Could not load {product}: {error}")),
        _ => Some("Loading model...".to_string()),
    };

    rsx! {
        SurfaceView {
            canvas,
            style: format!("width: 100%; height: {}px;", config.viewer_height),
            if let Some(status) = status {
                p { class: "absolute bottom-2 left-2 text-gray-200", "{status}" }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandcam::render::{RenderSurface, SoftwareOutput, Viewport};
    use std::sync::Arc;
    use std::time::Duration;

    fn surface() -> RenderSurface {
        RenderSurface::start(
            SurfaceConfig {
                width: 16,
                height: 16,
                frame_interval: Duration::from_secs(3600),
                ..Default::default()
            },
            Arc::new(Viewport::new(16, 16)),
            SoftwareOutput::factory(),
            None,
            |_| None,
        )
        .unwrap()
    }

    fn api() -> ApiClient {
        ApiClient::new("http://127.0.0.1:9")
    }

    #[tokio::test]
    async fn loader_follows_the_surface() {
        let mut first = surface();
        let mut slot = None;

        let a = bind_loader(&mut slot, first.handles(), api);
        let again = bind_loader(&mut slot, first.handles(), || unreachable!());
        assert_eq!(a.surface_id(), again.surface_id());

        let mut second = surface();
        let b = bind_loader(&mut slot, second.handles(), api);
        assert_eq!(b.surface_id(), second.id());
        assert_ne!(a.surface_id(), b.surface_id());
        assert_eq!(slot.as_ref().map(ModelLoader::surface_id), Some(second.id()));

        first.teardown();
        second.teardown();
    }
}
