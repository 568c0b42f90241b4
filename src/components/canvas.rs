//! A render surface hosted by a view, and the element that shows it

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use brandcam::capture::encode_jpeg;
use brandcam::config::{Config, RendererKind};
use brandcam::media::{ImageSequenceCamera, MediaDevices};
use brandcam::render::{
    Cleanup, OutputFactory, RenderSurface, SoftwareOutput, SurfaceConfig, SurfaceHandles, Viewport,
};
use dioxus::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// How often the view picks up a new frame (~30 fps)
const DISPLAY_INTERVAL: Duration = Duration::from_millis(33);
const DISPLAY_QUALITY: u8 = 80;

/// A started (or failed) surface as seen by the view that owns it
#[derive(Clone)]
pub struct CanvasHandle {
    viewport: Arc<Viewport>,
    started: Result<SurfaceHandles, String>,
}

impl CanvasHandle {
    pub fn handles(&self) -> Option<&SurfaceHandles> {
        self.started.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.started.as_ref().err().map(String::as_str)
    }
}

impl PartialEq for CanvasHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.viewport, &other.viewport)
    }
}

fn output_factory(config: &Config) -> OutputFactory {
    match config.renderer {
        RendererKind::Software => SoftwareOutput::factory(),
        #[cfg(feature = "gpu")]
        RendererKind::Gpu => brandcam::render::GpuOutput::factory(),
        #[cfg(not(feature = "gpu"))]
        RendererKind::Gpu => {
            tracing::warn!("Built without the gpu feature, falling back to software rendering");
            SoftwareOutput::factory()
        }
    }
}

fn media_devices(config: &Config) -> Arc<dyn MediaDevices> {
    match &config.camera_dir {
        Some(dir) => Arc::new(ImageSequenceCamera::from_dir(dir.clone(), config.camera_fps)),
        #[cfg(feature = "webcam")]
        None => Arc::new(brandcam::media::Webcam::new(config.camera_index)),
        #[cfg(not(feature = "webcam"))]
        None => Arc::new(brandcam::media::NoCamera),
    }
}

/// Start a surface inside a fresh viewport
fn start_canvas(
    surface_config: SurfaceConfig,
    make_output: OutputFactory,
    media: Option<Arc<dyn MediaDevices>>,
    on_created: impl FnOnce(&SurfaceHandles) -> Option<Cleanup>,
) -> (CanvasHandle, Option<RenderSurface>) {
    let viewport = Arc::new(Viewport::new(surface_config.width, surface_config.height));
    match RenderSurface::start(surface_config, viewport.clone(), make_output, media, on_created) {
        Ok(surface) => {
            let handles = surface.handles().clone();
            let canvas = CanvasHandle {
                viewport,
                started: Ok(handles),
            };
            (canvas, Some(surface))
        }
        Err(e) => {
            tracing::error!("Failed to start render surface: {e}");
            let canvas = CanvasHandle {
                viewport,
                started: Err(e.to_string()),
            };
            (canvas, None)
        }
    }
}

/// The surface a component currently owns and the config it was started with
#[derive(Default)]
struct SurfaceSlot {
    mounted: Option<(SurfaceConfig, CanvasHandle)>,
    surface: Option<RenderSurface>,
}

impl SurfaceSlot {
    /// Keep the running surface while `config` is unchanged; otherwise tear
    /// it down and start a new one with `start`
    fn ensure(
        &mut self,
        config: &SurfaceConfig,
        start: impl FnOnce(SurfaceConfig) -> (CanvasHandle, Option<RenderSurface>),
    ) -> CanvasHandle {
        if let Some((mounted, canvas)) = &self.mounted {
            if mounted == config {
                return canvas.clone();
            }
            tracing::debug!("Surface config changed, restarting");
        }

        self.release();
        let (canvas, surface) = start(config.clone());
        self.mounted = Some((config.clone(), canvas.clone()));
        self.surface = surface;
        canvas
    }

    fn release(&mut self) {
        self.mounted = None;
        if let Some(mut surface) = self.surface.take() {
            surface.teardown();
        }
    }
}

/// Start a surface when the component mounts, restart it whenever
/// `surface_config` changes, and tear it down when the component unmounts.
/// `on_created` runs each time a surface starts.
pub fn use_render_surface(
    surface_config: SurfaceConfig,
    on_created: impl FnOnce(&SurfaceHandles) -> Option<Cleanup> + 'static,
) -> CanvasHandle {
    let config = use_context::<Config>();
    let slot = use_hook(|| Rc::new(RefCell::new(SurfaceSlot::default())));

    let canvas = slot.borrow_mut().ensure(&surface_config, |surface_config| {
        start_canvas(
            surface_config,
            output_factory(&config),
            Some(media_devices(&config)),
            on_created,
        )
    });

    use_drop(move || slot.borrow_mut().release());

    canvas
}

/// Shows the surface's latest frame and feeds element resizes back into it
#[component]
pub fn SurfaceView(canvas: CanvasHandle, style: String, children: Element) -> Element {
    let mut frame = use_signal(String::new);

    // A restarted surface arrives as a new canvas; the old loop ends with
    // its surface
    use_effect(use_reactive!(|canvas| {
        frame.set(String::new());
        let Some(handles) = canvas.handles().cloned() else {
            return;
        };
        spawn(async move {
            let mut shown = 0;
            while handles.is_active() {
                tokio::time::sleep(DISPLAY_INTERVAL).await;
                let rendered = handles.frames_rendered();
                if rendered == shown {
                    continue;
                }
                let Some(image) = handles.presented_frame() else {
                    continue;
                };
                shown = rendered;

                match tokio::task::spawn_blocking(move || encode_jpeg(&image, DISPLAY_QUALITY)).await {
                    Ok(Ok(jpeg)) => {
                        frame.set(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
                    }
                    Ok(Err(e)) => tracing::debug!("Skipping frame: {e}"),
                    Err(e) => {
                        tracing::warn!("Frame encoder stopped: {e}");
                        break;
                    }
                }
            }
        });
    }));

    let viewport = canvas.viewport.clone();

    rsx! {
        div {
            class: "relative overflow-hidden bg-black",
            style: "{style}",
            onresize: move |evt| {
                if let Ok(size) = evt.get_content_box_size() {
                    viewport.resize(size.width as u32, size.height as u32);
                }
            },
            if let Some(error) = canvas.error() {
                p { class: "text-red-400 p-4", "Renderer unavailable: {error}" }
            } else if !frame().is_empty() {
                img { class: "w-full h-full", src: "{frame}" }
            }
            {children}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandcam::render::Container;

    fn config(width: u32) -> SurfaceConfig {
        SurfaceConfig {
            width,
            height: 24,
            frame_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn start_software(
        starts: &Rc<RefCell<u32>>,
    ) -> impl FnOnce(SurfaceConfig) -> (CanvasHandle, Option<RenderSurface>) {
        let starts = starts.clone();
        move |surface_config| {
            *starts.borrow_mut() += 1;
            start_canvas(surface_config, SoftwareOutput::factory(), None, |_| None)
        }
    }

    #[tokio::test]
    async fn unchanged_config_keeps_surface() {
        let starts = Rc::new(RefCell::new(0));
        let mut slot = SurfaceSlot::default();

        let first = slot.ensure(&config(32), start_software(&starts));
        let again = slot.ensure(&config(32), start_software(&starts));

        assert_eq!(*starts.borrow(), 1);
        assert!(first == again);
        assert!(first.handles().unwrap().is_active());
        slot.release();
    }

    #[tokio::test]
    async fn changed_config_restarts_surface() {
        let starts = Rc::new(RefCell::new(0));
        let mut slot = SurfaceSlot::default();

        let first = slot.ensure(&config(32), start_software(&starts));
        let second = slot.ensure(&config(64), start_software(&starts));

        assert_eq!(*starts.borrow(), 2);
        assert!(first != second);
        assert!(!first.handles().unwrap().is_active());
        assert!(first.viewport.attached().is_none());
        assert!(second.handles().unwrap().is_active());

        slot.release();
        assert!(!second.handles().unwrap().is_active());
        // Releasing twice is harmless
        slot.release();
    }
}
