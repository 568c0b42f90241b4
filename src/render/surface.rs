//! Render surface: a scene, a camera, and an output bound to one container
//!
//! `RenderSurface::start` wires everything up and hands `SurfaceHandles` to
//! a creation callback so a flow (detection or model viewing) can add
//! objects, per-frame hooks, or samplers. Everything acquired here is
//! released by `teardown`, which also runs on drop.

use super::camera::PerspectiveCamera;
use super::output::{OutputFactory, OutputOptions, OutputSurface};
use super::scene::{Background, Color, Light, Scene, TextureFilter, VideoTexture};
use crate::error::{MediaError, SurfaceError};
use crate::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use glam::Vec3;
use image::RgbaImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Called with the container's new width and height
pub type ResizeListener = Arc<dyn Fn(u32, u32) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Region a surface is displayed in. Hosts at most one surface at a time.
pub trait Container: Send + Sync {
    fn client_size(&self) -> (u32, u32);

    /// Claim the container; fails if another surface holds it
    fn attach(&self, surface: SurfaceId) -> Result<(), SurfaceError>;

    /// Release the container if `surface` holds it
    fn detach(&self, surface: SurfaceId) -> bool;

    fn attached(&self) -> Option<SurfaceId>;

    fn add_resize_listener(&self, listener: ResizeListener) -> ListenerId;

    fn remove_resize_listener(&self, id: ListenerId) -> bool;
}

/// In-process container whose size is driven by the host window
pub struct Viewport {
    size: Mutex<(u32, u32)>,
    attached: Mutex<Option<SurfaceId>>,
    listeners: Mutex<Vec<(ListenerId, ResizeListener)>>,
    next_listener: AtomicU64,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new((width, height)),
            attached: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Change the size and notify every listener, in registration order
    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
        let listeners: Vec<ResizeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(width, height);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Container for Viewport {
    fn client_size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    fn attach(&self, surface: SurfaceId) -> Result<(), SurfaceError> {
        let mut attached = self.attached.lock();
        match *attached {
            Some(holder) if holder != surface => Err(SurfaceError::ContainerBusy(holder.get())),
            _ => {
                *attached = Some(surface);
                Ok(())
            }
        }
    }

    fn detach(&self, surface: SurfaceId) -> bool {
        let mut attached = self.attached.lock();
        if *attached == Some(surface) {
            *attached = None;
            true
        } else {
            false
        }
    }

    fn attached(&self) -> Option<SurfaceId> {
        *self.attached.lock()
    }

    fn add_resize_listener(&self, listener: ResizeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_resize_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

/// Surface configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceConfig {
    /// Fallback width when the container reports zero
    pub width: u32,
    /// Fallback height when the container reports zero
    pub height: u32,
    /// Keep frames readable for capture (`read_pixels`)
    pub preserve_output_buffer: bool,
    /// Request a camera and use it as the scene background
    pub use_live_background: bool,
    /// Redraw period; one display refresh by default
    pub frame_interval: Duration,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            preserve_output_buffer: false,
            use_live_background: false,
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Per-frame callback, given the scene and the seconds since the last frame
pub type FrameHook = Box<dyn FnMut(&mut Scene, f32) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Runs when the surface is torn down
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Everything one surface owns behind its lock
pub struct RenderContext {
    pub scene: Scene,
    pub camera: PerspectiveCamera,
    output: Box<dyn OutputSurface>,
    width: u32,
    height: u32,
    hooks: Vec<(HookId, FrameHook)>,
    next_hook: u64,
    frames: u64,
    render_failing: bool,
    active: bool,
}

impl RenderContext {
    fn draw_frame(&mut self, dt: f32) {
        if !self.active {
            return;
        }

        for (_, hook) in self.hooks.iter_mut() {
            hook(&mut self.scene, dt);
        }

        match self.output.render(&self.scene, &self.camera) {
            Ok(()) => {
                self.frames += 1;
                if self.render_failing {
                    tracing::info!("Rendering recovered");
                    self.render_failing = false;
                }
            }
            Err(e) => {
                if !self.render_failing {
                    tracing::warn!("Frame render failed: {e}");
                    self.render_failing = true;
                }
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> bool {
        if !self.active || width == 0 || height == 0 {
            return false;
        }
        self.width = width;
        self.height = height;
        self.camera.set_viewport(width, height);
        self.output.set_size(width, height);
        true
    }
}

/// Cloneable access to a running surface, handed to flows
#[derive(Clone)]
pub struct SurfaceHandles {
    id: SurfaceId,
    context: Arc<Mutex<RenderContext>>,
}

impl SurfaceHandles {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn with_scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        f(&mut self.context.lock().scene)
    }

    pub fn with_camera<R>(&self, f: impl FnOnce(&mut PerspectiveCamera) -> R) -> R {
        f(&mut self.context.lock().camera)
    }

    pub fn camera(&self) -> PerspectiveCamera {
        self.context.lock().camera.clone()
    }

    pub fn size(&self) -> (u32, u32) {
        let ctx = self.context.lock();
        (ctx.width, ctx.height)
    }

    /// Register work to run before every frame
    pub fn on_frame(&self, hook: impl FnMut(&mut Scene, f32) + Send + 'static) -> HookId {
        let mut ctx = self.context.lock();
        let id = HookId(ctx.next_hook);
        ctx.next_hook += 1;
        ctx.hooks.push((id, Box::new(hook)));
        id
    }

    pub fn remove_frame_hook(&self, id: HookId) -> bool {
        let mut ctx = self.context.lock();
        let before = ctx.hooks.len();
        ctx.hooks.retain(|(existing, _)| *existing != id);
        ctx.hooks.len() != before
    }

    /// Run hooks and render one frame immediately
    pub fn render_frame(&self, dt: f32) {
        self.context.lock().draw_frame(dt);
    }

    pub fn read_pixels(&self) -> Result<RgbaImage, SurfaceError> {
        self.context.lock().output.read_pixels()
    }

    pub fn presented_frame(&self) -> Option<Arc<RgbaImage>> {
        self.context.lock().output.presented()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.context.lock().frames
    }

    pub fn is_active(&self) -> bool {
        self.context.lock().active
    }
}

/// State of the live-background camera request
#[derive(Clone, Debug, PartialEq)]
pub enum MediaStatus {
    /// Live background not requested
    Disabled,
    Pending,
    Live,
    /// Request failed; the placeholder background stays
    Failed(MediaError),
    /// Stream released by teardown
    Stopped,
}

struct MediaSlot {
    stream: Option<MediaStream>,
    status: MediaStatus,
    closed: bool,
}

/// Owner of a running surface
pub struct RenderSurface {
    handles: SurfaceHandles,
    container: Arc<dyn Container>,
    listener: Option<ListenerId>,
    media: Arc<Mutex<MediaSlot>>,
    tasks: Vec<JoinHandle<()>>,
    cleanups: Vec<Cleanup>,
    torn_down: bool,
}

impl RenderSurface {
    /// Start a surface inside `container`. Must be called within a tokio
    /// runtime. `on_created` may return a cleanup that runs at teardown.
    pub fn start<F>(
        config: SurfaceConfig,
        container: Arc<dyn Container>,
        make_output: OutputFactory,
        media: Option<Arc<dyn MediaDevices>>,
        on_created: F,
    ) -> Result<Self, SurfaceError>
    where
        F: FnOnce(&SurfaceHandles) -> Option<Cleanup>,
    {
        let id = SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed));

        if let Some(holder) = container.attached() {
            return Err(SurfaceError::ContainerBusy(holder.get()));
        }

        let (cw, ch) = container.client_size();
        let width = if cw > 0 { cw } else { config.width.max(1) };
        let height = if ch > 0 { ch } else { config.height.max(1) };

        let mut output = make_output(OutputOptions {
            width,
            height,
            preserve_output_buffer: config.preserve_output_buffer,
        })?;
        if let Err(e) = container.attach(id) {
            output.dispose();
            return Err(e);
        }

        let mut scene = Scene::new(Color::BLACK);
        scene.lights.push(Light::Ambient {
            color: Color::WHITE,
            intensity: 0.8,
        });
        scene.lights.push(Light::Directional {
            color: Color::WHITE,
            intensity: 0.8,
            direction: Vec3::new(0.0, 1.0, 1.0),
        });

        let mut camera = PerspectiveCamera::new(75.0, width as f32 / height as f32, 0.1, 1000.0);
        camera.position = Vec3::new(0.0, 200.0, 300.0);

        let context = Arc::new(Mutex::new(RenderContext {
            scene,
            camera,
            output,
            width,
            height,
            hooks: Vec::new(),
            next_hook: 1,
            frames: 0,
            render_failing: false,
            active: true,
        }));

        let initial_status = if config.use_live_background {
            MediaStatus::Pending
        } else {
            MediaStatus::Disabled
        };

        // From here on an early exit tears down through Drop
        let mut surface = RenderSurface {
            handles: SurfaceHandles { id, context },
            container: container.clone(),
            listener: None,
            media: Arc::new(Mutex::new(MediaSlot {
                stream: None,
                status: initial_status,
                closed: false,
            })),
            tasks: Vec::new(),
            cleanups: Vec::new(),
            torn_down: false,
        };

        let ctx = surface.handles.context.clone();
        surface.listener = Some(container.add_resize_listener(Arc::new(move |w, h| {
            ctx.lock().resize(w, h);
        })));

        surface.tasks.push(spawn_render_loop(
            surface.handles.context.clone(),
            config.frame_interval,
        ));

        if config.use_live_background {
            match media {
                Some(devices) => {
                    // Not tracked in `tasks`: a stream that arrives after
                    // teardown must still be seen so it can be stopped.
                    spawn_media_request(
                        devices,
                        surface.handles.context.clone(),
                        surface.media.clone(),
                    );
                }
                None => {
                    tracing::warn!(surface = %id, "Live background requested without media devices");
                    surface.media.lock().status = MediaStatus::Failed(MediaError::NotFound);
                }
            }
        }

        if let Some(cleanup) = on_created(&surface.handles) {
            surface.cleanups.push(cleanup);
        }

        tracing::info!(surface = %id, width, height, "Render surface started");
        Ok(surface)
    }

    pub fn handles(&self) -> &SurfaceHandles {
        &self.handles
    }

    pub fn id(&self) -> SurfaceId {
        self.handles.id
    }

    /// Register an extra cleanup to run at teardown
    pub fn add_cleanup(&mut self, cleanup: Cleanup) {
        if self.torn_down {
            cleanup();
        } else {
            self.cleanups.push(cleanup);
        }
    }

    /// Re-read the container size and apply it to camera and output
    pub fn handle_resize(&self) {
        let (w, h) = self.container.client_size();
        if !self.handles.context.lock().resize(w, h) {
            tracing::debug!(surface = %self.handles.id, w, h, "Ignoring resize");
        }
    }

    pub fn media_status(&self) -> MediaStatus {
        self.media.lock().status.clone()
    }

    pub fn media_tracks(&self) -> Vec<MediaTrack> {
        self.media
            .lock()
            .stream
            .as_ref()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release everything: flow cleanups, resize listener, redraw loop,
    /// container attachment, output resources, camera tracks. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let id = self.handles.id;

        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }

        if let Some(listener) = self.listener.take() {
            self.container.remove_resize_listener(listener);
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        {
            let mut ctx = self.handles.context.lock();
            ctx.active = false;
            ctx.hooks.clear();
            self.container.detach(id);
            ctx.output.dispose();
        }

        let mut slot = self.media.lock();
        slot.closed = true;
        if let Some(stream) = slot.stream.take() {
            stream.stop_all();
        }
        if matches!(slot.status, MediaStatus::Pending | MediaStatus::Live) {
            slot.status = MediaStatus::Stopped;
        }

        tracing::info!(surface = %id, "Render surface torn down");
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_render_loop(context: Arc<Mutex<RenderContext>>, frame_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let dt = (now - last).as_secs_f32();
            last = now;

            let mut ctx = context.lock();
            if !ctx.active {
                break;
            }
            ctx.draw_frame(dt);
        }
    })
}

fn spawn_media_request(
    devices: Arc<dyn MediaDevices>,
    context: Arc<Mutex<RenderContext>>,
    slot: Arc<Mutex<MediaSlot>>,
) {
    let request = devices.get_user_media(MediaConstraints::video_only());

    tokio::spawn(async move {
        let result = request.await;
        let mut slot = slot.lock();

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Camera unavailable, keeping static background: {e}");
                if !slot.closed {
                    slot.status = MediaStatus::Failed(e);
                }
                return;
            }
        };

        if slot.closed {
            tracing::debug!("Camera stream arrived after teardown, stopping it");
            stream.stop_all();
            return;
        }

        let Some(track) = stream.video_track().cloned() else {
            tracing::warn!("Camera stream has no video track");
            stream.stop_all();
            slot.status = MediaStatus::Failed(MediaError::NotFound);
            return;
        };

        context.lock().scene.background =
            Background::Video(VideoTexture::new(track, TextureFilter::Linear));
        slot.status = MediaStatus::Live;
        slot.stream = Some(stream);
        tracing::info!("Live camera background active");
    });
}
