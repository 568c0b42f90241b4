//! Camera feeds for the live background
//!
//! A `MediaDevices` implementation hands out a `MediaStream` whose tracks
//! publish their latest frame through a watch channel. Stopping a track
//! ends its producer and makes it report no frames from then on.

use crate::error::MediaError;
use futures_util::future::BoxFuture;
use image::RgbaImage;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Consecutive read failures after which a blocking source gives up
const MAX_READ_FAILURES: u32 = 30;

/// One decoded camera frame
pub type Frame = Arc<RgbaImage>;

/// What the caller wants from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn video_only() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }
}

/// Source of camera streams
pub trait MediaDevices: Send + Sync {
    fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

struct TrackInner {
    label: String,
    kind: TrackKind,
    live: AtomicBool,
    frames: watch::Receiver<Option<Frame>>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a single track; clones share the same underlying track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(
        label: impl Into<String>,
        kind: TrackKind,
        frames: watch::Receiver<Option<Frame>>,
        producer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                label: label.into(),
                kind,
                live: AtomicBool::new(true),
                frames,
                producer: Mutex::new(producer),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Stop the track. Safe to call more than once.
    pub fn stop(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            tracing::debug!(track = %self.inner.label, "track stopped");
        }
        if let Some(producer) = self.inner.producer.lock().take() {
            producer.abort();
        }
    }

    /// Most recent frame, or `None` once the track is stopped
    pub fn latest_frame(&self) -> Option<Frame> {
        if !self.is_live() {
            return None;
        }
        self.inner.frames.borrow().clone()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("live", &self.is_live())
            .finish()
    }
}

/// A set of tracks acquired together
#[derive(Debug)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }
}

#[derive(Clone)]
enum FrameSource {
    Directory(PathBuf),
    Frames(Vec<Frame>),
}

/// Virtual camera that loops over a sequence of still images
#[derive(Clone)]
pub struct ImageSequenceCamera {
    source: FrameSource,
    fps: u32,
}

impl ImageSequenceCamera {
    /// Play every decodable image in `dir`, in file-name order
    pub fn from_dir(dir: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            source: FrameSource::Directory(dir.into()),
            fps,
        }
    }

    pub fn from_frames(frames: Vec<RgbaImage>, fps: u32) -> Self {
        Self {
            source: FrameSource::Frames(frames.into_iter().map(Arc::new).collect()),
            fps,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

fn load_dir(dir: &Path) -> Result<Vec<Frame>, MediaError> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MediaError::NotFound,
        std::io::ErrorKind::PermissionDenied => MediaError::PermissionDenied,
        _ => MediaError::Device(e.to_string()),
    })?;

    let mut paths: Vec<PathBuf> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| image::ImageFormat::from_path(path).is_ok())
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(img) => frames.push(Arc::new(img.to_rgba8())),
            Err(e) => tracing::warn!("Skipping unreadable frame {path:?}: {e}"),
        }
    }
    Ok(frames)
}

impl MediaDevices for ImageSequenceCamera {
    fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>> {
        let source = self.source.clone();
        let interval = self.frame_interval();

        Box::pin(async move {
            if !constraints.video {
                return Err(MediaError::NotFound);
            }

            let frames = match source {
                FrameSource::Frames(frames) => frames,
                FrameSource::Directory(dir) => tokio::task::spawn_blocking(move || load_dir(&dir))
                    .await
                    .map_err(|e| MediaError::Device(e.to_string()))??,
            };
            let Some(first) = frames.first().cloned() else {
                return Err(MediaError::NotFound);
            };

            let (tx, rx) = watch::channel(Some(first));
            let producer = (frames.len() > 1).then(|| {
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.tick().await;
                    for frame in frames.iter().cycle().skip(1) {
                        ticker.tick().await;
                        tx.send_replace(Some(frame.clone()));
                    }
                })
            });

            tracing::info!("Camera stream opened");
            Ok(MediaStream::new(vec![MediaTrack::new(
                "image-sequence",
                TrackKind::Video,
                rx,
                producer,
            )]))
        })
    }
}

/// Sets the flag when the track's producer task is aborted or finishes
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Run a blocking frame source on its own thread and expose it as a video
/// track. `open` and every `next_frame` call run on that thread, so the
/// source itself need not be `Send`. Stopping the track ends the thread and
/// drops the source.
pub async fn spawn_frame_source<S, O, N>(
    label: &str,
    open: O,
    mut next_frame: N,
) -> Result<MediaTrack, MediaError>
where
    S: 'static,
    O: FnOnce() -> Result<S, MediaError> + Send + 'static,
    N: FnMut(&mut S) -> Result<RgbaImage, MediaError> + Send + 'static,
{
    let (opened_tx, opened_rx) = oneshot::channel::<Result<(), MediaError>>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let (tx, rx) = watch::channel(None);
    let stop = Arc::new(AtomicBool::new(false));

    let thread_label = label.to_string();
    std::thread::Builder::new()
        .name(format!("camera-{label}"))
        .spawn({
            let stop = stop.clone();
            move || {
                let _done = done_tx;
                let mut source = match open() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                if opened_tx.send(Ok(())).is_err() {
                    tracing::debug!(track = %thread_label, "Camera requester went away, closing");
                    return;
                }

                let mut failures = 0;
                while !stop.load(Ordering::SeqCst) && !tx.is_closed() {
                    match next_frame(&mut source) {
                        Ok(frame) => {
                            failures = 0;
                            tx.send_replace(Some(Arc::new(frame)));
                        }
                        Err(e) => {
                            failures += 1;
                            if failures >= MAX_READ_FAILURES {
                                tracing::warn!(track = %thread_label, "Camera stopped delivering frames: {e}");
                                break;
                            }
                        }
                    }
                }
                tracing::debug!(track = %thread_label, "Camera thread exiting");
            }
        })
        .map_err(|e| MediaError::Device(e.to_string()))?;

    match opened_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(MediaError::Device("camera thread exited".into())),
    }

    let producer = tokio::spawn(async move {
        let _stop = StopOnDrop(stop);
        let _ = done_rx.await;
    });
    Ok(MediaTrack::new(label, TrackKind::Video, rx, Some(producer)))
}

/// The system webcam at `index`, read through `nokhwa`
#[cfg(feature = "webcam")]
#[derive(Debug, Clone, Copy)]
pub struct Webcam {
    index: u32,
}

#[cfg(feature = "webcam")]
impl Webcam {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

#[cfg(feature = "webcam")]
mod webcam {
    use super::MediaError;
    use image::{DynamicImage, RgbImage, RgbaImage};
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;

    fn device_err(e: nokhwa::NokhwaError) -> MediaError {
        MediaError::Device(e.to_string())
    }

    pub(super) fn open(index: u32) -> Result<Camera, MediaError> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(device_err)?;
        if devices.is_empty() {
            return Err(MediaError::NotFound);
        }

        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format).map_err(device_err)?;
        camera.open_stream().map_err(device_err)?;
        tracing::info!(index, device = %camera.info().human_name(), "Webcam opened");
        Ok(camera)
    }

    pub(super) fn read(camera: &mut Camera) -> Result<RgbaImage, MediaError> {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map_err(device_err)?;
        let (width, height) = (decoded.width(), decoded.height());
        let rgb = RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| MediaError::Device("webcam frame size mismatch".into()))?;
        Ok(DynamicImage::ImageRgb8(rgb).to_rgba8())
    }
}

#[cfg(feature = "webcam")]
impl MediaDevices for Webcam {
    fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>> {
        let index = self.index;
        Box::pin(async move {
            if !constraints.video {
                return Err(MediaError::NotFound);
            }
            let track =
                spawn_frame_source("webcam", move || webcam::open(index), webcam::read).await?;
            Ok(MediaStream::new(vec![track]))
        })
    }
}

/// Device set with no camera attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCamera;

impl MediaDevices for NoCamera {
    fn get_user_media(
        &self,
        _constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>> {
        Box::pin(async { Err(MediaError::NotFound) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba(color))
    }

    #[tokio::test]
    async fn stopping_stream_kills_every_track() {
        let camera = ImageSequenceCamera::from_frames(
            vec![solid([255, 0, 0, 255]), solid([0, 255, 0, 255])],
            60,
        );
        let stream = camera
            .get_user_media(MediaConstraints::video_only())
            .await
            .unwrap();

        let track = stream.video_track().unwrap().clone();
        assert!(track.is_live());
        assert!(track.latest_frame().is_some());
        assert_eq!(stream.live_track_count(), 1);

        stream.stop_all();
        stream.stop_all();
        assert!(!track.is_live());
        assert!(track.latest_frame().is_none());
        assert_eq!(stream.live_track_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_advances_frames() {
        let camera = ImageSequenceCamera::from_frames(
            vec![solid([255, 0, 0, 255]), solid([0, 0, 255, 255])],
            10,
        );
        let stream = camera
            .get_user_media(MediaConstraints::video_only())
            .await
            .unwrap();
        let track = stream.video_track().unwrap();
        assert_eq!(track.latest_frame().unwrap().get_pixel(0, 0)[0], 255);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(track.latest_frame().unwrap().get_pixel(0, 0)[2], 255);
        stream.stop_all();
    }

    #[tokio::test]
    async fn directory_camera_loads_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        solid([1, 2, 3, 255]).save(dir.path().join("b.png")).unwrap();
        solid([9, 9, 9, 255]).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let stream = ImageSequenceCamera::from_dir(dir.path(), 30)
            .get_user_media(MediaConstraints::video_only())
            .await
            .unwrap();
        let first = stream.video_track().unwrap().latest_frame().unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 9);
        stream.stop_all();
    }

    /// Counts frames and records when it is dropped
    struct FakeSensor {
        frames: u8,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for FakeSensor {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn blocking_source_feeds_track_until_stopped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let track = spawn_frame_source(
            "fake",
            {
                let dropped = dropped.clone();
                move || Ok(FakeSensor { frames: 0, dropped })
            },
            |sensor: &mut FakeSensor| {
                std::thread::sleep(Duration::from_millis(2));
                sensor.frames = sensor.frames.wrapping_add(1);
                Ok(solid([sensor.frames, 0, 0, 255]))
            },
        )
        .await
        .unwrap();

        for _ in 0..200 {
            if track.latest_frame().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(track.latest_frame().is_some());
        assert_eq!(track.label(), "fake");

        track.stop();
        for _ in 0..200 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
        assert!(track.latest_frame().is_none());
    }

    #[tokio::test]
    async fn blocking_source_open_failure_is_reported() {
        let result = spawn_frame_source(
            "broken",
            || Err::<(), _>(MediaError::PermissionDenied),
            |_: &mut ()| Ok(solid([0, 0, 0, 255])),
        )
        .await;
        assert_eq!(result.unwrap_err(), MediaError::PermissionDenied);
    }

    #[tokio::test]
    async fn empty_or_missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let empty = ImageSequenceCamera::from_dir(dir.path(), 30)
            .get_user_media(MediaConstraints::video_only())
            .await;
        assert_eq!(empty.unwrap_err(), MediaError::NotFound);

        let missing = ImageSequenceCamera::from_dir(dir.path().join("nope"), 30)
            .get_user_media(MediaConstraints::video_only())
            .await;
        assert_eq!(missing.unwrap_err(), MediaError::NotFound);

        assert_eq!(
            NoCamera
                .get_user_media(MediaConstraints::video_only())
                .await
                .unwrap_err(),
            MediaError::NotFound
        );
    }
}
