//! Periodic capture of the rendered surface for detection
//!
//! Every interval the sampler reads back the surface's drawing buffer,
//! encodes it as JPEG, and hands the frame to a callback on its own task so
//! a slow detection request never delays the next capture.

use crate::error::SurfaceError;
use crate::render::SurfaceHandles;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// Sampler configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerConfig {
    pub interval: Duration,
    /// JPEG quality, 1..=100
    pub jpeg_quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            jpeg_quality: 92,
        }
    }
}

/// One captured frame, ready to send for detection
#[derive(Clone, Debug)]
pub struct DetectionFrame {
    /// Starts at 1 for the first capture of a sampler
    pub seq: u64,
    pub jpeg: Vec<u8>,
    pub captured_at: SystemTime,
}

impl DetectionFrame {
    /// Bare base64 payload (no data-URI prefix)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }
}

/// Encode an RGBA frame as baseline JPEG (alpha dropped)
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, SurfaceError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(out)
}

/// Handle to a running sampler; cancelled on drop
pub struct CaptureSampler {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl CaptureSampler {
    /// Start sampling `surface`. The first capture happens one full
    /// interval after start. Must be called within a tokio runtime.
    pub fn start<F, Fut>(surface: SurfaceHandles, config: SamplerConfig, on_frame: F) -> Self
    where
        F: Fn(DetectionFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));
        let on_frame = Arc::new(on_frame);

        let task = {
            let running = running.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + config.interval;
                let mut ticker = tokio::time::interval_at(start, config.interval);
                let mut seq = 0u64;

                loop {
                    ticker.tick().await;
                    if !running.load(Ordering::SeqCst) || !surface.is_active() {
                        break;
                    }
                    ticks.fetch_add(1, Ordering::SeqCst);

                    let pixels = match surface.read_pixels() {
                        Ok(pixels) => pixels,
                        Err(e) => {
                            tracing::debug!("Skipping capture: {e}");
                            continue;
                        }
                    };
                    let jpeg = match encode_jpeg(&pixels, config.jpeg_quality) {
                        Ok(jpeg) => jpeg,
                        Err(e) => {
                            tracing::warn!("Failed to encode capture: {e}");
                            continue;
                        }
                    };

                    seq += 1;
                    let frame = DetectionFrame {
                        seq,
                        jpeg,
                        captured_at: SystemTime::now(),
                    };
                    let on_frame = on_frame.clone();
                    tokio::spawn(async move { on_frame(frame).await });
                }
            })
        };

        tracing::debug!(interval_ms = config.interval.as_millis() as u64, "Capture sampler started");
        Self {
            running,
            ticks,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of ticks fired so far, including ones that produced no frame
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Stop sampling. Already-dispatched callbacks keep running.
    pub fn cancel(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Capture sampler cancelled");
        }
    }
}

impl Drop for CaptureSampler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderSurface, SoftwareOutput, SurfaceConfig, Viewport};
    use parking_lot::Mutex;

    fn surface(preserve: bool) -> RenderSurface {
        RenderSurface::start(
            SurfaceConfig {
                width: 32,
                height: 24,
                preserve_output_buffer: preserve,
                frame_interval: Duration::from_millis(100),
                ..Default::default()
            },
            Arc::new(Viewport::new(32, 24)),
            SoftwareOutput::factory(),
            None,
            |_| None,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval_after_a_full_interval() {
        let surface = surface(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut sampler = CaptureSampler::start(
            surface.handles().clone(),
            SamplerConfig::default(),
            move |frame| {
                let sink = sink.clone();
                async move { sink.lock().push(frame) }
            },
        );

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(sampler.ticks(), 0);

        tokio::time::sleep(Duration::from_millis(4600)).await;
        assert_eq!(sampler.ticks(), 3);

        let frames = seen.lock().clone();
        assert_eq!(frames.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(frames.iter().all(|f| f.jpeg.starts_with(&[0xFF, 0xD8])));

        sampler.cancel();
        assert!(!sampler.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sampler.ticks(), 3);
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_buffer_produces_no_frames() {
        let surface = surface(false);
        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();

        let _sampler = CaptureSampler::start(
            surface.handles().clone(),
            SamplerConfig::default(),
            move |_| {
                let sink = sink.clone();
                async move {
                    sink.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_sampler_stops_it() {
        let surface = surface(true);
        let ticks;
        {
            let sampler =
                CaptureSampler::start(surface.handles().clone(), SamplerConfig::default(), |_| {
                    async {}
                });
            tokio::time::sleep(Duration::from_millis(2100)).await;
            ticks = sampler.ticks();
        }
        assert_eq!(ticks, 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    #[test]
    fn base64_payload_has_no_prefix() {
        let jpeg = encode_jpeg(&RgbaImage::new(4, 4), 92).unwrap();
        let frame = DetectionFrame {
            seq: 1,
            jpeg,
            captured_at: SystemTime::now(),
        };
        let payload = frame.to_base64();
        assert!(payload.starts_with("/9j/"));
        assert!(!payload.contains(','));
    }
}
