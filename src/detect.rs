//! Logo detection: send captured frames to the backend and latch the first
//! positive verdict

use crate::capture::{CaptureSampler, SamplerConfig};
use crate::client::ApiClient;
use crate::render::{Cleanup, SurfaceHandles};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Strip a `data:<mime>;base64,` prefix if present
pub fn normalize_base64(payload: &str) -> &str {
    match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(payload, |(_, data)| data),
        None => payload,
    }
}

/// Outcome of one detection request. Failures read as "not detected".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub detected: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DetectionClient {
    api: ApiClient,
}

impl DetectionClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Ask the backend whether `payload` (base64 JPEG, prefix optional)
    /// shows the logo. Never retries.
    pub async fn detect(&self, payload: &str) -> Verdict {
        match self.api.detect(normalize_base64(payload)).await {
            Ok(detected) => {
                tracing::debug!(detected, "Detection verdict");
                Verdict {
                    detected,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Detection request failed: {e}");
                Verdict {
                    detected: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

type Transition = Box<dyn FnOnce(u64) + Send>;

/// One-shot latch: the first positive verdict fires the transition, every
/// later verdict (and anything after `close`) is ignored
pub struct DetectionLatch {
    fired: AtomicBool,
    closed: AtomicBool,
    on_transition: Mutex<Option<Transition>>,
}

impl DetectionLatch {
    pub fn new(on_transition: impl FnOnce(u64) + Send + 'static) -> Self {
        Self {
            fired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_transition: Mutex::new(Some(Box::new(on_transition))),
        }
    }

    /// Record the verdict for capture `seq`. Returns true only for the
    /// call that fired the transition.
    pub fn observe(&self, seq: u64, verdict: &Verdict) -> bool {
        if !verdict.detected || self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        // close() may have taken the callback in the meantime
        let transition = self.on_transition.lock().take();
        match transition {
            Some(transition) => {
                tracing::info!(seq, "Logo detected");
                transition(seq);
                true
            }
            None => false,
        }
    }

    pub fn is_detected(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop reacting to verdicts; drops the transition if it never fired
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.on_transition.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Sampler, client, and latch wired together for one surface
pub struct DetectionFlow {
    sampler: CaptureSampler,
    latch: Arc<DetectionLatch>,
}

impl DetectionFlow {
    /// Start capturing from `handles`; each capture sends its own request,
    /// so responses may complete out of order.
    pub fn start(
        handles: &SurfaceHandles,
        client: DetectionClient,
        config: SamplerConfig,
        on_detected: impl FnOnce(u64) + Send + 'static,
    ) -> Self {
        let latch = Arc::new(DetectionLatch::new(on_detected));
        let client = Arc::new(client);

        let sampler = CaptureSampler::start(handles.clone(), config, {
            let latch = latch.clone();
            move |frame| {
                let client = client.clone();
                let latch = latch.clone();
                async move {
                    if latch.is_closed() {
                        return;
                    }
                    let verdict = client.detect(&frame.to_base64()).await;
                    latch.observe(frame.seq, &verdict);
                }
            }
        });

        Self { sampler, latch }
    }

    pub fn latch(&self) -> Arc<DetectionLatch> {
        self.latch.clone()
    }

    pub fn is_detected(&self) -> bool {
        self.latch.is_detected()
    }

    pub fn captures(&self) -> u64 {
        self.sampler.ticks()
    }

    /// Cancel sampling and ignore any verdict still in flight
    pub fn stop(&mut self) {
        self.sampler.cancel();
        self.latch.close();
    }

    /// Hand the flow to its surface so teardown stops it
    pub fn into_cleanup(self) -> Cleanup {
        Box::new(move || {
            let mut flow = self;
            flow.stop();
        })
    }
}
