//! Fetch a product model and show it, slowly turning, in a surface

use super::fbx;
use crate::client::ApiClient;
use crate::error::LoadError;
use crate::render::{HookId, Mesh, ObjectId, SurfaceHandles, SurfaceId};
use glam::Vec3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Uniform scale applied to loaded models
pub const MODEL_SCALE: f32 = 0.1;
/// Rotation about Y added every frame, in radians
pub const TURNTABLE_STEP: f32 = 0.01;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading {
        product: String,
    },
    Loaded {
        product: String,
        triangles: usize,
    },
    Failed {
        product: String,
        error: String,
    },
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading { .. })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded { .. })
    }
}

/// Loads models into one surface. Clones share state.
#[derive(Clone)]
pub struct ModelLoader {
    api: ApiClient,
    handles: SurfaceHandles,
    current: Arc<Mutex<Option<ObjectId>>>,
    generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<LoadState>>,
    turntable: HookId,
}

impl ModelLoader {
    /// Bind to a surface and start the turntable hook
    pub fn new(api: ApiClient, handles: &SurfaceHandles) -> Self {
        let current: Arc<Mutex<Option<ObjectId>>> = Arc::new(Mutex::new(None));

        let turntable = handles.on_frame({
            let current = current.clone();
            move |scene, _dt| {
                let Some(id) = *current.lock() else {
                    return;
                };
                if let Some(object) = scene.get_mut(id) {
                    object.transform.rotation.y += TURNTABLE_STEP;
                }
            }
        });

        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            api,
            handles: handles.clone(),
            current,
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            turntable,
        }
    }

    /// Surface this loader draws into
    pub fn surface_id(&self) -> SurfaceId {
        self.handles.id()
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    pub fn current_object(&self) -> Option<ObjectId> {
        *self.current.lock()
    }

    /// Fetch `<product>.fbx` and swap it in for the current model. On
    /// failure the scene is left as it was. A load overtaken by a newer
    /// `load` or `unload` is dropped with `LoadError::Stale`.
    pub async fn load(&self, product: &str) -> Result<ObjectId, LoadError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(LoadState::Loading {
            product: product.to_string(),
        });
        tracing::info!(product, "Loading model");

        let result = self.fetch_mesh(product).await;

        let mesh = match result {
            Ok(mesh) => mesh,
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    return Err(LoadError::Stale);
                }
                tracing::warn!(product, "Model load failed: {e}");
                self.state.send_replace(LoadState::Failed {
                    product: product.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let triangles = mesh.triangle_count();
        let mesh = Arc::new(mesh);
        // Scene lock first, then `current`: the same order the turntable uses
        let installed = self.handles.with_scene(|scene| {
            let mut current = self.current.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return None;
            }
            if let Some(previous) = current.take() {
                scene.remove(previous);
            }
            let id = scene.add(product, mesh);
            if let Some(object) = scene.get_mut(id) {
                object.transform.scale = Vec3::splat(MODEL_SCALE);
            }
            *current = Some(id);
            Some(id)
        });

        let Some(id) = installed else {
            tracing::debug!(product, "Discarding superseded model");
            return Err(LoadError::Stale);
        };

        self.state.send_replace(LoadState::Loaded {
            product: product.to_string(),
            triangles,
        });
        tracing::info!(product, triangles, "Model loaded");
        Ok(id)
    }

    async fn fetch_mesh(&self, product: &str) -> Result<Mesh, LoadError> {
        let bytes = self.api.fetch_asset(&format!("{product}.fbx")).await?;
        tokio::task::spawn_blocking(move || -> Result<Mesh, LoadError> {
            let doc = fbx::parse(&bytes)?;
            Ok(fbx::extract_mesh(&doc)?)
        })
        .await
        .map_err(|e| LoadError::Worker(e.to_string()))?
    }

    /// Remove the current model and cancel any load in flight
    pub fn unload(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.handles.with_scene(|scene| {
            if let Some(previous) = self.current.lock().take() {
                scene.remove(previous);
            }
        });
        self.state.send_replace(LoadState::Idle);
    }

    /// Stop turning the model; the surface keeps whatever is loaded
    pub fn stop_turntable(&self) -> bool {
        self.handles.remove_frame_hook(self.turntable)
    }
}
