pub mod fbx;
pub mod loader;

pub use loader::{LoadState, ModelLoader, MODEL_SCALE, TURNTABLE_STEP};
