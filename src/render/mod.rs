pub mod camera;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod output;
pub mod scene;
pub mod surface;

pub use camera::PerspectiveCamera;
#[cfg(feature = "gpu")]
pub use gpu::GpuOutput;
pub use output::{OutputFactory, OutputOptions, OutputSurface, SoftwareOutput};
pub use scene::{Background, Color, Light, Mesh, ObjectId, Scene, SceneObject, TextureFilter, Transform};
pub use surface::{
    Cleanup, Container, HookId, MediaStatus, RenderSurface, SurfaceConfig, SurfaceHandles,
    SurfaceId, Viewport,
};
