//! Components shared by the views

mod canvas;
pub use canvas::{use_render_surface, CanvasHandle, SurfaceView};

mod model_viewer;
pub use model_viewer::ModelViewer;
