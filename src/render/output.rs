//! Output surfaces: where a scene gets rasterized
//!
//! `SoftwareOutput` is a CPU rasterizer built on `image`; the wgpu-backed
//! `GpuOutput` lives in `gpu.rs` behind the `gpu` feature.

use super::camera::PerspectiveCamera;
use super::scene::{Background, Color, Scene, TextureFilter};
use crate::error::SurfaceError;
use glam::Vec3;
use image::{imageops, Rgba, RgbaImage};
use std::sync::Arc;

/// Options an output is created with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputOptions {
    pub width: u32,
    pub height: u32,
    /// Keep the drawing buffer readable after a frame is presented
    pub preserve_output_buffer: bool,
}

/// Builds the output once the surface knows its initial size
pub type OutputFactory =
    Box<dyn FnOnce(OutputOptions) -> Result<Box<dyn OutputSurface>, SurfaceError> + Send>;

pub trait OutputSurface: Send {
    fn size(&self) -> (u32, u32);

    fn set_size(&mut self, width: u32, height: u32);

    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<(), SurfaceError>;

    /// Read back the drawing buffer. Fails unless the output was created
    /// with `preserve_output_buffer`.
    fn read_pixels(&self) -> Result<RgbaImage, SurfaceError>;

    /// Last completed frame, for display
    fn presented(&self) -> Option<Arc<RgbaImage>>;

    /// Release all resources; later renders fail with `Disposed`
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// CPU rasterizer: background blit plus depth-tested flat-shaded triangles
pub struct SoftwareOutput {
    width: u32,
    height: u32,
    preserve: bool,
    presented: Option<Arc<RgbaImage>>,
    depth: Vec<f32>,
    disposed: bool,
}

impl SoftwareOutput {
    pub fn new(options: OutputOptions) -> Self {
        Self {
            width: options.width.max(1),
            height: options.height.max(1),
            preserve: options.preserve_output_buffer,
            presented: None,
            depth: Vec::new(),
            disposed: false,
        }
    }

    /// Factory for `RenderSurface::start`
    pub fn factory() -> OutputFactory {
        Box::new(
            |options: OutputOptions| -> Result<Box<dyn OutputSurface>, SurfaceError> {
                Ok(Box::new(SoftwareOutput::new(options)))
            },
        )
    }

    fn paint_background(&self, frame: &mut RgbaImage, background: &Background) {
        match background {
            Background::Color(color) => fill(frame, *color),
            Background::Video(texture) => match texture.current_frame() {
                Some(video) if video.dimensions() == frame.dimensions() => {
                    frame.copy_from_slice(video.as_raw());
                }
                Some(video) => {
                    let filter = match texture.filter {
                        TextureFilter::Nearest => imageops::FilterType::Nearest,
                        TextureFilter::Linear => imageops::FilterType::Triangle,
                    };
                    *frame = imageops::resize(&*video, self.width, self.height, filter);
                }
                None => fill(frame, Color::BLACK),
            },
        }
    }
}

impl OutputSurface for SoftwareOutput {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }

        let (w, h) = (self.width, self.height);
        let mut frame = RgbaImage::new(w, h);
        self.paint_background(&mut frame, &scene.background);

        self.depth.clear();
        self.depth.resize((w * h) as usize, f32::INFINITY);

        for (world, color) in shaded_triangles(scene) {
            let (Some(a), Some(b), Some(c)) = (
                camera.project(world[0], w, h),
                camera.project(world[1], w, h),
                camera.project(world[2], w, h),
            ) else {
                continue;
            };
            raster_triangle(&mut frame, &mut self.depth, [a, b, c], color);
        }

        self.presented = Some(Arc::new(frame));
        Ok(())
    }

    fn read_pixels(&self) -> Result<RgbaImage, SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        if !self.preserve {
            return Err(SurfaceError::BufferNotPreserved);
        }
        self.presented
            .as_deref()
            .cloned()
            .ok_or(SurfaceError::NoFrame)
    }

    fn presented(&self) -> Option<Arc<RgbaImage>> {
        self.presented.clone()
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.presented = None;
        self.depth = Vec::new();
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// World-space triangles with flat two-sided lighting applied
pub(crate) fn shaded_triangles(scene: &Scene) -> impl Iterator<Item = ([Vec3; 3], Color)> + '_ {
    scene.objects().iter().flat_map(move |object| {
        let model = object.transform.matrix();
        object.mesh.triangles().map(move |tri| {
            let world = tri.map(|p| model.transform_point3(p));
            let normal = (world[1] - world[0])
                .cross(world[2] - world[0])
                .normalize_or_zero();
            let shade = scene
                .light_intensity(normal)
                .max(scene.light_intensity(-normal));
            (world, object.color.scaled(shade))
        })
    })
}

fn fill(frame: &mut RgbaImage, color: Color) {
    let [r, g, b] = color.0;
    for px in frame.pixels_mut() {
        *px = Rgba([r, g, b, 255]);
    }
}

fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Fill a screen-space triangle (x, y in pixels, z in 0..=1 depth)
fn raster_triangle(frame: &mut RgbaImage, depth: &mut [f32], v: [Vec3; 3], color: Color) {
    let (w, h) = frame.dimensions();
    let area = edge(v[0], v[1], v[2]);
    if area.abs() < f32::EPSILON {
        return;
    }

    let min_x = v.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor();
    let max_x = v.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil();
    let min_y = v.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor();
    let max_y = v.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil();
    if max_x < 0.0 || max_y < 0.0 || min_x >= w as f32 || min_y >= h as f32 {
        return;
    }

    let x0 = min_x.max(0.0) as u32;
    let x1 = (max_x as u32).min(w - 1);
    let y0 = min_y.max(0.0) as u32;
    let y1 = (max_y as u32).min(h - 1);
    let [r, g, b] = color.0;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
            let w0 = edge(v[1], v[2], p) / area;
            let w1 = edge(v[2], v[0], p) / area;
            let w2 = edge(v[0], v[1], p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }

            let z = w0 * v[0].z + w1 * v[1].z + w2 * v[2].z;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }
            let idx = (y * w + x) as usize;
            if z < depth[idx] {
                depth[idx] = z;
                frame.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scene::{Light, Mesh};

    fn options(preserve: bool) -> OutputOptions {
        OutputOptions {
            width: 64,
            height: 48,
            preserve_output_buffer: preserve,
        }
    }

    fn quad(size: f32) -> Arc<Mesh> {
        Arc::new(Mesh {
            positions: vec![
                Vec3::new(-size, -size, 0.0),
                Vec3::new(size, -size, 0.0),
                Vec3::new(size, size, 0.0),
                Vec3::new(-size, size, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        })
    }

    fn camera_at(z: f32) -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::new(75.0, 64.0 / 48.0, 0.1, 1000.0);
        camera.position = Vec3::new(0.0, 0.0, z);
        camera
    }

    #[test]
    fn clears_to_background_color() {
        let mut output = SoftwareOutput::new(options(true));
        let scene = Scene::new(Color([10, 20, 30]));
        output.render(&scene, &camera_at(10.0)).unwrap();

        let frame = output.read_pixels().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert!(frame.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn draws_lit_object_over_background() {
        let mut output = SoftwareOutput::new(options(true));
        let mut scene = Scene::new(Color::BLACK);
        scene.lights.push(Light::Ambient {
            color: Color::WHITE,
            intensity: 1.0,
        });
        scene.add("quad", quad(2.0));

        output.render(&scene, &camera_at(5.0)).unwrap();
        let frame = output.read_pixels().unwrap();
        assert_ne!(frame.get_pixel(32, 24).0, [0, 0, 0, 255]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn unpreserved_buffer_cannot_be_read() {
        let mut output = SoftwareOutput::new(options(false));
        let scene = Scene::new(Color::WHITE);
        output.render(&scene, &camera_at(10.0)).unwrap();

        assert!(matches!(
            output.read_pixels(),
            Err(SurfaceError::BufferNotPreserved)
        ));
        assert!(output.presented().is_some());
    }

    #[test]
    fn disposed_output_refuses_work() {
        let mut output = SoftwareOutput::new(options(true));
        output.dispose();
        assert!(output.is_disposed());
        assert!(matches!(
            output.render(&Scene::new(Color::BLACK), &camera_at(1.0)),
            Err(SurfaceError::Disposed)
        ));
    }

    #[test]
    fn resize_changes_frame_dimensions() {
        let mut output = SoftwareOutput::new(options(true));
        output.set_size(20, 10);
        output
            .render(&Scene::new(Color::BLACK), &camera_at(1.0))
            .unwrap();
        assert_eq!(output.read_pixels().unwrap().dimensions(), (20, 10));
    }
}
