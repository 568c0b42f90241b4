//! Perspective camera for the render surface
//!
//! Follows the usual right-handed, -Z forward convention: with no rotation
//! the camera looks down the negative Z axis from `position`.

use glam::{Mat4, Vec3, Vec4};

/// Camera state: field of view, aspect, clip planes, and placement
#[derive(Clone, Debug, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Width / height of the output
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    projection: Mat4,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(75.0, 640.0 / 480.0, 0.1, 1000.0)
    }
}

impl PerspectiveCamera {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            fov,
            aspect,
            near,
            far,
            position: Vec3::ZERO,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection_matrix();
        camera
    }

    /// Recompute the projection after changing fov, aspect, or clip planes
    pub fn update_projection_matrix(&mut self) {
        self.projection =
            Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far);
    }

    /// Set the aspect ratio from output dimensions and update the projection
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
        self.update_projection_matrix();
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(-self.position)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }

    /// Project a world-space point to pixel coordinates plus NDC depth.
    /// Returns `None` for points behind the camera.
    pub fn project(&self, point: Vec3, width: u32, height: u32) -> Option<Vec3> {
        let clip = self.view_projection() * Vec4::new(point.x, point.y, point.z, 1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Vec3::new(
            (ndc.x + 1.0) * 0.5 * width as f32,
            (1.0 - ndc.y) * 0.5 * height as f32,
            ndc.z,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_sets_aspect_and_projection() {
        let mut camera = PerspectiveCamera::default();
        let before = camera.projection();

        camera.set_viewport(1920, 1080);
        assert!((camera.aspect - 1920.0 / 1080.0).abs() < 1e-6);
        assert_ne!(camera.projection(), before);

        let expected = Mat4::perspective_rh(75f32.to_radians(), 1920.0 / 1080.0, 0.1, 1000.0);
        assert_eq!(camera.projection(), expected);
    }

    #[test]
    fn point_ahead_projects_to_center() {
        let mut camera = PerspectiveCamera::default();
        camera.position = Vec3::new(0.0, 0.0, 10.0);

        let p = camera.project(Vec3::ZERO, 640, 480).unwrap();
        assert!((p.x - 320.0).abs() < 1e-3);
        assert!((p.y - 240.0).abs() < 1e-3);

        assert!(camera.project(Vec3::new(0.0, 0.0, 20.0), 640, 480).is_none());
    }
}
