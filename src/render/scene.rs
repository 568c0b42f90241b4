//! Scene graph: background, lights, and the objects drawn each frame

use crate::media::{Frame, MediaTrack};
use glam::{EulerRot, Mat4, Quat, Vec3};
use std::sync::Arc;

/// 8-bit RGB color
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0]);
    pub const WHITE: Color = Color([255, 255, 255]);

    /// From a `0xRRGGBB` literal
    pub const fn from_hex(hex: u32) -> Self {
        Color([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8])
    }

    pub fn scaled(self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let [r, g, b] = self.0;
        Color([
            (r as f32 * f) as u8,
            (g as f32 * f) as u8,
            (b as f32 * f) as u8,
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

/// Texture that samples the newest frame of a live video track
#[derive(Clone, Debug)]
pub struct VideoTexture {
    track: MediaTrack,
    pub filter: TextureFilter,
}

impl VideoTexture {
    pub fn new(track: MediaTrack, filter: TextureFilter) -> Self {
        Self { track, filter }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.track.latest_frame()
    }
}

#[derive(Clone, Debug)]
pub enum Background {
    Color(Color),
    Video(VideoTexture),
}

impl Background {
    pub fn is_video(&self) -> bool {
        matches!(self, Background::Video(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Ambient {
        color: Color,
        intensity: f32,
    },
    /// Light arriving from `direction` (pointing from the scene toward the light)
    Directional {
        color: Color,
        intensity: f32,
        direction: Vec3,
    },
}

/// Indexed triangle mesh
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    /// Triangle list, three indices per face
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned bounds as (min, max), `None` for an empty mesh
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p))),
        )
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                *self.positions.get(tri[0] as usize)?,
                *self.positions.get(tri[1] as usize)?,
                *self.positions.get(tri[2] as usize)?,
            ])
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, applied in XYZ order
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

#[derive(Clone, Debug)]
pub struct SceneObject {
    pub id: ObjectId,
    pub name: String,
    pub mesh: Arc<Mesh>,
    pub transform: Transform,
    pub color: Color,
}

#[derive(Clone, Debug)]
pub struct Scene {
    pub background: Background,
    pub lights: Vec<Light>,
    objects: Vec<SceneObject>,
    next_id: u64,
}

impl Scene {
    pub fn new(background: Color) -> Self {
        Self {
            background: Background::Color(background),
            lights: Vec::new(),
            objects: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, name: impl Into<String>, mesh: Arc<Mesh>) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.push(SceneObject {
            id,
            name: name.into(),
            mesh,
            transform: Transform::default(),
            color: Color::from_hex(0xb0b0b0),
        });
        id
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        let index = self.objects.iter().position(|o| o.id == id)?;
        Some(self.objects.remove(index))
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Lambert intensity for a surface with the given unit normal
    pub fn light_intensity(&self, normal: Vec3) -> f32 {
        self.lights
            .iter()
            .map(|light| match *light {
                Light::Ambient { intensity, .. } => intensity,
                Light::Directional {
                    intensity,
                    direction,
                    ..
                } => intensity * normal.dot(direction.normalize_or_zero()).max(0.0),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Arc<Mesh> {
        Arc::new(Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 2],
        })
    }

    #[test]
    fn add_and_remove_objects() {
        let mut scene = Scene::new(Color::BLACK);
        let a = scene.add("a", triangle());
        let b = scene.add("b", triangle());
        assert_ne!(a, b);
        assert_eq!(scene.len(), 2);

        assert_eq!(scene.remove(a).unwrap().name, "a");
        assert!(scene.remove(a).is_none());
        assert_eq!(scene.objects()[0].id, b);
    }

    #[test]
    fn transform_applies_scale_then_rotation() {
        let t = Transform {
            rotation: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            scale: Vec3::splat(0.1),
            ..Default::default()
        };
        let p = t.matrix().transform_point3(Vec3::new(10.0, 0.0, 0.0));
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
    }

    #[test]
    fn mesh_bounds_and_triangles() {
        let mesh = Mesh {
            positions: vec![Vec3::new(-1.0, 2.0, 0.0), Vec3::new(3.0, -4.0, 5.0), Vec3::ZERO],
            indices: vec![0, 1, 2, 0, 1, 9],
        };
        let (lo, hi) = mesh.bounds().unwrap();
        assert_eq!(lo, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(hi, Vec3::new(3.0, 2.0, 5.0));
        assert_eq!(mesh.triangles().count(), 1);
        assert!(Mesh::default().bounds().is_none());
    }

    #[test]
    fn ambient_plus_directional_lighting() {
        let mut scene = Scene::new(Color::BLACK);
        scene.lights.push(Light::Ambient {
            color: Color::WHITE,
            intensity: 0.5,
        });
        scene.lights.push(Light::Directional {
            color: Color::WHITE,
            intensity: 0.5,
            direction: Vec3::Z,
        });
        assert!((scene.light_intensity(Vec3::Z) - 1.0).abs() < 1e-6);
        assert!((scene.light_intensity(-Vec3::Z) - 0.5).abs() < 1e-6);
    }
}
