//! Uniform data shared with the vertex shader.
//!
//! The layout matches `layout(binding = 0) uniform UniformBufferObject` in
//! `shaders/*.vert`: three column-major `mat4` with no padding.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-drawable, per-image uniform block.
///
/// # Memory Layout
///
/// - Offset 0: model (64 bytes)
/// - Offset 64: view (64 bytes)
/// - Offset 128: projection (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model,
            view,
            projection,
        }
    }
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Near/far planes of the orthographic volume.
const ORTHO_DEPTH: f32 = 100.0;

/// Projection applied to every drawable. Recomputed from the swapchain aspect
/// ratio each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Projection {
    #[default]
    /// Unit-height box widened to the aspect ratio (or unit-width box made
    /// taller when the window is portrait).
    Orthographic,
    /// Right-handed perspective. `fov_y` is in radians.
    Perspective { fov_y: f32, near: f32, far: f32 },
}

impl Projection {
    /// Clip-space matrix for `aspect` (width / height), with Y pointing down
    /// as Vulkan expects.
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        let mut projection = match *self {
            Projection::Orthographic => orthographic_for_aspect(aspect),
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, aspect, near, far)
            }
        };
        projection.y_axis.y *= -1.0;
        projection
    }
}

fn orthographic_for_aspect(aspect: f32) -> Mat4 {
    if aspect >= 1.0 {
        Mat4::orthographic_rh(-aspect, aspect, -1.0, 1.0, -ORTHO_DEPTH, ORTHO_DEPTH)
    } else {
        let inv = 1.0 / aspect;
        Mat4::orthographic_rh(-1.0, 1.0, -inv, inv, -ORTHO_DEPTH, ORTHO_DEPTH)
    }
}

/// Camera placement. `Identity` leaves world space as view space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum View {
    #[default]
    Identity,
    LookAt { eye: Vec3, target: Vec3, up: Vec3 },
}

impl View {
    pub fn matrix(&self) -> Mat4 {
        match *self {
            View::Identity => Mat4::IDENTITY,
            View::LookAt { eye, target, up } => Mat4::look_at_rh(eye, target, up),
        }
    }
}

/// `width / height`, or 1.0 for a degenerate extent.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_ubo_size_and_alignment() {
        assert_eq!(UniformBufferObject::SIZE, 192);
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
    }

    #[test]
    fn test_ubo_field_offsets() {
        let ubo = UniformBufferObject::new(
            Mat4::from_scale(Vec3::splat(2.0)),
            Mat4::IDENTITY,
            Mat4::from_scale(Vec3::splat(3.0)),
        );
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&ubo));
        assert_eq!(floats.len(), 48);
        assert_eq!(floats[0], 2.0);
        assert_eq!(floats[16], 1.0);
        assert_eq!(floats[32], 3.0);
    }

    #[test]
    fn test_orthographic_flips_y() {
        let projection = Projection::Orthographic.matrix(1.0);
        let top = projection * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!((top.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthographic_widens_for_landscape() {
        let projection = Projection::Orthographic.matrix(2.0);
        let right = projection * Vec4::new(2.0, 0.0, 0.0, 1.0);
        assert!((right.x - 1.0).abs() < 1e-6);

        let top = projection * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!((top.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthographic_heightens_for_portrait() {
        let projection = Projection::Orthographic.matrix(0.5);
        let right = projection * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((right.x - 1.0).abs() < 1e-6);

        let top = projection * Vec4::new(0.0, 2.0, 0.0, 1.0);
        assert!((top.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_perspective_flips_y() {
        let perspective = Projection::Perspective {
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        };
        let unflipped = Mat4::perspective_rh(60f32.to_radians(), 1.5, 0.1, 100.0);
        let flipped = perspective.matrix(1.5);
        assert_eq!(flipped.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(flipped.x_axis, unflipped.x_axis);
    }

    #[test]
    fn test_view_matrices() {
        assert_eq!(View::Identity.matrix(), Mat4::IDENTITY);

        let view = View::LookAt {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
        };
        let origin = view.matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z + 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_aspect_ratio_degenerate() {
        assert_eq!(aspect_ratio(800, 600), 800.0 / 600.0);
        assert_eq!(aspect_ratio(0, 600), 1.0);
        assert_eq!(aspect_ratio(800, 0), 1.0);
    }
}
