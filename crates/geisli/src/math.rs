//! Math types and glam re-exports.
//!
//! We re-export [glam](https://docs.rs/glam) types so the rest of the crate
//! doesn't depend on it directly. [`Bounds`] is the axis-aligned box used
//! throughout the mesh preprocessor, and [`look_at_camera`] builds the
//! device-side camera basis from a position/view/up triple.

pub use glam::{Affine3A, Vec3, Vec4};

use crate::layout::Camera;

/// An axis-aligned bounding box.
///
/// Starts out *inverted* (`min = +inf`, `max = -inf`) so that the first
/// [`insert`](Bounds::insert) produces a degenerate box around that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// The empty (inverted) box. Inserting any point makes it valid.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Grow the box to contain `point`.
    pub fn insert(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// The union of two boxes.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Per-axis extent. Negative on an empty box.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index (0 = x, 1 = y, 2 = z) of the axis with the largest extent.
    pub fn widest_axis(&self) -> usize {
        let e = self.extent();
        if e.x > e.y && e.x > e.z {
            0
        } else if e.y > e.z {
            1
        } else {
            2
        }
    }

    /// True if `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// True if `point` lies inside the box (inclusive).
    pub fn contains(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && self.max.cmpge(point).all()
    }
}

/// Build a [`Camera`] looking from `pos` along `view`, with `up` fixing the
/// roll. `tan_fov` is the tangent of the half field of view measured across
/// the image diagonal.
///
/// The resulting `dx`/`dy` step one pixel along the image plane; `top_left`
/// is the direction through the top-left corner of pixel (0, 0).
pub fn look_at_camera(
    pos: Vec3,
    view: Vec3,
    up: Vec3,
    tan_fov: f32,
    width: u32,
    height: u32,
) -> Camera {
    let scale = tan_fov / ((width as f32) * (width as f32) + (height as f32) * (height as f32)).sqrt();
    let dir = view.normalize();
    let dx = scale * view.cross(up).normalize();
    let dy = dx.cross(dir);
    let top_left = dir - (width as f32 * dx + height as f32 * dy) / 2.0;

    Camera::new(pos, top_left, dx, dy, width, height)
}
