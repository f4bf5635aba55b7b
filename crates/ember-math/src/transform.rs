// SPDX-License-Identifier: CEPL-1.0
use glam::Mat4;

/// Radians per elapsed millisecond of the reference spin.
pub const ROTATION_RATE: f64 = 0.0002 * std::f64::consts::PI;

/// Time-driven model transform shared by every mesh: Y spin followed by Z spin.
///
/// The angle is reduced modulo a full turn in `f64` first, so long sessions
/// keep full `f32` precision and the motion stays continuous.
pub fn model_rotation(elapsed_ms: u64) -> Mat4 {
    let theta = (ROTATION_RATE * elapsed_ms as f64).rem_euclid(std::f64::consts::TAU) as f32;
    Mat4::from_rotation_z(theta) * Mat4::from_rotation_y(theta)
}

/// Column-vector convention: `clip = projection * view * model * position`.
pub fn combine_mvp(model: Mat4, view: Mat4, projection: Mat4) -> Mat4 {
    projection * view * model
}
