// SPDX-License-Identifier: CEPL-1.0
pub mod camera;
pub mod transform;

pub use camera::{Camera, CameraInput};
pub use glam::{Mat4, Vec3, Vec4};
pub use transform::{combine_mvp, model_rotation};
