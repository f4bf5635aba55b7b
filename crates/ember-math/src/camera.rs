// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Mat4, Vec3};

/// Units per second.
pub const MOVE_SPEED: f32 = 5.0;
/// Focus-point units per second when turning.
pub const TURN_SPEED: f32 = std::f32::consts::PI;
pub const FOV_Y_DEGREES: f32 = 90.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 100.0;

const FORWARD: Vec3 = Vec3::Z;
const RIGHT: Vec3 = Vec3::X;
const UP: Vec3 = Vec3::Y;

bitflags! {
    /// Camera actions currently held down.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CameraInput: u16 {
        const MOVE_FORWARD = 1 << 0;
        const MOVE_BACK    = 1 << 1;
        const MOVE_LEFT    = 1 << 2;
        const MOVE_RIGHT   = 1 << 3;
        const RAISE        = 1 << 4;
        const LOWER        = 1 << 5;
        const LOOK_UP      = 1 << 6;
        const LOOK_DOWN    = 1 << 7;
        const TURN_LEFT    = 1 << 8;
        const TURN_RIGHT   = 1 << 9;
    }
}

/// Left-handed look-at camera producing Vulkan-ready view and projection matrices.
#[derive(Clone, Debug)]
pub struct Camera {
    eye: Vec3,
    focus: Vec3,
    aspect: f32,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        let mut cam = Self {
            eye: Vec3::new(0.0, 0.0, -3.0),
            focus: Vec3::ZERO,
            aspect: 1.0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        cam.set_aspect(aspect);
        cam.rebuild_view();
        cam
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn focus(&self) -> Vec3 {
        self.focus
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Rebuilds the projection for a new width/height ratio.
    /// Non-finite or non-positive ratios (a minimised window) are ignored.
    pub fn set_aspect(&mut self, aspect: f32) {
        if !aspect.is_finite() || aspect <= 0.0 {
            return;
        }
        self.aspect = aspect;
        let mut proj =
            Mat4::perspective_lh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        // Vulkan clip space has +Y pointing down.
        proj.y_axis.y *= -1.0;
        self.projection = proj;
    }

    /// Applies held actions for `delta_ms` and refreshes the view matrix.
    pub fn update(&mut self, input: CameraInput, delta_ms: u64) {
        let dt = delta_ms as f32 / 1000.0;
        let step = MOVE_SPEED * dt;
        let turn = TURN_SPEED * dt;

        if input.contains(CameraInput::MOVE_FORWARD) {
            self.eye += FORWARD * step;
        }
        if input.contains(CameraInput::MOVE_BACK) {
            self.eye -= FORWARD * step;
        }
        if input.contains(CameraInput::MOVE_RIGHT) {
            self.focus += RIGHT * step;
        }
        if input.contains(CameraInput::MOVE_LEFT) {
            self.focus -= RIGHT * step;
        }
        if input.contains(CameraInput::RAISE) {
            self.eye += UP * step;
            self.focus += UP * step;
        }
        if input.contains(CameraInput::LOWER) {
            self.eye -= UP * step;
            self.focus -= UP * step;
        }
        if input.contains(CameraInput::TURN_RIGHT) {
            self.focus += RIGHT * turn;
        }
        if input.contains(CameraInput::TURN_LEFT) {
            self.focus -= RIGHT * turn;
        }
        if input.contains(CameraInput::LOOK_UP) {
            self.focus += UP * turn;
        }
        if input.contains(CameraInput::LOOK_DOWN) {
            self.focus -= UP * turn;
        }

        self.rebuild_view();
    }

    fn rebuild_view(&mut self) {
        // look_at_lh degenerates when eye == focus; keep the last good view.
        if self.eye.abs_diff_eq(self.focus, 1e-6) {
            return;
        }
        self.view = Mat4::look_at_lh(self.eye, self.focus, UP);
    }
}
