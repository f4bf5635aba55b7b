// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod frames;
pub mod scene;
pub mod state;

pub use frames::{FrameRing, FrameRingError, SlotOwner};
pub use scene::{
    MeshData, SceneAssets, SceneError, ShaderSet, TextureData, Vertex, VertexAttribute,
    VertexFormat, VertexLayout,
};
pub use state::{FrameEvent, FrameState, InvalidTransition};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero dimension; nothing can be presented to it.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> Option<f32> {
        (!self.is_empty()).then(|| self.width as f32 / self.height as f32)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

/// Backend-independent renderer settings. Built by the app from its own config file.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncMode,
    pub frames_in_flight: usize,
    /// Upper bound on a single fence wait; exceeding it is treated as device loss.
    pub fence_timeout_ms: u64,
    pub blend: bool,
    pub require_discrete_gpu: bool,
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "ember".to_owned(),
            clear_color: [0.0, 0.2, 0.4, 1.0],
            vsync_mode: VsyncMode::Mailbox,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            fence_timeout_ms: 5_000,
            blend: false,
            require_discrete_gpu: true,
            validation: cfg!(debug_assertions),
        }
    }
}

/// Everything the core needs from the outside world for one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInput {
    pub elapsed_ms: u64,
    pub delta_ms: u64,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for FrameInput {
    fn default() -> Self {
        Self {
            elapsed_ms: 0,
            delta_ms: 0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// What happened to a `render` call. Stale surfaces are recovered internally and
/// reported here instead of as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Submitted, but acquire or present reported a stale surface. The swapchain has been
    /// rebuilt, or the rebuild waits for the surface to regain an area.
    PresentedStale,
    /// The surface was out of date before anything was submitted; rebuilt, frame dropped.
    Skipped,
    /// Zero-sized surface; nothing to draw into and no swapchain is created.
    Paused,
}

impl FrameOutcome {
    pub fn presented(self) -> bool {
        matches!(self, FrameOutcome::Presented | FrameOutcome::PresentedStale)
    }
}

/// Per-frame uniform block, `std140`-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MvpUniform {
    pub mvp: [[f32; 4]; 4],
}

impl MvpUniform {
    pub fn new(mvp: Mat4) -> Self {
        Self {
            mvp: mvp.to_cols_array_2d(),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
        scene: &SceneAssets,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records a new window size. The swapchain is rebuilt at the start of the next `render`.
    fn on_window_resized(&mut self, size: RenderSize);
    fn render(&mut self, frame: &FrameInput) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync_mode(&mut self, _mode: VsyncMode) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_size_aspect() {
        assert_eq!(RenderSize::new(800, 600).aspect(), Some(800.0 / 600.0));
        assert_eq!(RenderSize::new(0, 600).aspect(), None);
        assert!(RenderSize::new(640, 0).is_empty());
    }

    #[test]
    fn uniform_is_one_column_major_mat4() {
        assert_eq!(std::mem::size_of::<MvpUniform>(), 64);
        let m = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let u = MvpUniform::new(m);
        assert_eq!(u.mvp[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(bytemuck::bytes_of(&u).len(), 64);
    }

    #[test]
    fn outcome_presented() {
        assert!(FrameOutcome::PresentedStale.presented());
        assert!(!FrameOutcome::Skipped.presented());
        assert!(!FrameOutcome::Paused.presented());
    }
}
