// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use anyhow::Result;
use ember_core::TimeManager;
use ember_math::Camera;
use ember_platform::winit::keyboard::KeyCode;
use ember_platform::InputManager;
use ember_render::{FrameInput, FrameOutcome, RenderSize, Renderer};
use tracing::{debug, info};

/// Root context: owns the clock, input, camera and renderer, and wires window events into them.
pub struct Application<R: Renderer> {
    renderer: R,
    time: TimeManager,
    input: InputManager,
    camera: Camera,
    size: RenderSize,
    minimized: bool,
}

impl<R: Renderer> Application<R> {
    pub fn new(renderer: R, size: RenderSize) -> Self {
        Self::starting_at(renderer, size, Instant::now())
    }

    pub fn starting_at(renderer: R, size: RenderSize, start: Instant) -> Self {
        Self {
            renderer,
            time: TimeManager::starting_at(start),
            input: InputManager::new(),
            camera: Camera::new(size.aspect().unwrap_or(1.0)),
            size,
            minimized: false,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn is_paused(&self) -> bool {
        self.minimized || self.size.is_empty()
    }

    pub fn tick(&mut self) -> Result<Option<FrameOutcome>> {
        self.tick_at(Instant::now())
    }

    /// `None` while paused; the clock still advances so nothing jumps on restore.
    pub fn tick_at(&mut self, now: Instant) -> Result<Option<FrameOutcome>> {
        let delta_ms = self.time.tick_at(now);
        if self.is_paused() {
            return Ok(None);
        }
        self.camera.update(self.input.state(), delta_ms);
        let frame = FrameInput {
            elapsed_ms: self.time.elapsed_ms(),
            delta_ms,
            view: self.camera.view(),
            projection: self.camera.projection(),
        };
        self.renderer.render(&frame).map(Some)
    }

    pub fn on_window_resized(&mut self, width: u32, height: u32) {
        let size = RenderSize::new(width, height);
        if size == self.size {
            return;
        }
        let was_paused = self.is_paused();
        self.size = size;
        if let Some(aspect) = size.aspect() {
            self.renderer.on_window_resized(size);
            self.camera.set_aspect(aspect);
        }
        if was_paused != self.is_paused() {
            info!(width, height, paused = self.is_paused(), "pause state changed");
        } else {
            debug!(width, height, "window resized");
        }
    }

    pub fn on_window_minimized(&mut self) {
        self.minimized = true;
    }

    pub fn on_window_restored(&mut self) {
        self.minimized = false;
    }

    pub fn on_key_event(&mut self, code: KeyCode, is_down: bool) -> bool {
        self.input.on_key(code, is_down)
    }

    /// Keys held while focus was lost would otherwise stay pressed.
    pub fn on_focus_lost(&mut self) {
        self.input.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ember_render::{RendererConfig, SceneAssets};
    use ember_platform::winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

    #[derive(Default)]
    struct FakeRenderer {
        frames: Vec<FrameInput>,
        resizes: Vec<RenderSize>,
    }

    impl Renderer for FakeRenderer {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            _size: RenderSize,
            _config: &RendererConfig,
            _scene: &SceneAssets,
        ) -> Result<Self> {
            Ok(Self::default())
        }

        fn on_window_resized(&mut self, size: RenderSize) {
            self.resizes.push(size);
        }

        fn render(&mut self, frame: &FrameInput) -> Result<FrameOutcome> {
            self.frames.push(*frame);
            Ok(FrameOutcome::Presented)
        }

        fn set_clear_color(&mut self, _rgba: [f32; 4]) {}
    }

    fn app(w: u32, h: u32) -> (Application<FakeRenderer>, Instant) {
        let t0 = Instant::now();
        let app = Application::starting_at(FakeRenderer::default(), RenderSize::new(w, h), t0);
        (app, t0)
    }

    #[test]
    fn tick_renders_with_elapsed_and_delta() {
        let (mut app, t0) = app(800, 600);
        let out = app.tick_at(t0 + Duration::from_millis(16)).unwrap();
        assert_eq!(out, Some(FrameOutcome::Presented));
        app.tick_at(t0 + Duration::from_millis(40)).unwrap();

        let frames = &app.renderer().frames;
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[1].elapsed_ms, frames[1].delta_ms), (40, 24));
        assert_eq!(frames[1].projection, app.camera().projection());
    }

    #[test]
    fn zero_size_pauses_and_is_not_forwarded() {
        let (mut app, t0) = app(800, 600);
        app.on_window_resized(0, 600);
        assert!(app.is_paused());
        assert_eq!(app.tick_at(t0 + Duration::from_millis(5)).unwrap(), None);
        assert!(app.renderer().frames.is_empty());
        assert!(app.renderer().resizes.is_empty());

        app.on_window_resized(1024, 512);
        assert!(!app.is_paused());
        assert_eq!(app.renderer().resizes, vec![RenderSize::new(1024, 512)]);
        assert_eq!(app.camera().aspect(), 2.0);
        assert!(app.tick_at(t0 + Duration::from_millis(10)).unwrap().is_some());
    }

    #[test]
    fn same_size_is_not_a_resize() {
        let (mut app, _) = app(800, 600);
        app.on_window_resized(800, 600);
        assert!(app.renderer().resizes.is_empty());
    }

    #[test]
    fn minimise_and_restore_toggle_pause() {
        let (mut app, t0) = app(800, 600);
        app.on_window_minimized();
        assert_eq!(app.tick_at(t0 + Duration::from_millis(100)).unwrap(), None);
        app.on_window_restored();
        app.tick_at(t0 + Duration::from_millis(116)).unwrap();
        // the paused interval is not replayed as one huge delta
        assert_eq!(app.renderer().frames[0].delta_ms, 16);
    }

    #[test]
    fn held_key_moves_the_camera() {
        let (mut app, t0) = app(800, 600);
        let before = app.camera().view();
        assert!(app.on_key_event(KeyCode::KeyW, true));
        app.tick_at(t0 + Duration::from_millis(100)).unwrap();
        assert_ne!(app.camera().view(), before);
        assert_eq!(app.renderer().frames[0].view, app.camera().view());

        app.on_focus_lost();
        let after = app.camera().view();
        app.tick_at(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(app.camera().view(), after);
    }
}
