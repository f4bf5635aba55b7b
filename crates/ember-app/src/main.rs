// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod application;
mod assets;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::init_tracing;
use ember_render::{RenderSize, Renderer};
use ember_render_vk::VkRenderer;
use tracing::{error, info};

use ember_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use application::Application;
use config::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Wavefront OBJ to display instead of the built-in cube
    #[arg(long)]
    model: Option<PathBuf>,
    /// Texture image to apply instead of the checkerboard
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Enable the Khronos validation layer
    #[arg(long, overrides_with = "no_validation")]
    validation: bool,
    #[arg(long, overrides_with = "validation")]
    no_validation: bool,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
}

impl Args {
    /// Command-line flags win over the config file.
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some(m) = &self.model {
            cfg.assets.model = Some(m.clone());
        }
        if let Some(t) = &self.texture {
            cfg.assets.texture = Some(t.clone());
        }
        if self.validation {
            cfg.render.validation = true;
        }
        if self.no_validation {
            cfg.render.validation = false;
        }
        if let Some(w) = self.width {
            cfg.window.width = w;
        }
        if let Some(h) = self.height {
            cfg.window.height = h;
        }
    }
}

struct App {
    cfg: AppConfig,
    // Field order: the renderer goes before the window it presents to.
    app: Option<Application<VkRenderer>>,
    window: Option<Window>,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;

        let size = window.inner_size();
        let render_size = RenderSize::new(size.width, size.height);
        let scene = assets::load_scene(&self.cfg.assets)?;
        let renderer = VkRenderer::new(
            &window,
            &window,
            render_size,
            &self.cfg.renderer_config(),
            &scene,
        )?;
        info!(width = size.width, height = size.height, "window ready");

        self.app = Some(Application::new(renderer, render_size));
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        // device idle + reverse-order destruction happens in VkRenderer::drop
        self.app = None;
        self.window = None;
        event_loop.exit();
    }

    /// Stops the loop; `main` reports the error and exits non-zero.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        self.fatal = Some(e);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(window), Some(app)) = (&self.window, &mut self.app) else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                if window.is_minimized() == Some(true) {
                    app.on_window_minimized();
                } else {
                    app.on_window_restored();
                }
                app.on_window_resized(new_size.width, new_size.height);
            }

            WindowEvent::Focused(false) => app.on_focus_lost(),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let down = event.state == ElementState::Pressed;
                if code == KeyCode::Escape && down {
                    self.shutdown(event_loop);
                    return;
                }
                app.on_key_event(code, down);
            }

            WindowEvent::RedrawRequested => match app.tick() {
                Ok(Some(outcome)) if outcome.presented() => {
                    self.frames = self.frames.saturating_add(1);
                }
                Ok(_) => {}
                Err(e) => self.fail(event_loop, e.context("render")),
            },

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(app)) = (&self.window, &self.app) else {
            return;
        };
        if app.is_paused() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        // Pacing comes from the present mode; the loop itself never sleeps.
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut cfg = AppConfig::load(&args.config);
    args.apply(&mut cfg);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        app: None,
        window: None,
        fatal: None,
        frames: 0,
        last_fps_instant: Instant::now(),
    };
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
