// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use ember_render::{RendererConfig, VsyncMode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub assets: AssetConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "ember".to_owned(),
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncSetting {
    Fifo,
    #[default]
    Mailbox,
}

impl From<VsyncSetting> for VsyncMode {
    fn from(v: VsyncSetting) -> Self {
        match v {
            VsyncSetting::Fifo => VsyncMode::Fifo,
            VsyncSetting::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncSetting,
    pub frames_in_flight: usize,
    /// `0` disables the timeout.
    pub fence_timeout_ms: u64,
    pub blend: bool,
    pub require_discrete_gpu: bool,
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let r = RendererConfig::default();
        Self {
            clear_color: r.clear_color,
            vsync_mode: VsyncSetting::default(),
            frames_in_flight: r.frames_in_flight,
            fence_timeout_ms: r.fence_timeout_ms,
            blend: r.blend,
            require_discrete_gpu: r.require_discrete_gpu,
            validation: r.validation,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Wavefront OBJ. The built-in cube when unset.
    pub model: Option<PathBuf>,
    /// Any format `image` decodes. A checkerboard when unset.
    pub texture: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            model: None,
            texture: None,
        }
    }
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Never fails: a missing file means defaults, a broken one is reported and ignored.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file; using defaults");
                return Self::default();
            }
        };
        match Self::parse(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed config; using defaults");
                Self::default()
            }
        }
    }

    pub fn renderer_config(&self) -> RendererConfig {
        let r = &self.render;
        RendererConfig {
            app_name: self.window.title.clone(),
            clear_color: r.clear_color,
            vsync_mode: r.vsync_mode.into(),
            frames_in_flight: r.frames_in_flight.max(1),
            fence_timeout_ms: r.fence_timeout_ms,
            blend: r.blend,
            require_discrete_gpu: r.require_discrete_gpu,
            validation: r.validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.window.width, 1920);
        assert_eq!(cfg.window.height, 1080);
        assert_eq!(cfg.render.clear_color, [0.0, 0.2, 0.4, 1.0]);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.fence_timeout_ms, 5000);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let cfg = AppConfig::parse(
            r#"
            [render]
            vsync_mode = "fifo"
            blend = true

            [assets]
            model = "models/teapot.obj"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.vsync_mode, VsyncSetting::Fifo);
        assert!(cfg.render.blend);
        assert!(cfg.render.require_discrete_gpu);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.window, WindowConfig::default());
        assert_eq!(cfg.assets.model, Some(PathBuf::from("models/teapot.obj")));
        assert_eq!(cfg.assets.vertex_shader, PathBuf::from("shaders/mesh.vert.spv"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(AppConfig::parse("[render]\nvsync_mode = \"sometimes\"").is_err());
        assert!(AppConfig::parse("[window\nwidth = 3").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = AppConfig::load(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn converts_to_renderer_config() {
        let mut cfg = AppConfig::default();
        cfg.render.vsync_mode = VsyncSetting::Fifo;
        cfg.render.frames_in_flight = 0;
        cfg.window.title = "demo".into();
        let r = cfg.renderer_config();
        assert_eq!(r.vsync_mode, VsyncMode::Fifo);
        assert_eq!(r.frames_in_flight, 1);
        assert_eq!(r.app_name, "demo");
    }
}
