// SPDX-License-Identifier: CEPL-1.0
use ember_math::glam::Vec3;
use ember_platform::WindowDesc;
use ember_render::{CameraDesc, RendererDesc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Ember".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let (vertex_shader, fragment_shader) = ember_render_vk::default_shader_paths();
        RenderCfg {
            clear_color: [0.20, 0.10, 0.40, 1.0],
            vertex_shader,
            fragment_shader,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CameraCfg {
    pub fov_y_degrees: f32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub near: f32,
    pub far: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let d = CameraDesc::default();
        CameraCfg {
            fov_y_degrees: d.fov_y_degrees,
            eye: d.eye.to_array(),
            target: d.target.to_array(),
            near: d.near,
            far: d.far,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SceneCfg {
    /// Rotation of the scene about +Z; 0 keeps it still.
    pub spin_degrees_per_second: f32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        SceneCfg {
            spin_degrees_per_second: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub camera: CameraCfg,
    pub scene: SceneCfg,
}

impl AppCfg {
    pub fn window_desc(&self) -> WindowDesc {
        WindowDesc {
            title: self.window.title.clone(),
            width: self.window.width.max(1),
            height: self.window.height.max(1),
        }
    }

    pub fn renderer_desc(&self) -> RendererDesc {
        RendererDesc {
            clear_color: self.render.clear_color,
            vertex_shader: self.render.vertex_shader.clone(),
            fragment_shader: self.render.fragment_shader.clone(),
            camera: CameraDesc {
                fov_y_degrees: self.camera.fov_y_degrees,
                eye: Vec3::from_array(self.camera.eye),
                target: Vec3::from_array(self.camera.target),
                up: Vec3::Y,
                near: self.camera.near,
                far: self.camera.far,
            },
        }
    }
}

/// Missing file → defaults; unreadable or malformed file → warning + defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

pub fn parse_cfg(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.clear_color, [0.20, 0.10, 0.40, 1.0]);
        assert_eq!(cfg.camera.fov_y_degrees, 45.0);
        assert_eq!(cfg.camera.eye, [1.0, 1.0, 4.0]);
        assert!(cfg.render.vertex_shader.ends_with("mesh.vert.spv"));
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg = parse_cfg(
            r#"
[window]
title = "quads"

[render]
clear_color = [0.0, 0.0, 0.0, 1.0]
fragment_shader = "custom/frag.spv"

[scene]
spin_degrees_per_second = 0.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "quads");
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.fragment_shader, PathBuf::from("custom/frag.spv"));
        assert!(cfg.render.vertex_shader.ends_with("mesh.vert.spv"));
        assert_eq!(cfg.scene.spin_degrees_per_second, 0.0);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(parse_cfg("[window\nwidth = ").is_err());
        assert!(parse_cfg("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("this/file/does/not/exist.toml"));
        assert_eq!(cfg.window.title, "Ember");
    }

    #[test]
    fn descriptors_carry_config_values() {
        let mut cfg = AppCfg::default();
        cfg.window.height = 0;
        cfg.camera.eye = [0.0, 0.0, 5.0];
        assert_eq!(cfg.window_desc().height, 1);
        let desc = cfg.renderer_desc();
        assert_eq!(desc.camera.eye, Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(desc.camera.up, Vec3::Y);
        assert_eq!(desc.clear_color, cfg.render.clear_color);
    }
}
