//! Plane and scene configuration.
//!
//! Both structs deserialize from JSON with `camelCase` keys, matching the
//! option objects a page script hands to its planes:
//!
//! ```ignore
//! let params = PlaneParams::from_json_str(r#"{
//!     "widthSegments": 30,
//!     "heightSegments": 20,
//!     "autoloadSources": false,
//!     "uniforms": { "time": { "name": "uTime", "type": "1f", "value": 0 } }
//! }"#)?;
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glam::Vec3;
use serde::Deserialize;

use crate::error::{DrapeError, Result};
use crate::plane::PlaneElement;
use crate::uniform::{UniformDecl, UniformValue, Uniforms};

/// Attributes every plane vertex shader has to declare.
pub const DEFAULT_REQUIRED_ATTRIBUTES: [&str; 2] = ["aVertexPosition", "aTextureCoord"];

/// Vertex shader used when a plane does not supply one.
pub const DEFAULT_VERTEX_SHADER: &str = "\
precision mediump float;
attribute vec3 aVertexPosition;
attribute vec2 aTextureCoord;
uniform mat4 uMVMatrix;
uniform mat4 uPMatrix;
varying vec3 vVertexPosition;
varying vec2 vTextureCoord;
void main() {
    vTextureCoord = aTextureCoord;
    vVertexPosition = aVertexPosition;
    gl_Position = uPMatrix * uMVMatrix * vec4(aVertexPosition, 1.0);
}
";

/// Per-plane configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneParams {
    #[serde(default)]
    pub vertex_shader: Option<String>,
    #[serde(default)]
    pub fragment_shader: Option<String>,
    #[serde(default = "PlaneParams::default_segments")]
    pub width_segments: u32,
    #[serde(default = "PlaneParams::default_segments")]
    pub height_segments: u32,
    /// Register and bind the element's declared sources automatically.
    #[serde(default = "PlaneParams::default_autoload")]
    pub autoload_sources: bool,
    #[serde(default = "PlaneParams::default_fov")]
    pub fov: f32,
    /// Initial rotation around the z axis, in radians.
    #[serde(default)]
    pub rotation_z: f32,
    /// (0, 0) is the top-left corner, (1, 1) the bottom-right corner.
    #[serde(default = "PlaneParams::default_transform_origin")]
    pub transform_origin: Vec3,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformDecl>,
    #[serde(default = "PlaneParams::default_required_attributes")]
    pub required_attributes: Vec<String>,
}

impl Default for PlaneParams {
    fn default() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            width_segments: Self::default_segments(),
            height_segments: Self::default_segments(),
            autoload_sources: Self::default_autoload(),
            fov: Self::default_fov(),
            rotation_z: 0.0,
            transform_origin: Self::default_transform_origin(),
            uniforms: BTreeMap::new(),
            required_attributes: Self::default_required_attributes(),
        }
    }
}

impl PlaneParams {
    const fn default_segments() -> u32 {
        1
    }

    const fn default_autoload() -> bool {
        true
    }

    const fn default_fov() -> f32 {
        50.0
    }

    fn default_transform_origin() -> Vec3 {
        Vec3::new(0.5, 0.5, 0.0)
    }

    fn default_required_attributes() -> Vec<String> {
        DEFAULT_REQUIRED_ATTRIBUTES.iter().map(|s| s.to_string()).collect()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Add a uniform declaration, builder style.
    pub fn uniform(mut self, key: &str, name: &str, kind: &str, value: serde_json::Value) -> Self {
        self.uniforms.insert(
            key.to_string(),
            UniformDecl {
                name: name.to_string(),
                kind: kind.to_string(),
                value,
            },
        );
        self
    }

    pub fn segments(mut self, width: u32, height: u32) -> Self {
        self.width_segments = width;
        self.height_segments = height;
        self
    }

    pub fn autoload(mut self, autoload: bool) -> Self {
        self.autoload_sources = autoload;
        self
    }

    pub fn vertex_shader(mut self, source: impl Into<String>) -> Self {
        self.vertex_shader = Some(source.into());
        self
    }

    /// The vertex shader that will actually be used.
    pub fn effective_vertex_shader(&self) -> &str {
        match self.vertex_shader.as_deref() {
            Some(source) if !source.trim().is_empty() => source,
            _ => DEFAULT_VERTEX_SHADER,
        }
    }

    /// Check the configuration and build the initial uniform set.
    ///
    /// `plane` is only used to label errors.
    pub fn validate(&self, plane: &str) -> Result<Uniforms> {
        if self.width_segments == 0 || self.height_segments == 0 {
            return Err(DrapeError::invalid_config(
                plane,
                format!(
                    "segments must be non-zero, got {}x{}",
                    self.width_segments, self.height_segments
                ),
            ));
        }

        let shader = self.effective_vertex_shader();
        if let Some(missing) = self
            .required_attributes
            .iter()
            .find(|attr| !shader.contains(attr.as_str()))
        {
            return Err(DrapeError::invalid_config(
                plane,
                format!("vertex shader does not declare attribute '{missing}'"),
            ));
        }

        let mut uniforms = Uniforms::new();
        for (key, decl) in &self.uniforms {
            let value = UniformValue::parse(&decl.kind, &decl.value)
                .map_err(|reason| DrapeError::invalid_config(plane, format!("uniform '{key}': {reason}")))?;
            uniforms.insert(key.clone(), decl.name.clone(), value);
        }
        Ok(uniforms)
    }
}

/// Scene-wide tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneConfig {
    /// Distance to the target under which damped transitions snap.
    #[serde(default = "SceneConfig::default_snap_threshold")]
    pub snap_threshold: f32,
    #[serde(default = "SceneConfig::default_damping")]
    pub default_damping: f32,
    /// Frames to wait between a rebuild request and the rebuild itself.
    /// `None` waits for [`Scene::content_transition_finished`](crate::Scene::content_transition_finished).
    #[serde(default)]
    pub rebuild_delay_frames: Option<u32>,
    /// Submit draws right away. Can be toggled at runtime.
    #[serde(default = "SceneConfig::default_draw")]
    pub draw_enabled: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            snap_threshold: Self::default_snap_threshold(),
            default_damping: Self::default_damping(),
            rebuild_delay_frames: None,
            draw_enabled: Self::default_draw(),
        }
    }
}

impl SceneConfig {
    const fn default_snap_threshold() -> f32 {
        1.0
    }

    const fn default_damping() -> f32 {
        0.05
    }

    const fn default_draw() -> bool {
        true
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A page worth of planes: what the content boundary hands over on (re)build.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescription {
    #[serde(default)]
    pub params: PlaneParams,
    #[serde(default)]
    pub planes: Vec<PlaneElement>,
}

impl PageDescription {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Every source declared by every plane, deduplicated, in page order.
    pub fn sources(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for element in &self.planes {
            for decl in &element.sources {
                if !out.contains(&decl.src) {
                    out.push(decl.src.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_object() {
        let params = PlaneParams::from_json_str("{}").unwrap();
        assert_eq!(params.width_segments, 1);
        assert!(params.autoload_sources);
        assert_eq!(params.transform_origin, Vec3::new(0.5, 0.5, 0.0));
        assert!(params.validate("p").unwrap().is_empty());
    }

    #[test]
    fn parses_camel_case_params() {
        let params = PlaneParams::from_json_str(
            r#"{
                "widthSegments": 30,
                "heightSegments": 20,
                "autoloadSources": false,
                "uniforms": { "time": { "name": "uTime", "type": "1f", "value": 0 } }
            }"#,
        )
        .unwrap();
        assert_eq!((params.width_segments, params.height_segments), (30, 20));
        assert!(!params.autoload_sources);
        let uniforms = params.validate("p").unwrap();
        assert_eq!(uniforms.float("time"), Some(0.0));
    }

    #[test]
    fn missing_attribute_is_invalid_config() {
        let params = PlaneParams::default().vertex_shader("void main() {}");
        let err = params.validate("plane-1").unwrap_err();
        assert!(matches!(err, DrapeError::InvalidConfig { ref plane, .. } if plane == "plane-1"));
    }

    #[test]
    fn zero_segments_and_bad_uniforms_are_rejected() {
        assert!(PlaneParams::default().segments(0, 4).validate("p").is_err());
        let params = PlaneParams::default().uniform("x", "uX", "7z", serde_json::Value::Null);
        assert!(params.validate("p").is_err());
    }

    #[test]
    fn scene_config_defaults() {
        let config = SceneConfig::from_json_str(r#"{ "rebuildDelayFrames": 45 }"#).unwrap();
        assert_eq!(config.rebuild_delay_frames, Some(45));
        assert_eq!(config.snap_threshold, 1.0);
        assert!(config.draw_enabled);
    }
}
