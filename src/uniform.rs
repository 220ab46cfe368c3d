//! Typed uniform values attached to planes.
//!
//! Planes declare their uniforms in [`PlaneParams`](crate::PlaneParams) using
//! the same short type codes a WebGL shader author would use:
//!
//! | Code   | Value                 |
//! |--------|-----------------------|
//! | `1f`   | `f32`                 |
//! | `1i`   | `i32`                 |
//! | `2f`   | [`Vec2`]              |
//! | `3f`   | [`Vec3`]              |
//! | `4f`   | [`Vec4`]              |
//! | `mat4` | [`Mat4`] (column-major) |
//!
//! Values are packed with 16-byte alignment per entry so a backend can copy
//! [`Uniforms::packed`] straight into a uniform buffer.

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::Deserialize;

/// A single typed uniform value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// The type code used in plane configuration.
    pub fn type_code(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "1f",
            UniformValue::Int(_) => "1i",
            UniformValue::Vec2(_) => "2f",
            UniformValue::Vec3(_) => "3f",
            UniformValue::Vec4(_) => "4f",
            UniformValue::Mat4(_) => "mat4",
        }
    }

    /// Zero value for a type code, or `None` if the code is unknown.
    pub fn zero(type_code: &str) -> Option<Self> {
        Some(match type_code {
            "1f" => UniformValue::Float(0.0),
            "1i" => UniformValue::Int(0),
            "2f" => UniformValue::Vec2(Vec2::ZERO),
            "3f" => UniformValue::Vec3(Vec3::ZERO),
            "4f" => UniformValue::Vec4(Vec4::ZERO),
            "mat4" => UniformValue::Mat4(Mat4::IDENTITY),
            _ => return None,
        })
    }

    /// Parse a JSON value according to a type code.
    pub fn parse(type_code: &str, value: &serde_json::Value) -> Result<Self, String> {
        let zero = Self::zero(type_code).ok_or_else(|| format!("unknown uniform type '{type_code}'"))?;
        if value.is_null() {
            return Ok(zero);
        }

        let floats = |expected: usize| -> Result<Vec<f32>, String> {
            let items = value
                .as_array()
                .ok_or_else(|| format!("type '{type_code}' expects an array of {expected} numbers"))?;
            if items.len() != expected {
                return Err(format!(
                    "type '{type_code}' expects {expected} components, got {}",
                    items.len()
                ));
            }
            items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| format!("non-numeric component in '{type_code}' value"))
                })
                .collect()
        };

        match zero {
            UniformValue::Float(_) => value
                .as_f64()
                .map(|f| UniformValue::Float(f as f32))
                .ok_or_else(|| "type '1f' expects a number".to_string()),
            UniformValue::Int(_) => value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(UniformValue::Int)
                .ok_or_else(|| "type '1i' expects an integer".to_string()),
            UniformValue::Vec2(_) => floats(2).map(|v| UniformValue::Vec2(Vec2::from_slice(&v))),
            UniformValue::Vec3(_) => floats(3).map(|v| UniformValue::Vec3(Vec3::from_slice(&v))),
            UniformValue::Vec4(_) => floats(4).map(|v| UniformValue::Vec4(Vec4::from_slice(&v))),
            UniformValue::Mat4(_) => floats(16).map(|v| UniformValue::Mat4(Mat4::from_cols_slice(&v))),
        }
    }

    /// Returns `true` if `other` carries the same type.
    pub fn same_type(&self, other: &UniformValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Append the value to `out`, padded to a 16-byte boundary.
    fn write_padded(&self, out: &mut Vec<u8>) {
        let start = out.len();
        match self {
            UniformValue::Float(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Int(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => out.extend_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => out.extend_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => out.extend_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat4(m) => out.extend_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
        let written = out.len() - start;
        let padded = written.div_ceil(16) * 16;
        out.resize(start + padded, 0);
    }
}

/// Uniform declaration as written in plane configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct UniformDecl {
    /// Name of the uniform in the shader (e.g. `uTime`).
    pub name: String,
    /// Type code, see the module docs.
    #[serde(rename = "type")]
    pub kind: String,
    /// Initial value. Missing means zero.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// One uniform owned by a plane.
#[derive(Clone, Debug)]
pub struct Uniform {
    /// Key used from Rust code (e.g. `time`).
    pub key: String,
    /// Name the shader sees (e.g. `uTime`).
    pub name: String,
    pub value: UniformValue,
}

/// Ordered uniform set of a plane.
///
/// Order is declaration order so packed layouts are stable across frames.
#[derive(Clone, Debug, Default)]
pub struct Uniforms {
    entries: Vec<Uniform>,
}

impl Uniforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a uniform.
    pub fn insert(&mut self, key: impl Into<String>, name: impl Into<String>, value: UniformValue) {
        let key = key.into();
        let name = name.into();
        if let Some(existing) = self.entries.iter_mut().find(|u| u.key == key) {
            existing.name = name;
            existing.value = value;
        } else {
            self.entries.push(Uniform { key, name, value });
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&UniformValue> {
        self.entries.iter().find(|u| u.key == key).map(|u| &u.value)
    }

    /// Read a `1f` uniform.
    pub fn float(&self, key: &str) -> Option<f32> {
        match self.get(key) {
            Some(UniformValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Update an existing uniform.
    ///
    /// Returns `false` (and leaves the value untouched) if the key is unknown
    /// or the new value has a different type.
    pub fn set(&mut self, key: &str, value: UniformValue) -> bool {
        match self.entries.iter_mut().find(|u| u.key == key) {
            Some(entry) if entry.value.same_type(&value) => {
                entry.value = value;
                true
            }
            Some(entry) => {
                log::warn!(
                    "uniform '{}' is '{}', refusing '{}' value",
                    key,
                    entry.value.type_code(),
                    value.type_code()
                );
                false
            }
            None => false,
        }
    }

    /// Shorthand for setting a `1f` uniform.
    pub fn set_float(&mut self, key: &str, value: f32) -> bool {
        self.set(key, UniformValue::Float(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uniform> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pack all values in declaration order, 16-byte aligned.
    pub fn packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 16);
        for uniform in &self.entries {
            uniform.value.write_padded(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_scalar_and_vector_values() {
        assert_eq!(
            UniformValue::parse("1f", &json!(2.5)).unwrap(),
            UniformValue::Float(2.5)
        );
        assert_eq!(
            UniformValue::parse("3f", &json!([1.0, 2.0, 3.0])).unwrap(),
            UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(
            UniformValue::parse("1f", &serde_json::Value::Null).unwrap(),
            UniformValue::Float(0.0)
        );
    }

    #[test]
    fn rejects_unknown_types_and_bad_arity() {
        assert!(UniformValue::parse("9q", &json!(1)).is_err());
        assert!(UniformValue::parse("2f", &json!([1.0])).is_err());
        assert!(UniformValue::parse("1i", &json!("nope")).is_err());
    }

    #[test]
    fn set_refuses_type_change() {
        let mut uniforms = Uniforms::new();
        uniforms.insert("time", "uTime", UniformValue::Float(0.0));
        assert!(uniforms.set_float("time", 3.0));
        assert!(!uniforms.set("time", UniformValue::Int(1)));
        assert_eq!(uniforms.float("time"), Some(3.0));
        assert!(!uniforms.set_float("missing", 1.0));
    }

    #[test]
    fn packing_is_sixteen_byte_aligned() {
        let mut uniforms = Uniforms::new();
        uniforms.insert("a", "uA", UniformValue::Float(1.0));
        uniforms.insert("b", "uB", UniformValue::Vec3(Vec3::ONE));
        uniforms.insert("m", "uM", UniformValue::Mat4(Mat4::IDENTITY));
        assert_eq!(uniforms.packed().len(), 16 + 16 + 64);
    }
}
