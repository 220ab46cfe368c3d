//! The GPU boundary.
//!
//! Everything the scene needs from the graphics API goes through
//! [`GpuBackend`]: creating and destroying textures and plane geometry,
//! binding a texture to a named sampler of a plane, and submitting a draw with
//! the plane's current uniform values. Shader compilation and the actual render
//! pass live behind the backend.
//!
//! Two backends ship with the crate:
//!
//! - [`HeadlessGpu`] keeps handle tables in memory. It is what the tests and the
//!   demo binary run on, and it can simulate context loss.
//! - [`WgpuBackend`] owns a real `wgpu` device and uploads textures, vertex and
//!   uniform buffers to it.
//!
//! # Context loss
//!
//! A backend reports a lost context through [`GpuBackend::take_context_lost`].
//! Once lost, every handle it handed out is invalid and must not be destroyed;
//! the scene forgets them and recreates everything after
//! [`GpuBackend::restore`] succeeds.

mod context;
mod headless;
mod wgpu_backend;

pub use context::GpuContext;
pub use headless::{DrawRecord, HeadlessGpu};
pub use wgpu_backend::{QueuedDraw, WgpuBackend};

use glam::Mat4;
use thiserror::Error;

use crate::geometry::RawGeometry;
use crate::loader::ImageData;
use crate::plane::PlaneId;
use crate::uniform::Uniforms;

/// Errors reported by a GPU backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The context is lost or the driver is gone.
    #[error("gpu device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A handle from another context generation (or a destroyed one) was used.
    #[error("invalid gpu handle {0}")]
    InvalidHandle(u64),
    /// Pixel or buffer upload failed.
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Backend-issued texture handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// Wrap a backend-specific raw id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Backend-issued handle to a plane's geometry and uniform storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryHandle(u64);

impl GeometryHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Everything a backend needs to draw one plane for one frame.
#[derive(Debug)]
pub struct DrawCall<'a> {
    pub plane: PlaneId,
    pub geometry: GeometryHandle,
    /// Model matrix including z-rotation around the transform origin.
    pub model: Mat4,
    pub fov: f32,
    pub uniforms: &'a Uniforms,
    /// Sampler name and the texture bound to it, in slot order.
    pub samplers: &'a [(String, TextureHandle)],
}

/// Capability set the scene requires from the graphics API.
pub trait GpuBackend {
    /// Create a texture and upload `image` into it.
    fn upload_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureHandle, GpuError>;

    /// Free a texture. Must only be called once per handle.
    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Upload plane geometry and allocate its uniform storage.
    fn create_geometry(&mut self, label: &str, geometry: &RawGeometry) -> Result<GeometryHandle, GpuError>;

    /// Free plane geometry. Must only be called once per handle.
    fn destroy_geometry(&mut self, handle: GeometryHandle);

    /// Bind `texture` to the sampler uniform `sampler` of a plane.
    fn bind_sampler(
        &mut self,
        geometry: GeometryHandle,
        sampler: &str,
        texture: TextureHandle,
    ) -> Result<(), GpuError>;

    /// Submit one plane for drawing with its current uniform values.
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError>;

    /// Returns `true` once per context loss the backend observed.
    fn take_context_lost(&mut self) -> bool {
        false
    }

    /// Re-acquire the context after a loss. All previous handles stay invalid.
    fn restore(&mut self) -> Result<(), GpuError>;
}

impl<G: GpuBackend + ?Sized> GpuBackend for Box<G> {
    fn upload_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureHandle, GpuError> {
        (**self).upload_texture(label, image)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        (**self).destroy_texture(handle)
    }

    fn create_geometry(&mut self, label: &str, geometry: &RawGeometry) -> Result<GeometryHandle, GpuError> {
        (**self).create_geometry(label, geometry)
    }

    fn destroy_geometry(&mut self, handle: GeometryHandle) {
        (**self).destroy_geometry(handle)
    }

    fn bind_sampler(
        &mut self,
        geometry: GeometryHandle,
        sampler: &str,
        texture: TextureHandle,
    ) -> Result<(), GpuError> {
        (**self).bind_sampler(geometry, sampler, texture)
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError> {
        (**self).draw(call)
    }

    fn take_context_lost(&mut self) -> bool {
        (**self).take_context_lost()
    }

    fn restore(&mut self) -> Result<(), GpuError> {
        (**self).restore()
    }
}
