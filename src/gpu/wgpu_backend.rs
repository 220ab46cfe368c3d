//! `wgpu` implementation of the GPU boundary.

use std::collections::HashMap;

use super::{DrawCall, GeometryHandle, GpuBackend, GpuContext, GpuError, TextureHandle};
use crate::geometry::RawGeometry;
use crate::loader::ImageData;
use crate::mesh::Mesh;
use crate::plane::PlaneId;
use crate::texture::Texture;

/// A draw submitted during the current frame.
///
/// The render pass that owns the pipelines consumes these with
/// [`WgpuBackend::take_draw_queue`], the same way a mesh pass drains its queue.
#[derive(Clone, Debug)]
pub struct QueuedDraw {
    pub plane: PlaneId,
    pub geometry: GeometryHandle,
    pub index_count: u32,
    pub samplers: Vec<(String, TextureHandle)>,
}

struct PlaneBuffers {
    mesh: Mesh,
    uniform_buffer: Option<wgpu::Buffer>,
    samplers: HashMap<String, TextureHandle>,
}

/// GPU backend backed by a headless `wgpu` device.
///
/// Uniform layout per plane: model matrix (64 bytes), fov padded to 16 bytes,
/// then the plane's own uniforms as produced by
/// [`Uniforms::packed`](crate::Uniforms::packed).
pub struct WgpuBackend {
    gpu: GpuContext,
    next_id: u64,
    textures: HashMap<u64, Texture>,
    planes: HashMap<u64, PlaneBuffers>,
    draw_queue: Vec<QueuedDraw>,
    lost: bool,
}

impl WgpuBackend {
    /// Create a backend on a fresh headless device.
    pub fn new() -> Result<Self, GpuError> {
        Ok(Self::with_context(GpuContext::headless()?))
    }

    pub fn with_context(gpu: GpuContext) -> Self {
        Self {
            gpu,
            next_id: 0,
            textures: HashMap::new(),
            planes: HashMap::new(),
            draw_queue: Vec::new(),
            lost: false,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.gpu
    }

    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_alive(&self) -> Result<(), GpuError> {
        if self.lost {
            Err(GpuError::DeviceUnavailable("wgpu device lost".into()))
        } else {
            Ok(())
        }
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(&handle.raw())
    }

    pub fn mesh(&self, handle: GeometryHandle) -> Option<&Mesh> {
        self.planes.get(&handle.raw()).map(|p| &p.mesh)
    }

    pub fn uniform_buffer(&self, handle: GeometryHandle) -> Option<&wgpu::Buffer> {
        self.planes.get(&handle.raw()).and_then(|p| p.uniform_buffer.as_ref())
    }

    /// Draws submitted since the last call.
    pub fn take_draw_queue(&mut self) -> Vec<QueuedDraw> {
        std::mem::take(&mut self.draw_queue)
    }

    fn uniform_bytes(call: &DrawCall<'_>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(80 + call.uniforms.len() * 16);
        bytes.extend_from_slice(bytemuck::cast_slice(&call.model.to_cols_array()));
        bytes.extend_from_slice(bytemuck::cast_slice(&[call.fov, 0.0, 0.0, 0.0]));
        bytes.extend_from_slice(&call.uniforms.packed());
        bytes
    }
}

impl GpuBackend for WgpuBackend {
    fn upload_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureHandle, GpuError> {
        self.ensure_alive()?;
        if image.width == 0 || image.height == 0 {
            return Err(GpuError::Upload(format!("'{label}' has zero size")));
        }
        if image.pixels.len() != (image.width * image.height * 4) as usize {
            return Err(GpuError::Upload(format!("'{label}' pixel data does not match its size")));
        }
        let texture = Texture::from_image(&self.gpu, image, label);
        let id = self.alloc();
        self.textures.insert(id, texture);
        Ok(TextureHandle::from_raw(id))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        match self.textures.remove(&handle.raw()) {
            Some(texture) => texture.destroy(),
            None => log::warn!("wgpu: destroy of unknown texture {}", handle.raw()),
        }
    }

    fn create_geometry(&mut self, label: &str, geometry: &RawGeometry) -> Result<GeometryHandle, GpuError> {
        self.ensure_alive()?;
        let mesh = Mesh::new(&self.gpu, label, &geometry.vertices, &geometry.indices);
        let id = self.alloc();
        self.planes.insert(
            id,
            PlaneBuffers {
                mesh,
                uniform_buffer: None,
                samplers: HashMap::new(),
            },
        );
        Ok(GeometryHandle::from_raw(id))
    }

    fn destroy_geometry(&mut self, handle: GeometryHandle) {
        match self.planes.remove(&handle.raw()) {
            Some(buffers) => {
                buffers.mesh.destroy();
                if let Some(buffer) = buffers.uniform_buffer {
                    buffer.destroy();
                }
            }
            None => log::warn!("wgpu: destroy of unknown geometry {}", handle.raw()),
        }
    }

    fn bind_sampler(
        &mut self,
        geometry: GeometryHandle,
        sampler: &str,
        texture: TextureHandle,
    ) -> Result<(), GpuError> {
        self.ensure_alive()?;
        if !self.textures.contains_key(&texture.raw()) {
            return Err(GpuError::InvalidHandle(texture.raw()));
        }
        let plane = self
            .planes
            .get_mut(&geometry.raw())
            .ok_or(GpuError::InvalidHandle(geometry.raw()))?;
        plane.samplers.insert(sampler.to_string(), texture);
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError> {
        self.ensure_alive()?;
        let bytes = Self::uniform_bytes(call);
        let plane = self
            .planes
            .get_mut(&call.geometry.raw())
            .ok_or(GpuError::InvalidHandle(call.geometry.raw()))?;

        let needs_buffer = plane
            .uniform_buffer
            .as_ref()
            .is_none_or(|buffer| buffer.size() < bytes.len() as u64);
        if needs_buffer {
            if let Some(old) = plane.uniform_buffer.take() {
                old.destroy();
            }
            plane.uniform_buffer = Some(self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Plane Uniform Buffer"),
                size: bytes.len() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = &plane.uniform_buffer {
            self.gpu.queue.write_buffer(buffer, 0, &bytes);
        }

        self.draw_queue.push(QueuedDraw {
            plane: call.plane,
            geometry: call.geometry,
            index_count: plane.mesh.index_count(),
            samplers: call.samplers.to_vec(),
        });
        Ok(())
    }

    fn take_context_lost(&mut self) -> bool {
        if self.gpu.take_lost() {
            self.lost = true;
            // Handles from the dead device must not be destroyed.
            self.textures.clear();
            self.planes.clear();
            self.draw_queue.clear();
            return true;
        }
        false
    }

    fn restore(&mut self) -> Result<(), GpuError> {
        let gpu = GpuContext::headless()?;
        self.gpu = gpu;
        self.textures.clear();
        self.planes.clear();
        self.draw_queue.clear();
        self.lost = false;
        log::info!("wgpu device re-created");
        Ok(())
    }
}

