//! In-memory backend.

use std::collections::HashMap;

use super::{DrawCall, GeometryHandle, GpuBackend, GpuError, TextureHandle};
use crate::geometry::RawGeometry;
use crate::loader::ImageData;
use crate::plane::PlaneId;
use crate::uniform::UniformValue;

/// One draw as seen by [`HeadlessGpu`].
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub plane: PlaneId,
    /// Sampler name and the label of the texture bound to it.
    pub samplers: Vec<(String, String)>,
    /// Uniform key and value at submission time.
    pub uniforms: Vec<(String, UniformValue)>,
}

impl DrawRecord {
    /// Value of a `1f` uniform at submission time.
    pub fn float(&self, key: &str) -> Option<f32> {
        self.uniforms.iter().find(|(k, _)| k == key).and_then(|(_, v)| match v {
            UniformValue::Float(f) => Some(*f),
            _ => None,
        })
    }
}

struct GeometryEntry {
    vertex_count: usize,
    samplers: HashMap<String, u64>,
}

/// A GPU backend that only keeps handle tables.
///
/// Every allocation and free is tracked, so leaks and double frees are
/// observable, and context loss can be simulated with
/// [`HeadlessGpu::lose_context`].
///
/// ```
/// use drape::{GpuBackend, HeadlessGpu, ImageData};
///
/// let mut gpu = HeadlessGpu::new();
/// let tex = gpu.upload_texture("a.jpg", &ImageData::solid(2, 2, [255; 4])).unwrap();
/// assert_eq!(gpu.live_textures(), 1);
/// gpu.destroy_texture(tex);
/// assert_eq!(gpu.live_textures(), 0);
/// ```
#[derive(Default)]
pub struct HeadlessGpu {
    next_id: u64,
    textures: HashMap<u64, String>,
    geometries: HashMap<u64, GeometryEntry>,
    upload_log: Vec<String>,
    draws: Vec<DrawRecord>,
    invalid_frees: usize,
    lost: bool,
    lost_signal: bool,
    fail_restore: bool,
    failing_binds: usize,
    restores: usize,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_alive(&self) -> Result<(), GpuError> {
        if self.lost {
            Err(GpuError::DeviceUnavailable("context lost".into()))
        } else {
            Ok(())
        }
    }

    /// Simulate the driver dropping the context.
    ///
    /// All handles become invalid and the next
    /// [`take_context_lost`](GpuBackend::take_context_lost) returns `true`.
    pub fn lose_context(&mut self) {
        log::debug!("headless: context lost");
        self.lost = true;
        self.lost_signal = true;
        self.textures.clear();
        self.geometries.clear();
    }

    /// Make the next [`restore`](GpuBackend::restore) calls fail.
    pub fn fail_restore(&mut self, fail: bool) {
        self.fail_restore = fail;
    }

    /// Make the next `count` sampler binds fail.
    pub fn fail_binds(&mut self, count: usize) {
        self.failing_binds = count;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_geometries(&self) -> usize {
        self.geometries.len()
    }

    /// Labels of every texture upload since creation, in order.
    pub fn upload_log(&self) -> &[String] {
        &self.upload_log
    }

    /// Number of uploads performed for one label.
    pub fn uploads_of(&self, label: &str) -> usize {
        self.upload_log.iter().filter(|l| l.as_str() == label).count()
    }

    /// Destroy calls for handles that were not alive.
    pub fn invalid_frees(&self) -> usize {
        self.invalid_frees
    }

    pub fn restores(&self) -> usize {
        self.restores
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Label of the texture currently bound to `sampler` of a geometry.
    pub fn bound_sampler(&self, geometry: GeometryHandle, sampler: &str) -> Option<&str> {
        let entry = self.geometries.get(&geometry.raw())?;
        let texture = entry.samplers.get(sampler)?;
        self.textures.get(texture).map(String::as_str)
    }

    pub fn vertex_count(&self, geometry: GeometryHandle) -> Option<usize> {
        self.geometries.get(&geometry.raw()).map(|g| g.vertex_count)
    }
}

impl GpuBackend for HeadlessGpu {
    fn upload_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureHandle, GpuError> {
        self.ensure_alive()?;
        if image.width == 0 || image.height == 0 {
            return Err(GpuError::Upload(format!("'{label}' has zero size")));
        }
        let id = self.alloc();
        self.textures.insert(id, label.to_string());
        self.upload_log.push(label.to_string());
        Ok(TextureHandle::from_raw(id))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle.raw()).is_none() {
            log::warn!("headless: destroy of unknown texture {}", handle.raw());
            self.invalid_frees += 1;
        }
    }

    fn create_geometry(&mut self, _label: &str, geometry: &RawGeometry) -> Result<GeometryHandle, GpuError> {
        self.ensure_alive()?;
        let id = self.alloc();
        self.geometries.insert(
            id,
            GeometryEntry {
                vertex_count: geometry.vertices.len(),
                samplers: HashMap::new(),
            },
        );
        Ok(GeometryHandle::from_raw(id))
    }

    fn destroy_geometry(&mut self, handle: GeometryHandle) {
        if self.geometries.remove(&handle.raw()).is_none() {
            log::warn!("headless: destroy of unknown geometry {}", handle.raw());
            self.invalid_frees += 1;
        }
    }

    fn bind_sampler(
        &mut self,
        geometry: GeometryHandle,
        sampler: &str,
        texture: TextureHandle,
    ) -> Result<(), GpuError> {
        self.ensure_alive()?;
        if self.failing_binds > 0 {
            self.failing_binds -= 1;
            return Err(GpuError::Upload(format!("bind of '{sampler}' rejected")));
        }
        if !self.textures.contains_key(&texture.raw()) {
            return Err(GpuError::InvalidHandle(texture.raw()));
        }
        let entry = self
            .geometries
            .get_mut(&geometry.raw())
            .ok_or(GpuError::InvalidHandle(geometry.raw()))?;
        entry.samplers.insert(sampler.to_string(), texture.raw());
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError> {
        self.ensure_alive()?;
        if !self.geometries.contains_key(&call.geometry.raw()) {
            return Err(GpuError::InvalidHandle(call.geometry.raw()));
        }
        let mut samplers = Vec::with_capacity(call.samplers.len());
        for (name, texture) in call.samplers {
            let label = self
                .textures
                .get(&texture.raw())
                .ok_or(GpuError::InvalidHandle(texture.raw()))?;
            samplers.push((name.clone(), label.clone()));
        }
        self.draws.push(DrawRecord {
            plane: call.plane,
            samplers,
            uniforms: call.uniforms.iter().map(|u| (u.key.clone(), u.value)).collect(),
        });
        Ok(())
    }

    fn take_context_lost(&mut self) -> bool {
        std::mem::take(&mut self.lost_signal)
    }

    fn restore(&mut self) -> Result<(), GpuError> {
        if self.fail_restore {
            return Err(GpuError::DeviceUnavailable("driver unavailable".into()));
        }
        self.lost = false;
        self.restores += 1;
        Ok(())
    }
}
