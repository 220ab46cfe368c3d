//! Headless `wgpu` device creation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::GpuError;

/// A `wgpu` device and queue without a presentation surface.
///
/// Planes are composited by whoever owns the surface; this context only needs
/// to create textures and buffers. The device-lost callback flips a shared flag
/// that [`WgpuBackend`](super::WgpuBackend) turns into a context loss signal.
pub struct GpuContext {
    /// The logical GPU device for creating resources.
    pub device: wgpu::Device,
    /// The command queue for uploads.
    pub queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Request an adapter and device.
    ///
    /// Blocks on the async wgpu requests with `pollster`.
    pub fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError::DeviceUnavailable(format!("no suitable adapter: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Drape Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| GpuError::DeviceUnavailable(format!("device request failed: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        Ok(Self { device, queue, lost })
    }

    /// Returns `true` once after the device was lost.
    pub fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::AcqRel)
    }
}
