// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate adapters and select the first real GPU, falling back to
//     whatever exists (a software rasterizer still computes correctly,
//     just slowly — the adapter name is logged so the choice is visible).
//   - Provide `WorkgroupSize`, validated against the device limits and
//     injected into WGSL via token replacement (naga does not yet accept
//     `override` expressions inside @workgroup_size()).

use std::fmt;

use log::{debug, info};
use thiserror::Error;

/// A workgroup configuration for 2D compute dispatches.
///
/// Both dimensions must keep x·y within the device's
/// `max_compute_invocations_per_workgroup` limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x · y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// 16×8 = 128 invocations: four 32-wide NVIDIA warps, two 64-wide AMD
/// waves, and x aligns with cache lines for row-major image data.
const DEFAULT_WORKGROUP: WorkgroupSize = WorkgroupSize { x: 16, y: 8 };

/// Cached adapter information for logging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Errors from GPU device initialization and configuration.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No adapter found at all.
    #[error("no GPU adapter available")]
    NoSuitableAdapter,

    /// wgpu device request failed (driver issue, unsupported limits).
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Requested workgroup size exceeds the device's invocation limit.
    #[error("workgroup size {total} exceeds device limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    /// A buffer readback did not complete.
    #[error("buffer readback failed: {0}")]
    Readback(String),
}

/// The core GPU context: device, queue, and workgroup configuration.
///
/// Expensive to create (instance + device initialization); hold one for
/// the lifetime of the node.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the best available adapter.
    ///
    /// # Errors
    /// Returns `Err` if no adapter is found or the device request fails.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            // Validation layer in debug builds for shader error feedback.
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::PRIMARY)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            debug!(
                "adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        // Prefer real hardware; fall back to anything (llvmpipe included)
        // rather than refusing to run.
        let adapter = all_adapters
            .into_iter()
            .max_by_key(|a| match a.get_info().device_type {
                wgpu::DeviceType::DiscreteGpu => 4,
                wgpu::DeviceType::IntegratedGpu => 3,
                wgpu::DeviceType::VirtualGpu => 2,
                wgpu::DeviceType::Other => 1,
                wgpu::DeviceType::Cpu => 0,
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };
        info!("gpu backend on {adapter_info}");

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lumeq"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: DEFAULT_WORKGROUP,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validating against the
    /// device's invocation limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Workgroup counts needed to cover an image of the given size with
    /// the active workgroup size. Ceiling division: the shader must guard
    /// `if gid.x >= width || gid.y >= height { return; }`.
    pub fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
        let dx = (img_w + self.workgroup_size.x - 1) / self.workgroup_size.x;
        let dy = (img_h + self.workgroup_size.y - 1) / self.workgroup_size.y;
        (dx, dy)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}
