// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate adapters and select the first non-CPU one (unless the
//     configuration explicitly allows software rasterizers).
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g., cap invocations to match Raspberry Pi).
//   - Provide `WorkgroupSize` — a workgroup configuration that is validated
//     against the active profile and baked into shader source.
//   - Small buffer helpers (upload, readback) shared by the GPU kernels.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe (a software renderer that appears as a valid
// Vulkan device). We enumerate explicitly and rank hardware first.
//
// DEVICE LIMITS:
// We request *lower* limits than the hardware actually supports when
// running under a non-Native profile. wgpu validates every dispatch against
// the requested limits, so violations that would crash on RPi are caught at
// dev time on the laptop.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` — runs an async fn to completion on the current
//   thread. wgpu's device/adapter API is async because on WebGPU it maps
//   to JS Promises, but natively we just block.
// - `thiserror` derive for an error enum that wraps wgpu's own errors
//   through `#[from]`.

use std::fmt;

use thiserror::Error;
use wgpu::util::DeviceExt;

/// Hardware profile controlling device limits and default workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    Native,
    /// Simulate Raspberry Pi 4/5 (VideoCore VI/VII, V3DV Vulkan).
    /// Caps `max_compute_invocations_per_workgroup` to 256.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// A workgroup size configuration for 2D compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Substitute `{{WG_X}}` / `{{WG_Y}}` in a WGSL template.
    ///
    /// ```wgsl
    /// @compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
    /// fn main(...) { ... }
    /// ```
    pub fn specialize(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }

    /// Validated default for the given profile.
    ///
    /// - `Native`: 16×8 = 128 invocations (4 NVIDIA warps, 2 AMD waves).
    /// - `RaspberryPi`: 8×8 = 64, well inside the 256 invocation limit.
    pub fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::RaspberryPi => WorkgroupSize { x: 8, y: 8 },
        }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// How to pick and configure the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuConfig {
    pub backends: wgpu::Backends,
    pub profile: DeviceProfile,
    /// Overrides the profile's default workgroup size.
    pub workgroup: Option<WorkgroupSize>,
    /// Accept a CPU/software adapter when no hardware adapter exists.
    pub allow_software: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        GpuConfig {
            backends: wgpu::Backends::PRIMARY,
            profile: DeviceProfile::Native,
            workgroup: None,
            allow_software: false,
        }
    }
}

/// Cached adapter information for logging and debugging.
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

/// The core GPU context: device, queue, and active profile.
///
/// Hold one `GpuDevice` (behind an `Arc`) for the lifetime of the
/// application; every GPU kernel keeps a reference to it.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`; some Vulkan
/// layers crash when the instance goes first.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Default configuration: primary backends, hardware adapters only.
    pub fn new() -> Result<Self, GpuError> {
        Self::with_config(&GpuConfig::default())
    }

    pub fn with_config(config: &GpuConfig) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(config))
    }

    async fn init_async(config: &GpuConfig) -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(config.backends);
        for a in &adapters {
            let info = a.get_info();
            log::debug!("adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }

        // Hardware first; software only when allowed.
        let adapter = adapters
            .into_iter()
            .map(|a| (adapter_rank(a.get_info().device_type), a))
            .filter(|(rank, _)| *rank < 2 || config.allow_software)
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, a)| a)
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw.name.clone(),
            device_type: raw.device_type,
            backend: raw.backend,
        };

        // Auto-detect RPi when the caller asked for Native on a V3D adapter.
        let profile = match config.profile {
            DeviceProfile::Native if raw.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("fastorb"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let mut gpu = GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::for_profile(profile),
            _instance: instance,
        };
        if let Some(ws) = config.workgroup {
            gpu.set_workgroup_size(ws.x, ws.y)?;
        }
        log::info!("using {gpu}");
        Ok(gpu)
    }

    /// Override the default workgroup size, validating against the active profile.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = max_invocations_for_profile(self.profile);
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Workgroups needed to cover a `w × h` grid (ceiling division). The
    /// shader must guard against out-of-bounds global IDs.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        dispatch_for(self.workgroup_size, w, h)
    }

    /// Storage buffer initialised with `contents`.
    pub fn storage_buffer(&self, label: &str, contents: &[u8], writable: bool) -> wgpu::Buffer {
        let mut usage = wgpu::BufferUsages::STORAGE;
        if writable {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }

    /// Copy `size` bytes of `src` back to the host, blocking until done.
    pub fn read_buffer(&self, src: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, GpuError> {
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(src, 0, &readback, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver only disappears if this function already returned.
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| GpuError::ReadbackLost)??;

        let bytes = slice.get_mapped_range().to_vec();
        readback.unmap();
        Ok(bytes)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

/// Lower is better. 2 = software.
fn adapter_rank(t: wgpu::DeviceType) -> u8 {
    match t {
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu => 0,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 2,
    }
}

fn dispatch_for(ws: WorkgroupSize, w: u32, h: u32) -> (u32, u32) {
    (w.div_ceil(ws.x), h.div_ceil(ws.y))
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile.
fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),
        DeviceProfile::RaspberryPi => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default().max_compute_invocations_per_workgroup,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialization, configuration and readback.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No adapter passed the selection filter.
    #[error("no suitable GPU adapter found (only CPU/software renderers visible)")]
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits, etc.).
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the profile's invocation limit.
    #[error("workgroup size {total} exceeds profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Mapping a readback buffer failed.
    #[error("buffer readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    /// The map callback was dropped without reporting.
    #[error("buffer readback callback was never invoked")]
    ReadbackLost,
}

// ============================================================
// Tests
// ============================================================
