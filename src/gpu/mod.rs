// gpu/mod.rs — GPU acceleration layer.
//
// wgpu compute kernels that implement the same `Kernel` contract as their
// CPU counterparts. The CPU implementations remain the authoritative
// reference; every GPU kernel is validated against them.
//
// Usage: build the standard registry, redeclare the accelerated programs on
// top of it, then hand the registry to the detector.
//
//   let gpu = Arc::new(GpuDevice::new()?);
//   let mut registry = standard_registry(&config);
//   declare_gpu_fast(&mut registry, &gpu);
//   let detector = FeatureDetector::with_registry(kind, config, registry)?;
//
// Only the FAST score pass runs on the GPU today. Every other program stays
// on the CPU, and the graph moves buffers between the two per invocation.

pub mod device;
pub mod fast;

pub use device::{DeviceProfile, GpuConfig, GpuDevice, GpuError, WorkgroupSize};
pub use fast::{declare_gpu_fast, GpuFastKernel};
