// gpu/mod.rs — wgpu compute backend for the equalization kernels.
//
// Hybrid CPU/GPU split: the GPU handles the per-pixel work within a frame
// (histogram accumulation, LUT remap, CLAHE bilinear blend); the CPU keeps
// the 256-bin LUT construction, which is tiny and shared verbatim with the
// CPU reference path in histeq.rs. That sharing is what makes the two
// backends agree: same histograms in, same LUTs out.
//
// The CPU implementations remain authoritative — every kernel is validated
// against them in the (GPU-gated) tests.

pub mod device;
pub mod histeq;

pub use device::{GpuDevice, GpuError};
pub use histeq::GpuEqualizer;
