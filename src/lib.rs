// lumeq — Luminance equalization node for camera image streams.
//
// Subscribes to an image stream (color or grayscale), normalizes contrast
// with global histogram equalization or CLAHE, and republishes the result
// as a Mono8 stream under the original frame's identity. Processing runs
// on the CPU reference path or, when available, a wgpu compute backend.

pub mod bus;
pub mod config;
pub mod convert;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod histeq;
pub mod image;
pub mod node;
pub mod viewer;
