// fastorb: keypoint detection, ORB description and homography estimation
// expressed as a graph of raster kernels.
//
// Pipeline (see detector.rs):
//   media → denoise / greyscale → pyramid → FAST or Harris scores per LOD
//         → NMS → encoded keypoint set → orientation → ORB descriptors
//
// Every stage is a named program in a `KernelRegistry`; a detection call
// records them on a `KernelGraph` and nothing runs until the keypoints are
// downloaded. CPU kernels are always available; the FAST pass can be
// swapped for a wgpu compute kernel (gpu/).

pub mod texture;
pub mod kernel;
pub mod graph;

pub mod convolution;
pub mod pyramid;
pub mod preprocess;
pub mod gradient;

pub mod fast;
pub mod harris;
pub mod nms;

pub mod encoding;
pub mod orb;
pub mod homography;

pub mod programs;
pub mod algorithm;
pub mod detector;

pub mod config;
pub mod error;
pub mod gpu;

pub use error::{Error, Result};
