// programs.rs — The standard set of named kernel programs.
//
// Every stage of the detection pipeline is looked up by name in a
// `KernelRegistry`. This module declares the CPU implementations; the GPU
// backend (gpu/) redeclares the names it accelerates on top of the same
// registry.
//
//   filters        gauss3, gauss5, smooth
//   colours        greyscale, normalize_illumination,
//                  enhance_illumination (= gauss3 ∘ normalize_illumination)
//   pyramid        pyramid
//   FAST           fast9_16, fast7_12, fast5_8 (ping-pong), fast_score_to_8bits
//   Harris         harris_derivatives, harris1/3/5/7 (ping-pong),
//                  harris_score_find_max (ping-pong), harris_score_cutoff,
//                  harris_score_to_8bits
//   NMS            nonmax, pyrnonmax
//   keypoints      encode_keypoints, suppress_descriptors
//   ORB            orb_orientation, transfer_orientation,
//                  orientation (= transfer_orientation ∘ orb_orientation), orb

use crate::config::EngineConfig;
use crate::convolution::SeparableFilter;
use crate::encoding::{EncodeKeypoints, SuppressDescriptors};
use crate::fast::{FastKernel, FastScoreTo8Bits, FastVariant};
use crate::graph::KernelRegistry;
use crate::harris::{
    HarrisCutoff, HarrisDerivatives, HarrisFindMax, HarrisKernel, HarrisResponse,
    HarrisScoreTo8Bits, HarrisWindow,
};
use crate::nms::{NonMax, PyrNonMax};
use crate::orb::{OrbDescriptor, OrbOrientation, TransferOrientation};
use crate::preprocess::{Greyscale, NormalizeIllumination};
use crate::pyramid::PyramidKernel;

/// Gaussian applied before ORB sampling (7 taps, σ = 2).
const SMOOTH_HALF_SIZE: usize = 3;
const SMOOTH_SIGMA: f32 = 2.0;

/// Registry with a CPU kernel behind every standard program name.
pub fn standard_registry(config: &EngineConfig) -> KernelRegistry {
    let mut r = KernelRegistry::new();

    r.declare("gauss3", SeparableFilter::gauss3());
    r.declare("gauss5", SeparableFilter::gauss5());
    r.declare("smooth", SeparableFilter::gaussian(SMOOTH_HALF_SIZE, SMOOTH_SIGMA));

    r.declare("greyscale", Greyscale);
    r.declare("normalize_illumination", NormalizeIllumination::default());
    r.compose("enhance_illumination", "normalize_illumination", "gauss3");

    r.declare("pyramid", PyramidKernel::new(config.pyramid));

    for variant in [FastVariant::Fast9_16, FastVariant::Fast7_12, FastVariant::Fast5_8] {
        r.declare_pingpong(variant.program(), FastKernel::new(variant));
    }
    r.declare("fast_score_to_8bits", FastScoreTo8Bits);

    r.declare("harris_derivatives", HarrisDerivatives);
    for window in [HarrisWindow::W1, HarrisWindow::W3, HarrisWindow::W5, HarrisWindow::W7] {
        r.declare_pingpong(window.program(), HarrisKernel::new(window, HarrisResponse::ShiTomasi));
    }
    r.declare_pingpong("harris_score_find_max", HarrisFindMax);
    r.declare("harris_score_cutoff", HarrisCutoff);
    r.declare("harris_score_to_8bits", HarrisScoreTo8Bits);

    r.declare("nonmax", NonMax);
    r.declare("pyrnonmax", PyrNonMax);

    r.declare("encode_keypoints", EncodeKeypoints);
    r.declare("suppress_descriptors", SuppressDescriptors);

    r.declare("orb_orientation", OrbOrientation);
    r.declare("transfer_orientation", TransferOrientation);
    r.compose("orientation", "orb_orientation", "transfer_orientation");
    r.declare("orb", OrbDescriptor);

    log::debug!("standard registry: {} programs", r.names().len());
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Param;

    #[test]
    fn test_every_program_declared() {
        let r = standard_registry(&EngineConfig::default());
        for name in [
            "gauss3", "gauss5", "smooth", "greyscale", "normalize_illumination",
            "enhance_illumination", "pyramid", "fast9_16", "fast7_12", "fast5_8",
            "fast_score_to_8bits", "harris_derivatives", "harris1", "harris3", "harris5",
            "harris7", "harris_score_find_max", "harris_score_cutoff", "harris_score_to_8bits",
            "nonmax", "pyrnonmax", "encode_keypoints", "suppress_descriptors",
            "orb_orientation", "transfer_orientation", "orientation", "orb",
        ] {
            assert!(r.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_composed_signatures() {
        let r = standard_registry(&EngineConfig::default());
        assert_eq!(r.params("enhance_illumination"), vec![Param::Texture]);
        assert_eq!(
            r.params("orientation"),
            vec![Param::Texture, Param::Texture, Param::Int, Param::Int, Param::Int]
        );
    }
}
