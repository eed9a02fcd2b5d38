// algorithm.rs — Detection algorithms behind one trait.
//
// Every algorithm turns a preprocessed greyscale image into an encoded
// keypoint set by recording kernels on a `KernelGraph`:
//
//   pyramid ─► score kernel per LOD (accumulating, ping-pong) ─► 8-bit scores
//           ─► NMS ─► encode_keypoints
//
// Orientation and description are shared by all algorithms and live in the
// trait's default methods.
//
// TUNABLES
// ────────
// Instead of forwarding arbitrary properties, each algorithm exposes a small
// named parameter table (`parameters`, `get`, `set`) plus a normalised
// `sensitivity` in [0, 1] that the detector's automatic controller drives:
//
//   FAST     threshold = FAST_MAX_THRESHOLD · (1 − sensitivity)
//   Harris   quality   = 1 − sensitivity
//
// NEW RUST CONCEPTS:
// - `Box<dyn FeaturesAlgorithm>` — a tagged enum (`AlgorithmKind`) picks the
//   implementation once; afterwards the detector only sees the trait object.
// - Default trait methods — `orient`, `describe` and `download` are written
//   once and inherited by every algorithm.

use crate::config::EngineConfig;
use crate::encoding::{decode, EncoderLayout, Keypoint};
use crate::error::{Error, Result};
use crate::fast::{FastVariant, FAST_MAX_THRESHOLD};
use crate::graph::{BufferHandle, KernelGraph, KernelRegistry};
use crate::harris::{reduction_iterations, HarrisKernel, HarrisResponse, HarrisWindow};
use crate::texture::Texture;

/// Which detector to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlgorithmKind {
    /// Single-scale FAST at LOD 0.
    Fast(FastVariant),
    /// Single-scale Harris/Shi-Tomasi at LOD 0.
    Harris(HarrisWindow),
    /// FAST-9/16 over the LOD range `0, s, 2s, …`.
    MultiscaleFast,
    /// Harris/Shi-Tomasi (3×3 window) over the LOD range.
    MultiscaleHarris,
}

impl AlgorithmKind {
    /// Instantiate with default tunables.
    pub fn build(self) -> Box<dyn FeaturesAlgorithm> {
        match self {
            AlgorithmKind::Fast(variant) => {
                Box::new(FastAlgorithm::new(FastConfig { variant, ..FastConfig::default() }, false))
            }
            AlgorithmKind::MultiscaleFast => Box::new(FastAlgorithm::new(FastConfig::default(), true)),
            AlgorithmKind::Harris(window) => {
                Box::new(HarrisAlgorithm::new(HarrisConfig { window, ..HarrisConfig::default() }, false))
            }
            AlgorithmKind::MultiscaleHarris => {
                Box::new(HarrisAlgorithm::new(HarrisConfig::default(), true))
            }
        }
    }

    pub fn is_multiscale(&self) -> bool {
        matches!(self, AlgorithmKind::MultiscaleFast | AlgorithmKind::MultiscaleHarris)
    }
}

/// Handles and sizes an algorithm needs to record its kernels.
#[derive(Debug, Clone, Copy)]
pub struct DetectContext {
    /// Greyscale image used for detection (possibly enhanced).
    pub image: BufferHandle,
    /// Greyscale image used for orientation and description.
    pub descriptor_image: BufferHandle,
    /// Base resolution of both images.
    pub size: (usize, usize),
    pub config: EngineConfig,
    /// Layout of the encoded set produced by `detect`.
    pub layout: EncoderLayout,
}

impl DetectContext {
    fn layout_args(&self) -> [crate::graph::Arg; 3] {
        let l = &self.layout;
        [l.descriptor_size.into(), l.extra_size.into(), l.encoder_length.into()]
    }
}

/// A keypoint detector expressed as kernel invocations.
pub trait FeaturesAlgorithm: Send {
    fn kind(&self) -> AlgorithmKind;

    /// Adjust the registry before the detector freezes it. Algorithms whose
    /// kernels depend on construction-time settings redeclare them here.
    fn declare_kernels(&self, _registry: &mut KernelRegistry) {}

    /// Record detection; returns the encoded keypoint set.
    fn detect(&self, graph: &mut KernelGraph, ctx: &DetectContext) -> BufferHandle;

    /// Record orientation estimation on `encoded`.
    fn orient(&self, graph: &mut KernelGraph, ctx: &DetectContext, encoded: BufferHandle) -> BufferHandle {
        let pyramid = graph.run("pyramid", &[ctx.descriptor_image.into()]);
        let [d, e, l] = ctx.layout_args();
        graph.run("orientation", &[pyramid.into(), encoded.into(), d, e, l])
    }

    /// Record orientation and ORB description on `encoded`.
    fn describe(&self, graph: &mut KernelGraph, ctx: &DetectContext, encoded: BufferHandle) -> BufferHandle {
        let oriented = self.orient(graph, ctx, encoded);
        let smooth = graph.run("smooth", &[ctx.descriptor_image.into()]);
        let pyramid = graph.run("pyramid", &[smooth.into()]);
        let [d, e, l] = ctx.layout_args();
        graph.run("orb", &[pyramid.into(), oriented.into(), d, e, l])
    }

    /// Turn a downloaded encoded set into keypoints.
    fn download(&self, encoded: &Texture, layout: &EncoderLayout) -> Vec<Keypoint> {
        decode(encoded, layout)
    }

    /// Names accepted by `get` / `set`.
    fn parameters(&self) -> &'static [&'static str];

    fn get(&self, name: &str) -> Result<f32>;

    fn set(&mut self, name: &str, value: f32) -> Result<()>;

    /// Normalised sensitivity: 0 = fewest keypoints, 1 = most.
    fn sensitivity(&self) -> f32;

    /// Clamped to [0, 1].
    fn set_sensitivity(&mut self, sensitivity: f32);
}

fn unknown_parameter(name: &str, known: &[&str]) -> Error {
    Error::invalid(format!("unknown parameter '{name}' (expected one of {known:?})"))
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid(format!("{name} must be in [0, 1] (got {value})")))
    }
}

/// Record the NMS appropriate for single-scale or multiscale detection.
fn suppress(graph: &mut KernelGraph, scores: BufferHandle, multiscale: bool, lod_step: f32) -> BufferHandle {
    if multiscale {
        graph.run("pyrnonmax", &[scores.into(), lod_step.into()])
    } else {
        graph.run("nonmax", &[scores.into()])
    }
}

fn encode(graph: &mut KernelGraph, corners: BufferHandle, ctx: &DetectContext) -> BufferHandle {
    let [d, e, l] = ctx.layout_args();
    graph.run("encode_keypoints", &[corners.into(), d, e, l])
}

fn detection_lods(ctx: &DetectContext, multiscale: bool) -> Vec<f32> {
    if multiscale {
        ctx.config.lods(ctx.size.0, ctx.size.1)
    } else {
        vec![0.0]
    }
}

// ============================================================
// FAST
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastConfig {
    pub variant: FastVariant,
    /// Minimum arc contrast, in [0, 1] intensity units.
    pub threshold: f32,
}

impl Default for FastConfig {
    fn default() -> Self {
        FastConfig { variant: FastVariant::Fast9_16, threshold: 0.1 }
    }
}

pub struct FastAlgorithm {
    config: FastConfig,
    multiscale: bool,
}

impl FastAlgorithm {
    const PARAMETERS: &'static [&'static str] = &["threshold", "sensitivity"];

    /// Multiscale detection always uses FAST-9/16.
    pub fn new(config: FastConfig, multiscale: bool) -> Self {
        let config = if multiscale {
            FastConfig { variant: FastVariant::Fast9_16, ..config }
        } else {
            config
        };
        FastAlgorithm { config, multiscale }
    }

    pub fn config(&self) -> &FastConfig {
        &self.config
    }
}

impl FeaturesAlgorithm for FastAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        if self.multiscale {
            AlgorithmKind::MultiscaleFast
        } else {
            AlgorithmKind::Fast(self.config.variant)
        }
    }

    fn detect(&self, graph: &mut KernelGraph, ctx: &DetectContext) -> BufferHandle {
        let (w, h) = ctx.size;
        let pyramid = graph.run("pyramid", &[ctx.image.into()]);
        let mut corners = graph.input(Texture::new(w, h));
        let program = self.config.variant.program();
        for lod in detection_lods(ctx, self.multiscale) {
            corners = graph.run(
                program,
                &[corners.into(), pyramid.into(), lod.into(), self.config.threshold.into()],
            );
        }
        let scores = graph.run("fast_score_to_8bits", &[corners.into()]);
        let survivors = suppress(graph, scores, self.multiscale, ctx.config.lod_step);
        encode(graph, survivors, ctx)
    }

    fn parameters(&self) -> &'static [&'static str] {
        Self::PARAMETERS
    }

    fn get(&self, name: &str) -> Result<f32> {
        match name {
            "threshold" => Ok(self.config.threshold),
            "sensitivity" => Ok(self.sensitivity()),
            _ => Err(unknown_parameter(name, Self::PARAMETERS)),
        }
    }

    fn set(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "threshold" => {
                check_unit(name, value)?;
                self.config.threshold = value;
            }
            "sensitivity" => {
                check_unit(name, value)?;
                self.set_sensitivity(value);
            }
            _ => return Err(unknown_parameter(name, Self::PARAMETERS)),
        }
        Ok(())
    }

    fn sensitivity(&self) -> f32 {
        (1.0 - self.config.threshold / FAST_MAX_THRESHOLD).clamp(0.0, 1.0)
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.config.threshold = FAST_MAX_THRESHOLD * (1.0 - sensitivity.clamp(0.0, 1.0));
    }
}

// ============================================================
// Harris / Shi-Tomasi
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarrisConfig {
    pub window: HarrisWindow,
    /// Corners scoring below `quality × best` are discarded.
    pub quality: f32,
    pub response: HarrisResponse,
}

impl Default for HarrisConfig {
    fn default() -> Self {
        HarrisConfig {
            window: HarrisWindow::W3,
            quality: 0.1,
            response: HarrisResponse::ShiTomasi,
        }
    }
}

pub struct HarrisAlgorithm {
    config: HarrisConfig,
    multiscale: bool,
}

impl HarrisAlgorithm {
    const PARAMETERS: &'static [&'static str] = &["quality", "sensitivity"];

    pub fn new(config: HarrisConfig, multiscale: bool) -> Self {
        HarrisAlgorithm { config, multiscale }
    }

    pub fn config(&self) -> &HarrisConfig {
        &self.config
    }
}

impl FeaturesAlgorithm for HarrisAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        if self.multiscale {
            AlgorithmKind::MultiscaleHarris
        } else {
            AlgorithmKind::Harris(self.config.window)
        }
    }

    fn declare_kernels(&self, registry: &mut KernelRegistry) {
        if self.config.response != HarrisResponse::ShiTomasi {
            let window = self.config.window;
            registry.declare_pingpong(window.program(), HarrisKernel::new(window, self.config.response));
        }
    }

    fn detect(&self, graph: &mut KernelGraph, ctx: &DetectContext) -> BufferHandle {
        let (w, h) = ctx.size;
        let pyramid = graph.run("pyramid", &[ctx.image.into()]);
        let mut corners = graph.input(Texture::new(w, h));
        let program = self.config.window.program();
        for lod in detection_lods(ctx, self.multiscale) {
            let tensor = graph.run("harris_derivatives", &[pyramid.into(), lod.into()]);
            corners = graph.run(program, &[corners.into(), tensor.into(), lod.into()]);
        }
        for i in 0..reduction_iterations(w, h) {
            corners = graph.run("harris_score_find_max", &[corners.into(), i.into()]);
        }
        let cut = graph.run("harris_score_cutoff", &[corners.into(), self.config.quality.into()]);
        let scores = graph.run("harris_score_to_8bits", &[cut.into()]);
        let survivors = suppress(graph, scores, self.multiscale, ctx.config.lod_step);
        encode(graph, survivors, ctx)
    }

    fn parameters(&self) -> &'static [&'static str] {
        Self::PARAMETERS
    }

    fn get(&self, name: &str) -> Result<f32> {
        match name {
            "quality" => Ok(self.config.quality),
            "sensitivity" => Ok(self.sensitivity()),
            _ => Err(unknown_parameter(name, Self::PARAMETERS)),
        }
    }

    fn set(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "quality" => {
                check_unit(name, value)?;
                self.config.quality = value;
            }
            "sensitivity" => {
                check_unit(name, value)?;
                self.set_sensitivity(value);
            }
            _ => return Err(unknown_parameter(name, Self::PARAMETERS)),
        }
        Ok(())
    }

    fn sensitivity(&self) -> f32 {
        1.0 - self.config.quality
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.config.quality = 1.0 - sensitivity.clamp(0.0, 1.0);
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::min_encoder_length;
    use crate::orb::DESCRIPTOR_SIZE;
    use crate::programs::standard_registry;
    use std::sync::Arc;

    /// White square on black, corners at (8,8) and (23,23).
    fn square_image(n: usize) -> Texture {
        let mut v = vec![0.0f32; n * n];
        for y in 8..24 {
            for x in 8..24 {
                v[y * n + x] = 1.0;
            }
        }
        Texture::from_luma(n, n, &v)
    }

    fn run_detect(algorithm: &dyn FeaturesAlgorithm, image: Texture) -> (Vec<Keypoint>, usize) {
        let config = EngineConfig::default();
        let mut registry = standard_registry(&config);
        algorithm.declare_kernels(&mut registry);
        let mut graph = KernelGraph::new(Arc::new(registry));
        let size = image.size();
        let handle = graph.input(image);
        let l = min_encoder_length(config.max_keypoints, DESCRIPTOR_SIZE, 0);
        let ctx = DetectContext {
            image: handle,
            descriptor_image: handle,
            size,
            config,
            layout: EncoderLayout::new(DESCRIPTOR_SIZE, 0, l).unwrap(),
        };
        let encoded = algorithm.detect(&mut graph, &ctx);
        let recorded = graph.len();
        let tex = graph.read(encoded);
        (algorithm.download(&tex, &ctx.layout), recorded)
    }

    fn near(kps: &[Keypoint], x: f32, y: f32, r: f32) -> bool {
        kps.iter().any(|k| (k.x - x).abs() <= r && (k.y - y).abs() <= r)
    }

    #[test]
    fn test_build_round_trips_kind() {
        for kind in [
            AlgorithmKind::Fast(FastVariant::Fast7_12),
            AlgorithmKind::Harris(HarrisWindow::W5),
            AlgorithmKind::MultiscaleFast,
            AlgorithmKind::MultiscaleHarris,
        ] {
            assert_eq!(kind.build().kind(), kind);
        }
        assert!(AlgorithmKind::MultiscaleFast.is_multiscale());
        assert!(!AlgorithmKind::Fast(FastVariant::Fast9_16).is_multiscale());
    }

    #[test]
    fn test_fast_sensitivity_maps_to_threshold() {
        let mut a = FastAlgorithm::new(FastConfig::default(), false);
        assert!((a.sensitivity() - 0.8).abs() < 1e-6);
        a.set_sensitivity(1.0);
        assert_eq!(a.get("threshold").unwrap(), 0.0);
        a.set_sensitivity(-3.0);
        assert_eq!(a.get("threshold").unwrap(), FAST_MAX_THRESHOLD);
        a.set("threshold", 0.25).unwrap();
        assert!((a.get("sensitivity").unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_harris_sensitivity_maps_to_quality() {
        let mut a = HarrisAlgorithm::new(HarrisConfig::default(), false);
        assert!((a.sensitivity() - 0.9).abs() < 1e-6);
        a.set("sensitivity", 0.25).unwrap();
        assert!((a.get("quality").unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parameter_errors() {
        let mut a = AlgorithmKind::Fast(FastVariant::Fast9_16).build();
        assert_eq!(a.parameters(), &["threshold", "sensitivity"]);
        assert!(matches!(a.get("quality"), Err(Error::InvalidArgument(_))));
        assert!(matches!(a.set("threshold", 1.5), Err(Error::InvalidArgument(_))));
        assert!(matches!(a.set("sensitivity", f32::NAN), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_multiscale_fast_forces_fast9() {
        let cfg = FastConfig { variant: FastVariant::Fast5_8, threshold: 0.1 };
        assert_eq!(FastAlgorithm::new(cfg, true).config().variant, FastVariant::Fast9_16);
    }

    #[test]
    fn test_fast_finds_square_corners() {
        let a = FastAlgorithm::new(FastConfig::default(), false);
        let (kps, _) = run_detect(&a, square_image(32));
        assert!(!kps.is_empty());
        for (x, y) in [(8.0, 8.0), (23.0, 8.0), (8.0, 23.0), (23.0, 23.0)] {
            assert!(near(&kps, x, y, 2.0), "no keypoint near ({x}, {y}): {kps:?}");
        }
        for k in &kps {
            assert_eq!(k.lod, 0.0);
            assert!(k.score > 0.0 && k.score <= 1.0);
        }
    }

    #[test]
    fn test_multiscale_records_one_pass_per_lod() {
        let single = FastAlgorithm::new(FastConfig::default(), false);
        let multi = FastAlgorithm::new(FastConfig::default(), true);
        let (_, n_single) = run_detect(&single, square_image(32));
        let (kps, n_multi) = run_detect(&multi, square_image(32));
        let lods = EngineConfig::default().lods(32, 32).len();
        assert_eq!(n_multi - n_single, lods - 1);
        assert!(!kps.is_empty());
    }

    #[test]
    fn test_harris_finds_square_corners() {
        let a = HarrisAlgorithm::new(HarrisConfig::default(), false);
        let (kps, _) = run_detect(&a, square_image(32));
        assert!(!kps.is_empty());
        assert!(kps.iter().any(|k| k.score == 1.0));
        for (x, y) in [(8.0, 8.0), (23.0, 23.0)] {
            assert!(near(&kps, x, y, 2.0), "no keypoint near ({x}, {y}): {kps:?}");
        }
    }

    #[test]
    fn test_uniform_image_has_no_keypoints() {
        let flat = Texture::filled(24, 24, [0.5, 0.5, 0.5, 1.0]);
        let (fast, _) = run_detect(&FastAlgorithm::new(FastConfig::default(), false), flat.clone());
        let (harris, _) = run_detect(&HarrisAlgorithm::new(HarrisConfig::default(), true), flat);
        assert!(fast.is_empty());
        assert!(harris.is_empty());
    }

    #[test]
    fn test_harris_response_redeclares_window_kernel() {
        let cfg = HarrisConfig { response: HarrisResponse::Harris { k: 0.04 }, ..HarrisConfig::default() };
        let a = HarrisAlgorithm::new(cfg, false);
        let (kps, _) = run_detect(&a, square_image(32));
        assert!(near(&kps, 8.0, 8.0, 2.0));
    }
}
