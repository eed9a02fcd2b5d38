// detector.rs — Feature detector facade.
//
// `FeatureDetector` owns the kernel registry, one reusable `KernelGraph`
// and the selected algorithm. A detection call:
//
//   1. validates the media and settings (errors before anything is recorded)
//   2. records:  upload → gauss5 (denoise) → greyscale (colour media only)
//                → enhance_illumination (detection copy only)
//                → algorithm.detect → describe | orient + suppress_descriptors
//   3. returns `PendingKeypoints`; nothing has executed yet
//
// `PendingKeypoints::download().await` runs exactly the kernels the encoded
// set depends on, decodes it, sorts by score and truncates to `max`.
//
// AUTOMATIC SENSITIVITY
// ─────────────────────
// With `expect(Some(n), tolerance)` every download nudges the algorithm's
// sensitivity toward producing `n` keypoints. The step is proportional to
// the relative error and only taken when the error leaves the tolerance
// band, so a detector that is close enough stays put.

use std::sync::Arc;

use crate::algorithm::{AlgorithmKind, DetectContext, FeaturesAlgorithm};
use crate::config::EngineConfig;
use crate::encoding::{min_encoder_length, EncoderLayout, Keypoint};
use crate::error::{Error, Result};
use crate::graph::{BufferHandle, KernelGraph, KernelRegistry};
use crate::orb::DESCRIPTOR_SIZE;
use crate::programs::standard_registry;
use crate::texture::{Plane, Texture};

/// Sensitivity change per unit of relative count error.
const SENSITIVITY_GAIN: f32 = 0.25;

/// Largest single sensitivity step.
const MAX_SENSITIVITY_STEP: f32 = 0.1;

/// Default relative tolerance of [`FeatureDetector::expect`].
pub const DEFAULT_TOLERANCE: f32 = 0.10;

// ============================================================
// Media
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Greyscale,
    Rgb,
    Rgba,
}

impl ColorFormat {
    pub fn channels(&self) -> usize {
        match self {
            ColorFormat::Greyscale => 1,
            ColorFormat::Rgb => 3,
            ColorFormat::Rgba => 4,
        }
    }
}

/// An 8-bit image uploaded as a texture. Released media can no longer be
/// detected on.
#[derive(Debug, Clone)]
pub struct Media {
    texture: Texture,
    format: ColorFormat,
    released: bool,
}

impl Media {
    pub fn greyscale(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(width, height, bytes, ColorFormat::Greyscale)
    }

    pub fn rgb(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(width, height, bytes, ColorFormat::Rgb)
    }

    pub fn rgba(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(width, height, bytes, ColorFormat::Rgba)
    }

    fn from_bytes(width: usize, height: usize, bytes: &[u8], format: ColorFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid(format!("media must not be empty ({width}×{height})")));
        }
        let channels = format.channels();
        let expected = width * height * channels;
        if bytes.len() != expected {
            return Err(Error::invalid(format!(
                "{format:?} media of {width}×{height} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let texture = if format == ColorFormat::Greyscale {
            Texture::from_luma_u8(width, height, bytes)
        } else {
            let data = bytes
                .chunks_exact(channels)
                .map(|px| {
                    let a = if channels == 4 { px[3] as f32 / 255.0 } else { 1.0 };
                    [px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0, a]
                })
                .collect();
            Texture::from_plane(Plane::from_vec(width, height, data))
        };
        Ok(Media { texture, format, released: false })
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn size(&self) -> (usize, usize) {
        self.texture.size()
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Drop the pixel data. Any later detection on this media fails.
    pub fn release(&mut self) {
        self.texture = Texture::default();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

// ============================================================
// Settings
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Enhancements {
    /// Normalise uneven lighting before detection.
    pub illumination: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectSettings {
    /// Smooth the media with a 5-tap Gaussian first.
    pub denoise: bool,
    /// Keep at most this many keypoints (the best scoring ones).
    pub max: Option<usize>,
    pub enhancements: Enhancements,
    /// Compute ORB descriptors. When off, keypoints are still oriented.
    pub descriptors: bool,
}

impl Default for DetectSettings {
    fn default() -> Self {
        DetectSettings {
            denoise: true,
            max: None,
            enhancements: Enhancements::default(),
            descriptors: true,
        }
    }
}

impl DetectSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max == Some(0) {
            return Err(Error::invalid("max must be > 0 when set"));
        }
        Ok(())
    }
}

// ============================================================
// Detector
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct Expectation {
    target: usize,
    tolerance: f32,
}

pub struct FeatureDetector {
    algorithm: Box<dyn FeaturesAlgorithm>,
    config: EngineConfig,
    graph: KernelGraph,
    layout: EncoderLayout,
    expected: Option<Expectation>,
}

impl FeatureDetector {
    /// Detector backed by the CPU kernels.
    pub fn new(kind: AlgorithmKind, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Self::with_algorithm(kind.build(), config, standard_registry(&config))
    }

    /// Detector over a caller-supplied registry, e.g. one with GPU kernels
    /// redeclared on top of [`standard_registry`].
    pub fn with_registry(kind: AlgorithmKind, config: EngineConfig, registry: KernelRegistry) -> Result<Self> {
        Self::with_algorithm(kind.build(), config, registry)
    }

    /// Detector over an already configured algorithm.
    pub fn with_algorithm(
        algorithm: Box<dyn FeaturesAlgorithm>,
        config: EngineConfig,
        mut registry: KernelRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let length = min_encoder_length(config.max_keypoints, DESCRIPTOR_SIZE, 0);
        let layout = EncoderLayout::new(DESCRIPTOR_SIZE, 0, length)?;
        algorithm.declare_kernels(&mut registry);
        log::debug!(
            "feature detector: {:?}, encoder {}×{} ({} keypoints)",
            algorithm.kind(),
            length,
            length,
            layout.capacity()
        );
        Ok(FeatureDetector {
            algorithm,
            config,
            graph: KernelGraph::new(Arc::new(registry)),
            layout,
            expected: None,
        })
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Layout of the encoded set when descriptors are computed.
    pub fn layout(&self) -> &EncoderLayout {
        &self.layout
    }

    /// Record a detection on `media`. Nothing runs until the returned
    /// handle is downloaded.
    pub fn detect(&mut self, media: &Media, settings: &DetectSettings) -> Result<PendingKeypoints<'_>> {
        if media.is_released() {
            return Err(Error::illegal("can't detect features on released media"));
        }
        settings.validate()?;

        let graph = &mut self.graph;
        graph.clear();
        let size = media.size();
        let mut image = graph.input(media.texture().clone());
        if settings.denoise {
            image = graph.run("gauss5", &[image.into()]);
        }
        if media.format() != ColorFormat::Greyscale {
            image = graph.run("greyscale", &[image.into()]);
        }
        let enhanced = if settings.enhancements.illumination {
            graph.run("enhance_illumination", &[image.into()])
        } else {
            image
        };

        let ctx = DetectContext {
            image: enhanced,
            descriptor_image: image,
            size,
            config: self.config,
            layout: self.layout,
        };
        let detected = self.algorithm.detect(graph, &ctx);
        let (encoded, layout) = if settings.descriptors {
            (self.algorithm.describe(graph, &ctx, detected), self.layout)
        } else {
            let oriented = self.algorithm.orient(graph, &ctx, detected);
            let shrunk = min_encoder_length(self.layout.capacity(), 0, 0);
            let l = &self.layout;
            let handle = graph.run(
                "suppress_descriptors",
                &[
                    oriented.into(),
                    l.descriptor_size.into(),
                    l.extra_size.into(),
                    l.encoder_length.into(),
                    shrunk.into(),
                ],
            );
            (handle, EncoderLayout::new(0, 0, shrunk)?)
        };
        log::trace!("detect: recorded {} nodes", graph.len());

        Ok(PendingKeypoints { detector: self, encoded, layout, max: settings.max })
    }

    /// Enable automatic sensitivity aiming at `target` keypoints per call,
    /// or disable it with `None`. Negative tolerances count as zero.
    pub fn expect(&mut self, target: Option<usize>, tolerance: f32) {
        self.expected = target.map(|target| Expectation { target, tolerance: tolerance.max(0.0) });
    }

    pub fn expected(&self) -> Option<(usize, f32)> {
        self.expected.map(|e| (e.target, e.tolerance))
    }

    pub fn parameters(&self) -> &'static [&'static str] {
        self.algorithm.parameters()
    }

    pub fn get(&self, name: &str) -> Result<f32> {
        self.algorithm.get(name)
    }

    pub fn set(&mut self, name: &str, value: f32) -> Result<()> {
        self.algorithm.set(name, value)
    }

    pub fn sensitivity(&self) -> f32 {
        self.algorithm.sensitivity()
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.algorithm.set_sensitivity(sensitivity);
    }

    fn adjust_sensitivity(&mut self, count: usize) {
        let Some(e) = self.expected else { return };
        let target = e.target as f32;
        let error = count as f32 - target;
        if error.abs() <= e.tolerance * target {
            return;
        }
        let relative = error / target.max(1.0);
        let step = (SENSITIVITY_GAIN * relative).clamp(-MAX_SENSITIVITY_STEP, MAX_SENSITIVITY_STEP);
        let before = self.algorithm.sensitivity();
        let after = (before - step).clamp(0.0, 1.0);
        self.algorithm.set_sensitivity(after);
        log::debug!(
            "auto sensitivity: {count} keypoints (target {}), {before:.3} → {after:.3}",
            e.target
        );
    }
}

/// A recorded detection waiting to be downloaded.
pub struct PendingKeypoints<'a> {
    detector: &'a mut FeatureDetector,
    encoded: BufferHandle,
    layout: EncoderLayout,
    max: Option<usize>,
}

impl PendingKeypoints<'_> {
    /// Layout of the encoded set this download will decode.
    pub fn layout(&self) -> &EncoderLayout {
        &self.layout
    }

    /// Execute the graph and decode the keypoints, best first.
    pub async fn download(self) -> Vec<Keypoint> {
        let detector = self.detector;
        let texture = detector.graph.download(self.encoded).await;
        let mut keypoints = detector.algorithm.download(&texture, &self.layout);
        keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
        detector.adjust_sensitivity(keypoints.len());
        if let Some(max) = self.max {
            keypoints.truncate(max);
        }
        keypoints
    }

    /// Blocking form of [`download`](Self::download).
    pub fn wait(self) -> Vec<Keypoint> {
        pollster::block_on(self.download())
    }
}
