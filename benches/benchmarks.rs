// benches/benchmarks.rs -- Per-stage and full-pipeline benchmarks (CPU kernels).
//
//   cargo bench
//
// Every stage runs on the same synthetic 640×480 scene: a gradient
// background with bright rectangles, so FAST and Harris both find corners.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use fastorb::algorithm::AlgorithmKind;
use fastorb::config::{EngineConfig, PyramidConfig};
use fastorb::detector::{DetectSettings, FeatureDetector, Media};
use fastorb::fast::{fast_scores, FastVariant};
use fastorb::harris::{harris_scores, HarrisResponse, HarrisWindow};
use fastorb::homography::{homography_4p, homography_dlt, HomographyLayout, SvdSolver};
use fastorb::kernel::{Input, Kernel};
use fastorb::nms::NonMax;
use fastorb::pyramid::build_pyramid;
use fastorb::texture::Texture;

// ============================================================
// Helpers
// ============================================================

fn make_scene_bytes(w: usize, h: usize) -> Vec<u8> {
    let mut img = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            img[y * w + x] = ((x * 120 / w) + (y * 40 / h)) as u8;
        }
    }
    for rect in 0..6 {
        let rx = 40 + rect * 95;
        let ry = 40 + (rect % 3) * 130;
        let bright = 190 + rect as u8 * 10;
        for y in ry..(ry + 70).min(h) {
            for x in rx..(rx + 60).min(w) {
                img[y * w + x] = bright;
            }
        }
    }
    img
}

fn make_scene(w: usize, h: usize) -> Texture {
    Texture::from_luma_u8(w, h, &make_scene_bytes(w, h))
}

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_pyramid(c: &mut Criterion) {
    let img = make_scene(640, 480);
    let mut group = c.benchmark_group("pyramid");
    for levels in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("build_640x480", levels), &levels, |b, &levels| {
            b.iter(|| build_pyramid(&img, &PyramidConfig { levels }))
        });
    }
    group.finish();
}

fn bench_fast(c: &mut Criterion) {
    let img = make_scene(640, 480);
    let mut group = c.benchmark_group("fast");
    for variant in [FastVariant::Fast9_16, FastVariant::Fast7_12, FastVariant::Fast5_8] {
        group.bench_function(variant.program(), |b| b.iter(|| fast_scores(&img, variant, 0.1)));
    }
    group.finish();
}

fn bench_harris(c: &mut Criterion) {
    let img = make_scene(640, 480);
    let mut group = c.benchmark_group("harris");
    for window in [HarrisWindow::W1, HarrisWindow::W3, HarrisWindow::W7] {
        group.bench_function(window.program(), |b| {
            b.iter(|| harris_scores(&img, window, HarrisResponse::ShiTomasi))
        });
    }
    group.finish();
}

fn bench_nms(c: &mut Criterion) {
    let scores = fast_scores(&make_scene(640, 480), FastVariant::Fast9_16, 0.05);
    c.bench_function("nonmax_640x480", |b| {
        b.iter(|| {
            let mut out = Texture::new(640, 480);
            NonMax.run(&[Input::Texture(&scores)], &mut out);
            out
        })
    });
}

fn bench_homography(c: &mut Criterion) {
    let src = [0.1, 0.1, 0.9, 0.15, 0.85, 0.9, 0.2, 0.8];
    let dst = [0.0, 0.0, 2.0, 0.1, 1.9, 2.1, 0.1, 1.8];
    let mut group = c.benchmark_group("homography");
    group.bench_function("4p", |b| {
        let mut out = [0.0; 9];
        b.iter(|| homography_4p(&HomographyLayout::packed(4), &mut out, [&src, &dst]))
    });

    let n = 100;
    let src: Vec<f64> = (0..n).flat_map(|i| [(i % 10) as f64 / 10.0, (i / 10) as f64 / 10.0]).collect();
    let dst: Vec<f64> = src.chunks(2).flat_map(|p| [2.0 * p[0] + 0.1, 1.5 * p[1] - 0.2]).collect();
    let solver = SvdSolver::default();
    group.bench_function("dlt_100", |b| {
        let mut out = [0.0; 9];
        b.iter(|| homography_dlt(&HomographyLayout::packed(n), &mut out, [&src, &dst], &solver))
    });
    group.finish();
}

// ============================================================
// Full pipeline
// ============================================================

fn bench_detector(c: &mut Criterion) {
    let media = Media::greyscale(640, 480, &make_scene_bytes(640, 480)).expect("scene size");
    let mut group = c.benchmark_group("detector");
    group.sample_size(10);
    for kind in [
        AlgorithmKind::Fast(FastVariant::Fast9_16),
        AlgorithmKind::MultiscaleFast,
        AlgorithmKind::Harris(HarrisWindow::W3),
    ] {
        let mut detector = FeatureDetector::new(kind, EngineConfig::default()).expect("valid config");
        group.bench_function(format!("{kind:?}"), |b| {
            b.iter(|| detector.detect(&media, &DetectSettings::default()).expect("detect").wait())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_pyramid,
    bench_fast,
    bench_harris,
    bench_nms,
    bench_homography,
    bench_detector,
);
criterion_main!(benches);
