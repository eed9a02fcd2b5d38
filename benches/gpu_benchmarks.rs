// benches/gpu_benchmarks.rs — FAST on the GPU vs the CPU kernel.
//
//   cargo bench --bench gpu_benchmarks
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including buffer uploads, bind group
// creation, submit and readback. That is the cost the kernel graph pays per
// invocation, so it is the right number here.
//
// The first iterations pay shader compilation on some drivers; warmup_time
// is set explicitly to keep measurements stable.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;

use fastorb::algorithm::AlgorithmKind;
use fastorb::config::{EngineConfig, PyramidConfig};
use fastorb::detector::{DetectSettings, FeatureDetector, Media};
use fastorb::fast::{FastKernel, FastVariant};
use fastorb::gpu::{declare_gpu_fast, GpuDevice, GpuFastKernel};
use fastorb::kernel::{Input, Kernel};
use fastorb::programs::standard_registry;
use fastorb::pyramid::build_pyramid;
use fastorb::texture::Texture;

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
        for y in ry..(ry + 70).min(h) {
            for x in rx..(rx + 60).min(w) {
                img[y * w + x] = 200;
            }
        }
    }
    img
}

fn bench_fast(c: &mut Criterion) {
    let img = Texture::from_luma_u8(640, 480, &make_scene_bytes(640, 480));
    let pyramid = build_pyramid(&img, &PyramidConfig { levels: 4 });
    let prev = Texture::new(640, 480);

    let gpu = Arc::new(GpuDevice::new().expect("no GPU"));
    let gpu_fast = GpuFastKernel::new(Arc::clone(&gpu), FastVariant::Fast9_16);
    let cpu_fast = FastKernel::new(FastVariant::Fast9_16);

    let mut group = c.benchmark_group("fast");
    group.warm_up_time(Duration::from_secs(2));
    for lod in [0.0f32, 1.5] {
        let inputs = [Input::Texture(&prev), Input::Texture(&pyramid), Input::Float(lod), Input::Float(0.1)];
        group.bench_function(format!("cpu_lod{lod}_640x480"), |b| {
            let mut out = Texture::new(640, 480);
            b.iter(|| cpu_fast.run(&inputs, &mut out))
        });
        group.bench_function(format!("gpu_lod{lod}_640x480"), |b| {
            let mut out = Texture::new(640, 480);
            b.iter(|| gpu_fast.run(&inputs, &mut out))
        });
    }
    group.finish();
}

fn bench_detector(c: &mut Criterion) {
    let media = Media::greyscale(640, 480, &make_scene_bytes(640, 480)).expect("scene size");
    let config = EngineConfig::default();
    let gpu = Arc::new(GpuDevice::new().expect("no GPU"));
    let mut registry = standard_registry(&config);
    declare_gpu_fast(&mut registry, &gpu);

    let mut cpu = FeatureDetector::new(AlgorithmKind::MultiscaleFast, config).expect("valid config");
    let mut accelerated =
        FeatureDetector::with_registry(AlgorithmKind::MultiscaleFast, config, registry).expect("valid config");

    let mut group = c.benchmark_group("detector_multiscale_fast");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(2));
    group.bench_function("cpu", |b| {
        b.iter(|| cpu.detect(&media, &DetectSettings::default()).expect("detect").wait())
    });
    group.bench_function("gpu_fast", |b| {
        b.iter(|| accelerated.detect(&media, &DetectSettings::default()).expect("detect").wait())
    });
    group.finish();
}

criterion_group!(benches, bench_fast, bench_detector);
criterion_main!(benches);
