// benches/benchmarks.rs -- Per-algorithm and full-node benchmarks.
//
// Synthetic 752×480 frames (a common machine-vision camera resolution).
//
//   cargo bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use lumeq::config::{EqualizeConfig, EqualizeMethod, NodeParams};
use lumeq::frame::{Encoding, Frame, Header, Stamp};
use lumeq::histeq::{equalize_histogram, Clahe};
use lumeq::image::Image;
use lumeq::node::EqualizeNode;

const W: usize = 752;
const H: usize = 480;

/// Synthetic low-contrast scene with texture.
fn make_scene(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let base = (x * 120 / w + y * 40 / h) as u8;
            let noise = ((x * 7 + y * 13) % 23) as u8;
            img.set(x, y, 60 + base + noise);
        }
    }
    img
}

/// The same scene as an interleaved BGR frame.
fn make_bgr_frame(w: usize, h: usize) -> Frame {
    let gray = make_scene(w, h);
    let mut data = Vec::with_capacity(w * h * 3);
    for (_, _, v) in gray.pixels() {
        data.extend_from_slice(&[v, v.saturating_add(10), v.saturating_sub(10)]);
    }
    Frame::from_raw(
        Header::new(0, Stamp::default(), "cam0"),
        Encoding::Bgr8,
        w,
        h,
        data,
    )
    .unwrap()
}

fn bench_global(c: &mut Criterion) {
    let img = make_scene(W, H);
    c.bench_function("equalize_histogram 752x480", |b| {
        b.iter(|| equalize_histogram(&img))
    });
}

fn bench_clahe(c: &mut Criterion) {
    let img = make_scene(W, H);
    let mut group = c.benchmark_group("clahe 752x480");
    for tiles in [2usize, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(tiles), &tiles, |b, &tiles| {
            let mut clahe = Clahe::new();
            clahe.set_tile_grid(tiles, tiles);
            clahe.set_clip_limit(2.0);
            b.iter(|| clahe.apply(&img))
        });
    }
    group.finish();
}

fn bench_node_end_to_end(c: &mut Criterion) {
    let frame = make_bgr_frame(W, H);
    let params = NodeParams {
        use_gpu: false,
        ..Default::default()
    };

    let mut group = c.benchmark_group("node process bgr 752x480");
    for method in [EqualizeMethod::Global, EqualizeMethod::Clahe] {
        let mut node = EqualizeNode::with_config(
            params.clone(),
            EqualizeConfig {
                histogram_equalization_type: method,
                ..Default::default()
            },
        )
        .unwrap();
        group.bench_function(format!("{method:?}"), |b| {
            b.iter(|| node.process(&frame).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_global, bench_clahe, bench_node_end_to_end);
criterion_main!(benches);
