// demos/equalize_live.rs
//
// Live demonstration of the equalizer node on a synthetic camera stream
// (or a still image replayed with drifting exposure). Input and output are
// shown side by side; the node is driven through the bus exactly the way
// a hosting process would drive it.
//
// Usage:
//   cargo run --example equalize_live --release
//   cargo run --example equalize_live --release -- /path/to/photo.png
//
// Controls:
//   H      — toggle Global / CLAHE
//   +/-    — raise / lower the CLAHE clip limit
//   [ / ]  — shrink / grow the CLAHE tile grid
//   Q/Esc  — quit

use lumeq::bus::Topic;
use lumeq::config::{EqualizeConfig, EqualizeMethod, NodeParams};
use lumeq::frame::{Frame, Header, Stamp};
use lumeq::image::Image;
use lumeq::node::{EqualizeNode, NodeHost};

use minifb::{Key, Window, WindowOptions};
use std::env;
use std::time::Instant;

fn main() {
    env_logger::init();

    let source = match env::args().nth(1) {
        Some(path) => load_grayscale(&path),
        None => synthetic_scene(376, 240),
    };
    let (img_w, img_h) = (source.width(), source.height());
    println!("Source: {img_w}×{img_h}");

    // Node wired to the bus. GPU backend on by default; falls back to the
    // CPU path when no adapter exists.
    let image_in = Topic::new("image");
    let synced_in = Topic::new("image_synced");
    let image_out = Topic::new("image_out");
    let node = EqualizeNode::new(NodeParams::default());
    let mut host = NodeHost::new(
        node,
        image_in.clone(),
        synced_in,
        image_out,
    );

    let listener = host.output().subscribe(4);
    host.on_subscriber_added();

    let mut config = EqualizeConfig::default();

    // Side-by-side window: input | output.
    let win_w = img_w * 2;
    let win_h = img_h;
    let mut window = Window::new(
        "lumeq — input | equalized",
        win_w,
        win_h,
        WindowOptions::default(),
    )
    .expect("failed to create window");
    window.set_target_fps(30);

    let mut fb = vec![0u32; win_w * win_h];
    let mut seq = 0u64;
    let start = Instant::now();

    println!("Controls: H=method, +/-=clip limit, [/]=tile grid, Q/Esc=quit");

    while window.is_open() && !window.is_key_down(Key::Escape) && !window.is_key_down(Key::Q) {
        if window.is_key_pressed(Key::H, minifb::KeyRepeat::No) {
            config.histogram_equalization_type = match config.histogram_equalization_type {
                EqualizeMethod::Global => EqualizeMethod::Clahe,
                EqualizeMethod::Clahe => EqualizeMethod::Global,
            };
            host.node_mut().reconfigure(config.clone()).unwrap();
            println!("method: {:?}", config.histogram_equalization_type);
        }
        if window.is_key_pressed(Key::Equal, minifb::KeyRepeat::No)
            || window.is_key_pressed(Key::NumPadPlus, minifb::KeyRepeat::No)
        {
            config.clahe_clip_limit = (config.clahe_clip_limit + 0.5).min(40.0);
            host.node_mut().reconfigure(config.clone()).unwrap();
            println!("clip limit: {}", config.clahe_clip_limit);
        }
        if window.is_key_pressed(Key::Minus, minifb::KeyRepeat::No)
            || window.is_key_pressed(Key::NumPadMinus, minifb::KeyRepeat::No)
        {
            config.clahe_clip_limit = (config.clahe_clip_limit - 0.5).max(0.5);
            host.node_mut().reconfigure(config.clone()).unwrap();
            println!("clip limit: {}", config.clahe_clip_limit);
        }
        if window.is_key_pressed(Key::LeftBracket, minifb::KeyRepeat::No) {
            config.clahe_tile_size_x = (config.clahe_tile_size_x / 2).max(1);
            config.clahe_tile_size_y = (config.clahe_tile_size_y / 2).max(1);
            host.node_mut().reconfigure(config.clone()).unwrap();
            println!("tile grid: {}×{}", config.clahe_tile_size_x, config.clahe_tile_size_y);
        }
        if window.is_key_pressed(Key::RightBracket, minifb::KeyRepeat::No) {
            config.clahe_tile_size_x = (config.clahe_tile_size_x * 2).min(64);
            config.clahe_tile_size_y = (config.clahe_tile_size_y * 2).min(64);
            host.node_mut().reconfigure(config.clone()).unwrap();
            println!("tile grid: {}×{}", config.clahe_tile_size_x, config.clahe_tile_size_y);
        }

        // Simulate a camera with wandering exposure.
        let t = start.elapsed().as_secs_f32();
        let exposed = apply_exposure(&source, 0.55 + 0.45 * (t * 0.8).sin());

        let frame = Frame::from_gray(
            Header::new(seq, Stamp::new(t as i64, 0), "cam0"),
            &exposed,
        );
        seq += 1;

        image_in.publish(&frame);
        host.spin_once();

        if let Some(out) = listener.drain().pop() {
            let equalized = Image::from_vec(out.width, out.height, out.data);
            blit(&exposed, &mut fb, win_w, 0);
            blit(&equalized, &mut fb, win_w, img_w);
        }

        window.update_with_buffer(&fb, win_w, win_h).unwrap();
    }

    println!("Processed {seq} frames.");
}

// ---------------------------------------------------------------------------
// Scene generation / I/O
// ---------------------------------------------------------------------------

fn load_grayscale(path: &str) -> Image<u8> {
    let img = image::open(path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"));
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    Image::from_vec(w as usize, h as usize, gray.into_raw())
}

/// Low-contrast scene with structure at several scales: a ramp, bright
/// rectangles, and fine texture. Equalization makes the structure pop.
fn synthetic_scene(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let ramp = (x * 60 / w) as u8;
            let texture = ((x * 7 + y * 13) % 17) as u8;
            img.set(x, y, 80 + ramp + texture);
        }
    }
    let rects: [(usize, usize, usize, usize, u8); 3] = [
        (w / 8, h / 6, w / 5, h / 4, 150),
        (w / 2, h / 3, w / 4, h / 5, 115),
        (w / 3, (h * 2) / 3, w / 6, h / 6, 135),
    ];
    for &(rx, ry, rw, rh, val) in &rects {
        for y in ry..(ry + rh).min(h) {
            for x in rx..(rx + rw).min(w) {
                img.set(x, y, val);
            }
        }
    }
    img
}

/// Scale pixel intensities by `gain`, saturating at white.
fn apply_exposure(img: &Image<u8>, gain: f32) -> Image<u8> {
    let mut out = Image::new(img.width(), img.height());
    for (x, y, v) in img.pixels() {
        out.set(x, y, (v as f32 * gain).clamp(0.0, 255.0) as u8);
    }
    out
}

/// Blit a grayscale image into the packed framebuffer at a column offset.
fn blit(img: &Image<u8>, fb: &mut [u32], fb_w: usize, x_off: usize) {
    for y in 0..img.height() {
        for (x, &v) in img.row(y).iter().enumerate() {
            let v = v as u32;
            fb[y * fb_w + x_off + x] = (v << 16) | (v << 8) | v;
        }
    }
}
