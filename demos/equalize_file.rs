// demos/equalize_file.rs
//
// One-shot file tool: load an image, equalize it, save the result.
//
// Usage:
//   cargo run --example equalize_file --release -- input.png output.png
//   cargo run --example equalize_file --release -- input.png output.png config.json
//
// The optional JSON config matches EqualizeConfig, e.g.:
//   { "histogram_equalization_type": "Clahe",
//     "clahe_tile_size_x": 8, "clahe_tile_size_y": 8,
//     "clahe_clip_limit": 2.5 }

use lumeq::config::{EqualizeConfig, NodeParams};
use lumeq::frame::{Frame, Header, Stamp};
use lumeq::image::Image;
use lumeq::node::EqualizeNode;

use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output> [config.json]", args[0]);
        process::exit(1);
    }

    let config = match args.get(3) {
        Some(path) => {
            let text = fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
            serde_json::from_str(&text)
                .unwrap_or_else(|e| panic!("bad config {path}: {e}"))
        }
        None => EqualizeConfig::default(),
    };
    println!("config: {config:?}");

    let gray = load_grayscale(&args[1]);
    let frame = Frame::from_gray(Header::new(0, Stamp::default(), "file"), &gray);

    let mut node = EqualizeNode::with_config(NodeParams::default(), config)
        .unwrap_or_else(|e| panic!("invalid config: {e}"));
    let out = node
        .process(&frame)
        .unwrap_or_else(|e| panic!("processing failed: {e}"));

    let buffer = image::GrayImage::from_raw(out.width as u32, out.height as u32, out.data)
        .expect("output buffer size mismatch");
    buffer
        .save(&args[2])
        .unwrap_or_else(|e| panic!("failed to save {}: {e}", args[2]));
    println!("wrote {}", args[2]);
}

fn load_grayscale(path: &str) -> Image<u8> {
    let img = image::open(path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"));
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    Image::from_vec(w as usize, h as usize, gray.into_raw())
}
