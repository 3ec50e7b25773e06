// histeq.rs — Histogram equalization: the node's processing core.
//
// Camera auto-exposure keeps the *average* brightness in range but does
// nothing for contrast: underexposed shadows and washed-out highlights both
// survive. Equalization redistributes intensities so the cumulative
// distribution is approximately uniform.
//
// Two variants:
//
// 1. GLOBAL histogram equalization: one histogram over the entire image,
//    CDF → lookup table, remap every pixel. The textbook algorithm from
//    Gonzalez & Woods.
//
// 2. CLAHE (Contrast Limited Adaptive Histogram Equalization): divide the
//    image into a grid of tiles, equalize each tile independently with a
//    clip limit bounding local contrast amplification, then bilinearly
//    interpolate between tile LUTs for smooth transitions. Better for
//    scenes with large dynamic range (indoor/outdoor boundaries) at the
//    cost of possible noise amplification in flat regions.
//    Reference: Zuiderveld (1994), Graphics Gems IV.
//
// The CLAHE state lives in a reusable `Clahe` processor so the per-tile
// LUT allocation survives across frames. gpu/histeq.rs mirrors both
// variants with compute kernels, sharing the LUT construction below.

use crate::image::Image;

/// Apply global histogram equalization to a grayscale image.
///
/// Algorithm:
///   1. Compute the 256-bin histogram (one pass).
///   2. Build the cumulative distribution function (CDF).
///   3. Remap: `output[i] = round((cdf[input[i]] − cdf_min) / (n − cdf_min) · 255)`.
pub fn equalize_histogram(image: &Image<u8>) -> Image<u8> {
    let w = image.width();
    let h = image.height();
    let n = w * h;

    if n == 0 {
        return Image::new(w, h);
    }

    let mut hist = [0u32; 256];
    for y in 0..h {
        for &v in image.row(y) {
            hist[v as usize] += 1;
        }
    }

    let lut = build_lut(&hist, n);

    let mut out = Image::new(w, h);
    for y in 0..h {
        let src = image.row(y);
        let dst = out.row_mut(y);
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = lut[s as usize];
        }
    }
    out
}

/// Build a 256-entry lookup table from a histogram and total pixel count.
///
/// Shared by the global path, the CLAHE per-tile path, and the GPU backend
/// (which builds LUTs on the CPU from readback histograms so both backends
/// remap identically).
pub(crate) fn build_lut(hist: &[u32; 256], total: usize) -> [u8; 256] {
    let mut cdf = [0u32; 256];
    cdf[0] = hist[0];
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
    }

    // First non-zero CDF value (skip fully empty leading bins).
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);

    let mut lut = [0u8; 256];
    let denom = total as f32 - cdf_min as f32;
    if denom <= 0.0 {
        // Degenerate: every pixel has the same value.
        return lut;
    }

    for i in 0..256 {
        let val = (cdf[i] as f32 - cdf_min as f32) / denom * 255.0;
        lut[i] = val.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Clip histogram bins at `ceil(clip_multiplier · total_pixels / 256)` and
/// redistribute the excess evenly across all bins.
///
/// The clip limit is a multiplier on the "uniform" bin count; 2.0–4.0 is
/// typical. Higher means less clipping and more local contrast.
pub(crate) fn clip_histogram(hist: &mut [u32; 256], total_pixels: usize, clip_multiplier: f32) {
    let clip_val = ((total_pixels as f32 / 256.0) * clip_multiplier).ceil() as u32;

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip_val {
            excess += *bin - clip_val;
            *bin = clip_val;
        }
    }

    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin;
        if i < remainder {
            *bin += 1;
        }
    }
}

/// Reusable CLAHE processor.
///
/// Holds the tile grid, clip limit, and the per-tile LUT allocation, which
/// is reused frame to frame. Construct once, reconfigure freely — setting
/// the grid and clip limit before every [`Clahe::apply`] is cheap and
/// idempotent.
pub struct Clahe {
    tiles_x: usize,
    tiles_y: usize,
    clip_limit: f32,
    /// Per-tile lookup tables, row-major over the tile grid. Reused across
    /// frames; resized when the effective grid changes.
    luts: Vec<[u8; 256]>,
}

impl Clahe {
    /// Create a processor with an 8×8 tile grid and clip limit 2.0.
    pub fn new() -> Self {
        Clahe {
            tiles_x: 8,
            tiles_y: 8,
            clip_limit: 2.0,
            luts: Vec::new(),
        }
    }

    /// Set the tile grid dimensions. Values are clamped to at least 1.
    pub fn set_tile_grid(&mut self, tiles_x: usize, tiles_y: usize) {
        self.tiles_x = tiles_x.max(1);
        self.tiles_y = tiles_y.max(1);
    }

    /// Set the clip limit. A non-positive value disables clipping.
    pub fn set_clip_limit(&mut self, clip_limit: f32) {
        self.clip_limit = clip_limit;
    }

    pub fn tile_grid(&self) -> (usize, usize) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn clip_limit(&self) -> f32 {
        self.clip_limit
    }

    /// Equalize a grayscale image.
    ///
    /// Deterministic: identical input and configuration produce identical
    /// output. The image is covered by `tiles_x × tiles_y` tiles (ceiling
    /// division, so edge tiles may be smaller); each output pixel blends
    /// the LUTs of the four nearest tile centers.
    pub fn apply(&mut self, image: &Image<u8>) -> Image<u8> {
        let w = image.width();
        let h = image.height();

        if w == 0 || h == 0 {
            return Image::new(w, h);
        }

        // Nominal tile size from the requested grid. An image smaller than
        // the grid degenerates to 1-pixel tiles and fewer effective
        // columns/rows.
        let tile_w = div_ceil(w, self.tiles_x).max(1);
        let tile_h = div_ceil(h, self.tiles_y).max(1);
        let cols = div_ceil(w, tile_w);
        let rows = div_ceil(h, tile_h);

        self.luts.clear();
        self.luts.resize(cols * rows, [0u8; 256]);

        for ty in 0..rows {
            for tx in 0..cols {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(w);
                let y1 = (y0 + tile_h).min(h);
                let tile_pixels = (x1 - x0) * (y1 - y0);

                let mut hist = [0u32; 256];
                for y in y0..y1 {
                    for &v in &image.row(y)[x0..x1] {
                        hist[v as usize] += 1;
                    }
                }

                if self.clip_limit > 0.0 {
                    clip_histogram(&mut hist, tile_pixels, self.clip_limit);
                }

                self.luts[ty * cols + tx] = build_lut(&hist, tile_pixels);
            }
        }

        // Remap with bilinear interpolation between the four nearest tile
        // centers. Centers use the nominal tile size, so edge tiles pull
        // slightly toward the interior — same behavior on both backends.
        let mut out = Image::new(w, h);

        let tile_cx = |tx: usize| -> f32 { (tx as f32 + 0.5) * tile_w as f32 };
        let tile_cy = |ty: usize| -> f32 { (ty as f32 + 0.5) * tile_h as f32 };

        for y in 0..h {
            let py = y as f32;
            let fy = (py / tile_h as f32) - 0.5;
            let ty0 = (fy.floor() as isize).max(0) as usize;
            let ty1 = (ty0 + 1).min(rows - 1);
            let ay = if ty0 == ty1 {
                0.0
            } else {
                ((py - tile_cy(ty0)) / (tile_cy(ty1) - tile_cy(ty0))).clamp(0.0, 1.0)
            };

            for x in 0..w {
                let px = x as f32;
                let fx = (px / tile_w as f32) - 0.5;
                let tx0 = (fx.floor() as isize).max(0) as usize;
                let tx1 = (tx0 + 1).min(cols - 1);
                let ax = if tx0 == tx1 {
                    0.0
                } else {
                    ((px - tile_cx(tx0)) / (tile_cx(tx1) - tile_cx(tx0))).clamp(0.0, 1.0)
                };

                let v = image.get(x, y) as usize;

                let v00 = self.luts[ty0 * cols + tx0][v] as f32;
                let v10 = self.luts[ty0 * cols + tx1][v] as f32;
                let v01 = self.luts[ty1 * cols + tx0][v] as f32;
                let v11 = self.luts[ty1 * cols + tx1][v] as f32;

                let val = v00 * (1.0 - ax) * (1.0 - ay)
                    + v10 * ax * (1.0 - ay)
                    + v01 * (1.0 - ax) * ay
                    + v11 * ax * ay;

                out.set(x, y, val.round().clamp(0.0, 255.0) as u8);
            }
        }

        out
    }
}

impl Default for Clahe {
    fn default() -> Self {
        Clahe::new()
    }
}

#[inline]
fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(img: &Image<u8>) -> u8 {
        let mut lo = 255u8;
        let mut hi = 0u8;
        for (_, _, v) in img.pixels() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        hi - lo
    }

    #[test]
    fn test_global_reference_values() {
        // Four distinct values, one pixel each:
        // cdf = [1, 2, 3, 4], cdf_min = 1, denom = 3
        // → lut = [0, 85, 170, 255].
        let img = Image::from_vec(2, 2, vec![0u8, 64, 128, 255]);
        let out = equalize_histogram(&img);
        assert_eq!(out.get(0, 0), 0);
        assert_eq!(out.get(1, 0), 85);
        assert_eq!(out.get(0, 1), 170);
        assert_eq!(out.get(1, 1), 255);
    }

    #[test]
    fn test_global_uniform_input_is_near_identity() {
        // Each value appears once → CDF is linear → output ≈ input.
        let mut img = Image::new(256, 1);
        for x in 0..256 {
            img.set(x, 0, x as u8);
        }
        let out = equalize_histogram(&img);
        for x in 0..256 {
            let diff = (out.get(x, 0) as i32 - x as i32).abs();
            assert!(diff <= 1, "pixel {x}: expected ~{x}, got {}", out.get(x, 0));
        }
    }

    #[test]
    fn test_global_constant_image() {
        let img = Image::from_vec(10, 10, vec![128u8; 100]);
        let out = equalize_histogram(&img);
        let v = out.get(0, 0);
        for (_, _, p) in out.pixels() {
            assert_eq!(p, v);
        }
    }

    #[test]
    fn test_global_expands_low_contrast() {
        // Values only in [100, 110] → output spreads across [0, 255].
        let w = 110;
        let mut img = Image::new(w, 1);
        for x in 0..w {
            img.set(x, 0, (100 + x % 11) as u8);
        }
        let out = equalize_histogram(&img);
        assert!(range(&out) > 100, "range {} not expanded enough", range(&out));
    }

    #[test]
    fn test_global_preserves_ordering() {
        let img = Image::from_vec(5, 1, vec![10, 50, 100, 150, 200]);
        let out = equalize_histogram(&img);
        for i in 1..5 {
            assert!(
                out.get(i, 0) >= out.get(i - 1, 0),
                "monotonicity violated at {i}"
            );
        }
    }

    #[test]
    fn test_global_empty_image() {
        let img = Image::<u8>::new(0, 0);
        let out = equalize_histogram(&img);
        assert_eq!(out.width(), 0);
        assert_eq!(out.height(), 0);
    }

    fn bimodal_scene(w: usize, h: usize) -> Image<u8> {
        // Left half dark, right half bright, with texture.
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let base = if x < w / 2 { 30 } else { 200 };
                let noise = ((x + y * 7) % 20) as u8;
                img.set(x, y, base + noise);
            }
        }
        img
    }

    #[test]
    fn test_clahe_deterministic() {
        let img = bimodal_scene(64, 48);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(4, 4);
        clahe.set_clip_limit(2.0);
        let a = clahe.apply(&img);
        let b = clahe.apply(&img);
        for ((_, _, va), (_, _, vb)) in a.pixels().zip(b.pixels()) {
            assert_eq!(va, vb);
        }
    }

    #[test]
    fn test_clahe_clip_limit_changes_output() {
        let img = bimodal_scene(64, 48);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(4, 4);

        clahe.set_clip_limit(1.0);
        let tight = clahe.apply(&img);
        clahe.set_clip_limit(8.0);
        let loose = clahe.apply(&img);

        let differing = tight
            .pixels()
            .zip(loose.pixels())
            .filter(|((_, _, a), (_, _, b))| a != b)
            .count();
        assert!(differing > 0, "clip limit had no effect on output");
    }

    #[test]
    fn test_clahe_single_tile_no_clip_matches_global() {
        // 1×1 grid with clipping disabled degenerates to global
        // equalization: one LUT, no interpolation.
        let img = bimodal_scene(40, 30);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(1, 1);
        clahe.set_clip_limit(0.0);
        let adaptive = clahe.apply(&img);
        let global = equalize_histogram(&img);
        for ((_, _, a), (_, _, g)) in adaptive.pixels().zip(global.pixels()) {
            assert_eq!(a, g);
        }
    }

    #[test]
    fn test_clahe_non_divisible_dimensions() {
        // 100×75 with an 8×8 grid: edge tiles are smaller.
        let img = Image::from_vec(100, 75, vec![128u8; 100 * 75]);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(8, 8);
        clahe.set_clip_limit(3.0);
        let out = clahe.apply(&img);
        assert_eq!(out.width(), 100);
        assert_eq!(out.height(), 75);
    }

    #[test]
    fn test_clahe_grid_larger_than_image() {
        // 4×4 image with an 8×8 grid degenerates to 1-pixel tiles.
        let img = Image::from_vec(4, 4, (0u8..16).collect());
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(8, 8);
        clahe.set_clip_limit(2.0);
        let out = clahe.apply(&img);
        assert_eq!(out.width(), 4);
        assert_eq!(out.height(), 4);
    }

    #[test]
    fn test_clahe_improves_local_contrast() {
        let img = bimodal_scene(64, 32);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(4, 2);
        clahe.set_clip_limit(2.0);
        let out = clahe.apply(&img);
        assert!(range(&out) > 50, "clahe range too small: {}", range(&out));
    }

    #[test]
    fn test_clahe_reconfigure_is_idempotent() {
        let img = bimodal_scene(64, 48);
        let mut clahe = Clahe::new();
        clahe.set_tile_grid(4, 4);
        clahe.set_clip_limit(2.0);
        let once = clahe.apply(&img);

        // Re-applying the same configuration must not drift.
        clahe.set_tile_grid(4, 4);
        clahe.set_clip_limit(2.0);
        let twice = clahe.apply(&img);
        for ((_, _, a), (_, _, b)) in once.pixels().zip(twice.pixels()) {
            assert_eq!(a, b);
        }
    }
}
