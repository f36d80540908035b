// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Edge map stages of the classical detector: downscale to luminance,
// separable 3×3 blur, Sobel magnitude, adaptive binarisation.
//
// Every stage writes into a caller-provided buffer of `width * height`
// bytes (row-major).

use image::RgbaImage;

/// Working buffer size for a frame: at most `working_width` wide (never
/// upscaled), height following the frame's aspect ratio.
pub fn working_size(frame_width: u32, frame_height: u32, working_width: u32) -> (usize, usize) {
    let w = working_width.min(frame_width).max(1);
    let h = (f64::from(frame_height) * f64::from(w) / f64::from(frame_width.max(1))).round() as u32;
    (w as usize, h.max(1) as usize)
}

/// Integer luminance, ≈ 0.30 R + 0.59 G + 0.11 B.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u8
}

/// Box-filter `frame` down to `width × height` luminance.
pub fn downscale_luma(frame: &RgbaImage, width: usize, height: usize, gray: &mut [u8]) {
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    let raw = frame.as_raw();

    for oy in 0..height {
        let y0 = oy * src_h / height;
        let y1 = ((oy + 1) * src_h / height).max(y0 + 1).min(src_h);
        for ox in 0..width {
            let x0 = ox * src_w / width;
            let x1 = ((ox + 1) * src_w / width).max(x0 + 1).min(src_w);

            let mut sum = 0u32;
            for y in y0..y1 {
                let row = y * src_w * 4;
                for x in x0..x1 {
                    let i = row + x * 4;
                    sum += u32::from(luma(raw[i], raw[i + 1], raw[i + 2]));
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as u32;
            gray[oy * width + ox] = (sum / count.max(1)) as u8;
        }
    }
}

/// Separable [1, 2, 1] / 4 blur with edge replication.
pub fn blur3x3(src: &[u8], temp: &mut [u8], dst: &mut [u8], width: usize, height: usize) {
    if width < 2 || height < 2 {
        dst[..width * height].copy_from_slice(&src[..width * height]);
        return;
    }
    let px = |v: u8| u16::from(v);

    for y in 0..height {
        let row = y * width;
        temp[row] = ((px(src[row]) * 3 + px(src[row + 1])) >> 2) as u8;
        for x in 1..width - 1 {
            let i = row + x;
            temp[i] = ((px(src[i - 1]) + px(src[i]) * 2 + px(src[i + 1])) >> 2) as u8;
        }
        let last = row + width - 1;
        temp[last] = ((px(src[last - 1]) + px(src[last]) * 3) >> 2) as u8;
    }

    for x in 0..width {
        dst[x] = ((px(temp[x]) * 3 + px(temp[x + width])) >> 2) as u8;
        for y in 1..height - 1 {
            let i = y * width + x;
            dst[i] = ((px(temp[i - width]) + px(temp[i]) * 2 + px(temp[i + width])) >> 2) as u8;
        }
        let last = (height - 1) * width + x;
        dst[last] = ((px(temp[last - width]) + px(temp[last]) * 3) >> 2) as u8;
    }
}

/// Sobel gradient magnitude as `|gx| + |gy|`, saturated at 255. The
/// one-pixel frame border is zero.
pub fn sobel_l1(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    dst[..width * height].fill(0);
    if width < 3 || height < 3 {
        return;
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let i = y * width + x;
            let at = |j: usize| i32::from(src[j]);
            let (tl, tc, tr) = (at(i - width - 1), at(i - width), at(i - width + 1));
            let (ml, mr) = (at(i - 1), at(i + 1));
            let (bl, bc, br) = (at(i + width - 1), at(i + width), at(i + width + 1));

            let gx = -tl + tr - 2 * ml + 2 * mr - bl + br;
            let gy = -tl - 2 * tc - tr + bl + 2 * bc + br;
            dst[i] = (gx.abs() + gy.abs()).min(255) as u8;
        }
    }
}

/// Binarise `edges` at `max(floor, mean(non-zero edges) * gain)`.
///
/// The threshold is capped at 255 so saturated edges always survive. Returns
/// the threshold used, or `None` when the edge map is entirely zero (nothing
/// to find, `binary` is cleared).
pub fn adaptive_threshold(edges: &[u8], binary: &mut [u8], floor: f64, gain: f64) -> Option<f64> {
    let (sum, count) = edges
        .iter()
        .filter(|&&e| e > 0)
        .fold((0u64, 0u64), |(s, c), &e| (s + u64::from(e), c + 1));
    if count == 0 {
        binary.fill(0);
        return None;
    }

    let mean = sum as f64 / count as f64;
    let threshold = (mean * gain).max(floor).min(255.0);
    for (b, &e) in binary.iter_mut().zip(edges) {
        *b = u8::from(f64::from(e) >= threshold);
    }
    Some(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn working_size_keeps_aspect_and_never_upscales() {
        assert_eq!(working_size(1280, 720, 320), (320, 180));
        assert_eq!(working_size(200, 100, 320), (200, 100));
    }

    #[test]
    fn luma_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn downscale_averages_blocks() {
        let mut frame = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        frame.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        frame.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let mut gray = vec![0u8; 2];
        downscale_luma(&frame, 2, 1, &mut gray);
        assert_eq!(gray, vec![127, 0]);
    }

    #[test]
    fn blur_preserves_constant_image() {
        let src = vec![90u8; 6 * 5];
        let mut temp = vec![0u8; 30];
        let mut dst = vec![0u8; 30];
        blur3x3(&src, &mut temp, &mut dst, 6, 5);
        assert!(dst.iter().all(|&v| v == 90));
    }

    #[test]
    fn sobel_responds_to_step_only() {
        let (w, h) = (8, 6);
        let src: Vec<u8> = (0..w * h).map(|i| if i % w >= 4 { 200 } else { 10 }).collect();
        let mut dst = vec![0u8; w * h];
        sobel_l1(&src, &mut dst, w, h);
        let row = 2 * w;
        assert_eq!(dst[row + 1], 0);
        assert_eq!(dst[row + 3], 255);
        assert_eq!(dst[row + 4], 255);
        assert_eq!(dst[row + 6], 0);
    }

    #[test]
    fn threshold_of_flat_edge_map_is_none() {
        let edges = vec![0u8; 16];
        let mut binary = vec![1u8; 16];
        assert!(adaptive_threshold(&edges, &mut binary, 30.0, 1.2).is_none());
        assert!(binary.iter().all(|&b| b == 0));
    }

    #[test]
    fn threshold_adapts_to_mean() {
        let edges = [0u8, 50, 100, 150, 0, 200];
        let mut binary = [0u8; 6];
        // mean(non-zero) = 125, × 1.2 = 150
        let t = adaptive_threshold(&edges, &mut binary, 30.0, 1.2).unwrap();
        assert!((t - 150.0).abs() < 1e-9);
        assert_eq!(binary, [0, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn saturated_edges_survive_the_cap() {
        let edges = [255u8, 255, 0, 255];
        let mut binary = [0u8; 4];
        adaptive_threshold(&edges, &mut binary, 30.0, 1.2).unwrap();
        assert_eq!(binary, [1, 1, 0, 1]);
    }
}
