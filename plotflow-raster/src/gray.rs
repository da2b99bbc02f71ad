//! 256-level grayscale scratch buffer for one item's ink on one tile.

use crate::{BLK, BLK_CNT, BLK_PER_ROW, TILE_SIZE};

/// Index permutations mapping `[x0, x1, y0, y1]` (entries 0..4) and their
/// flipped counterparts `255 - v` (entries 4..8) into `[u0, u1, v0, v1]`,
/// chosen per coordinate type so that the slope in uv-space lands in [0, 1].
///
/// Coordinate type bits: 4 = steep slope, 2 = y0 > y1, 1 = x0 > x1.
const FLIP: usize = 4;
const COORD_SHUFFLE: [[usize; 4]; 8] = [
    [0, 1, 2, 3],
    [1, 0, FLIP + 3, FLIP + 2],
    [0, 1, FLIP + 2, FLIP + 3],
    [1, 0, 3, 2],
    [2, 3, 0, 1],
    [2, 3, FLIP, FLIP + 1],
    [3, 2, FLIP + 1, FLIP],
    [3, 2, 1, 0],
];

/// One item's anti-aliased coverage on a 256×256 tile.
///
/// Storage is 4×4 pixel blocks, row-major in block order. `blklist` records
/// every block that went from all-zero to inked since the last clear, so
/// [`reset`](Self::reset) and the colored-buffer merge cost is proportional
/// to ink rather than tile area.
pub struct GrayscaleBuffer {
    pub(crate) buf: Box<[[u8; 16]]>,
    pub(crate) blklist: Vec<u16>,
}

impl GrayscaleBuffer {
    pub fn new() -> Self {
        GrayscaleBuffer {
            buf: vec![[0u8; 16]; BLK_CNT].into_boxed_slice(),
            blklist: Vec::with_capacity(BLK_CNT),
        }
    }

    /// Zeroes only the blocks touched since the last reset.
    pub fn reset(&mut self) {
        for off in self.blklist.drain(..) {
            self.buf[off as usize] = [0u8; 16];
        }
    }

    /// Blocks inked since the last reset, in first-touch order.
    pub fn dirty_blocks(&self) -> &[u16] {
        &self.blklist
    }

    /// Debug accessor; prefer block-wise reads in hot paths.
    pub fn get_pixel(&self, x: usize, y: usize) -> u8 {
        self.buf[(y / BLK) * BLK_PER_ROW + x / BLK][(y % BLK) * BLK + x % BLK]
    }

    /// Max-composites a 16-byte block, tracking the zero-to-inked transition.
    fn store_blk(&mut self, off: usize, blk: &[u8; 16]) {
        let dst = &mut self.buf[off];
        let was_zero = dst.iter().all(|&b| b == 0);
        let mut inked = false;
        for (d, &n) in dst.iter_mut().zip(blk.iter()) {
            *d = (*d).max(n);
            inked |= n != 0;
        }
        if was_zero && inked {
            self.blklist.push(off as u16);
        }
    }

    /// Writes a block computed in uv-space back into xy-space storage.
    ///
    /// `vals` is v-major (`vals[j * 4 + i]` is column `i`, row `j` in uv).
    fn store_uv_blk(&mut self, ublk: i32, vblk: i32, shuffle_type: usize, vals: &[u8; 16]) {
        let last = (BLK_PER_ROW - 1) as i32;
        let (bx, by) = match shuffle_type {
            0 => (ublk, vblk),
            1 => (ublk, last - vblk),
            2 => (vblk, ublk),
            _ => (last - vblk, ublk),
        };
        let mut blk = [0u8; 16];
        for i in 0..4 {
            for j in 0..4 {
                let idx = match shuffle_type {
                    0 => j * 4 + i,
                    1 => (3 - j) * 4 + i,
                    2 => i * 4 + j,
                    _ => i * 4 + (3 - j),
                };
                blk[idx] = vals[j * 4 + i];
            }
        }
        self.store_blk((by as usize) * BLK_PER_ROW + bx as usize, &blk);
    }

    /// Paints a fat line segment from (x0, y0) to (x1, y1).
    ///
    /// The stroke is approximated by the band between two edges parallel to
    /// the center line, offset by ±width/2. A pixel fully inside the band
    /// gets 0xff, fully outside 0x00; a crossed pixel gets the fraction of
    /// area above the lower edge minus the fraction above the higher edge,
    /// each as a linear-in-v ramp per column. Composition is per-pixel max,
    /// so overlapping strokes never darken.
    ///
    /// The short caps at either end are *not* drawn exactly; callers paint a
    /// circle on each endpoint, which covers the difference.
    pub fn draw_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, width: f32) {
        assert!(
            width < TILE_SIZE as f32,
            "line width {width} exceeds tile size"
        );
        if x0.is_nan() || y0.is_nan() || x1.is_nan() || y1.is_nan() {
            return;
        }
        let width = width.max(f32::EPSILON);

        let dx = x1 - x0;
        let dy = y1 - y0;
        let coord_type = 4 * usize::from(dy.abs() > dx.abs())
            + 2 * usize::from(y0 > y1)
            + usize::from(x0 > x1);

        let hi = (TILE_SIZE - 1) as f32;
        let coords0 = [x0, x1, y0, y1, hi - x0, hi - x1, hi - y0, hi - y1];
        let m = &COORD_SHUFFLE[coord_type];
        let (u0, u1, v0, v1) = (coords0[m[0]], coords0[m[1]], coords0[m[2]], coords0[m[3]]);

        // 0: x = u, y = v          2: x = v, y = u
        // 1: x = u, y = 255 - v    3: x = 255 - v, y = u
        let shuffle_type = (coord_type >> 1) ^ (coord_type & 1);

        let du = u1 - u0;
        let dv = v1 - v0;
        let len = (du * du + dv * dv).sqrt();
        if len == 0.0 {
            return;
        }
        let wu = dv * (width / (2.0 * len));
        let wv = du * (width / (2.0 * len));

        // Bounding box in uv pixels; everything outside is masked off.
        let umin = (u0 - wu).round_ties_even() as i32;
        let umax = (u1 + wu).round_ties_even() as i32;
        let vmin = (v0 - wv).round_ties_even() as i32;
        let vmax = (v1 + wv).round_ties_even() as i32;

        let ulo = umin.max(0);
        let uhi = umax.min(hi as i32);
        if ulo > uhi {
            return;
        }
        let vclip_lo = vmin.max(0);
        let vclip_hi = vmax.min(hi as i32);
        if vclip_lo > vclip_hi {
            return;
        }

        let slope = dv / du;
        // Shifted by +0.5 so pixel #v spans [v, v+1] on the v axis.
        let vl0 = (v0 - wv) - slope * (u0 + wu) + 0.5;
        let vh0 = (v0 + wv) - slope * (u0 - wu) + 0.5;

        for ublk in (ulo / BLK as i32)..=(uhi / BLK as i32) {
            let ub = (ublk * BLK as i32) as f32;
            // Rows the band can touch across this column quad.
            let band_lo = vl0 + slope * ub - 1.0;
            let band_hi = vh0 + slope * (ub + 3.0);
            let vb_lo = ((band_lo.floor() as i32).max(vclip_lo)) / BLK as i32;
            let vb_hi = ((band_hi.ceil() as i32).min(vclip_hi)) / BLK as i32;
            if (band_hi.ceil() as i32) < vclip_lo {
                continue;
            }

            for vblk in vb_lo..=vb_hi {
                let mut vals = [0u8; 16];
                let mut any = false;
                for i in 0..4i32 {
                    let u = ublk * BLK as i32 + i;
                    if u < umin || u > umax {
                        continue;
                    }
                    let vl = vl0 + slope * u as f32;
                    let vh = vh0 + slope * u as f32;
                    for j in 0..4i32 {
                        let v = vblk * BLK as i32 + j;
                        if v < vmin || v > vmax {
                            continue;
                        }
                        let top = (v + 1) as f32;
                        let above_lo = ((top - vl).clamp(0.0, 1.0) * 255.0).round_ties_even();
                        let above_hi = ((top - vh).clamp(0.0, 1.0) * 255.0).round_ties_even();
                        let val = (above_lo - above_hi) as i32;
                        if val > 0 {
                            vals[(j * 4 + i) as usize] = val as u8;
                            any = true;
                        }
                    }
                }
                if any {
                    self.store_uv_blk(ublk, vblk, shuffle_type, &vals);
                }
            }
        }
    }

    /// Paints a filled anti-aliased circle centered on (x0, y0).
    ///
    /// Brute force over the bounding box. The edge ramp is the linear
    /// approximation `clamp(((r² + r) - d²) · 255 / 2r, 0, 255)`, which is
    /// exact at d = r and close enough either side of it.
    pub fn draw_circle(&mut self, x0: f32, y0: f32, radius: f32) {
        debug_assert!(radius > 0.0);
        let a = -255.0 / (2.0 * radius);
        let b = 255.0 / 2.0 * (radius + 1.0);

        let last = (BLK_PER_ROW - 1) as i32;
        let xb0 = ((((x0 + 0.5 - radius) / 4.0).floor() as i32).max(0)).min(last);
        let xb1 = ((((x0 + 0.5 + radius) / 4.0).floor() as i32).max(-1)).min(last);
        let yb0 = ((((y0 + 0.5 - radius) / 4.0).floor() as i32).max(0)).min(last);
        let yb1 = ((((y0 + 0.5 + radius) / 4.0).floor() as i32).max(-1)).min(last);

        for yblk in yb0..=yb1 {
            for xblk in xb0..=xb1 {
                let mut blk = [0u8; 16];
                let mut any = false;
                for j in 0..4i32 {
                    let dy = (yblk * 4 + j) as f32 - y0;
                    for i in 0..4i32 {
                        let dx = (xblk * 4 + i) as f32 - x0;
                        let d2 = dx * dx + dy * dy;
                        let c = (a * d2 + b).round_ties_even().clamp(0.0, 255.0);
                        if c > 0.0 {
                            blk[(j * 4 + i) as usize] = c as u8;
                            any = true;
                        }
                    }
                }
                if any {
                    self.store_blk((yblk * BLK_PER_ROW as i32 + xblk) as usize, &blk);
                }
            }
        }
    }
}

impl Default for GrayscaleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_clean() {
        let buf = GrayscaleBuffer::new();
        assert!(buf.dirty_blocks().is_empty());
        assert_eq!(buf.get_pixel(0, 0), 0);
        assert_eq!(buf.get_pixel(255, 255), 0);
    }

    #[test]
    fn horizontal_line_covers_expected_rows() {
        let mut buf = GrayscaleBuffer::new();
        // Width 2 centered on y = 100: the band covers y in [99, 101], so
        // row 100 is opaque and rows 99/101 sit at half coverage.
        buf.draw_line(10.0, 100.0, 200.0, 100.0, 2.0);
        assert_eq!(buf.get_pixel(100, 100), 255);
        assert_eq!(buf.get_pixel(100, 99), 128);
        assert_eq!(buf.get_pixel(100, 101), 127);
        assert_eq!(buf.get_pixel(100, 96), 0);
        assert_eq!(buf.get_pixel(100, 104), 0);
        // Outside the x span.
        assert_eq!(buf.get_pixel(5, 100), 0);
        assert_eq!(buf.get_pixel(210, 100), 0);
    }

    #[test]
    fn zero_length_segment_is_a_noop() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_line(50.0, 50.0, 50.0, 50.0, 3.0);
        assert!(buf.dirty_blocks().is_empty());
    }

    #[test]
    fn nan_segment_is_a_noop() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_line(f32::NAN, 0.0, 10.0, 10.0, 1.0);
        assert!(buf.dirty_blocks().is_empty());
    }

    #[test]
    fn line_outside_tile_is_a_noop() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_line(-500.0, -500.0, -400.0, -450.0, 2.0);
        assert!(buf.dirty_blocks().is_empty());
        buf.draw_line(300.0, 300.0, 400.0, 380.0, 2.0);
        assert!(buf.dirty_blocks().is_empty());
    }

    #[test]
    fn reset_clears_only_dirty_blocks_and_all_ink() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_line(0.0, 0.0, 255.0, 255.0, 3.0);
        assert!(!buf.dirty_blocks().is_empty());
        buf.reset();
        assert!(buf.dirty_blocks().is_empty());
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                assert_eq!(buf.get_pixel(x, y), 0, "pixel ({x}, {y}) survived reset");
            }
        }
    }

    #[test]
    fn circle_center_is_opaque_and_far_field_clear() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_circle(128.0, 128.0, 5.0);
        assert_eq!(buf.get_pixel(128, 128), 255);
        assert_eq!(buf.get_pixel(128, 140), 0);
        assert_eq!(buf.get_pixel(110, 128), 0);
    }

    #[test]
    fn circle_clipped_at_corner() {
        let mut buf = GrayscaleBuffer::new();
        buf.draw_circle(0.0, 0.0, 4.0);
        assert_eq!(buf.get_pixel(0, 0), 255);
        // Only the in-tile quadrant exists; nothing asserts out of range.
        buf.draw_circle(-100.0, -100.0, 4.0);
    }
}
