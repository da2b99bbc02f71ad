//! Colored tile accumulators and their wire-format emission.

use crate::gray::GrayscaleBuffer;
use crate::{BLK, BLK_CNT, BLK_PER_ROW, TILE_SIZE};

/// Blends one channel toward `target` by the coverage in `gray`, in the same
/// fixed point as the original kernel: the alpha is pre-scaled so the whole
/// per-pixel weight collapses to one multiply and a 16-bit shift.
///
/// `new = old + sign(Δ) · ((|Δ| · gray · scaled_alpha) >> 16)`, Δ = target − old.
#[inline]
fn blend_channel(old: u8, target: u8, gray: u32, scaled_alpha: u32) -> u8 {
    let delta = target as i32 - old as i32;
    let step = ((delta.unsigned_abs() * gray * scaled_alpha) >> 16) as i32;
    let new = old as i32 + if delta < 0 { -step } else { step };
    new.clamp(0, 255) as u8
}

/// `ceil(alpha · 65536 / 255²)`; chosen so that alpha = gray = 255 reaches
/// the target channel exactly despite the truncating shift.
#[inline]
fn scale_alpha(alpha: u32) -> u32 {
    ((alpha as f32) * (65536.0 / (255.0 * 255.0))).ceil() as u32
}

/// Filter-byte values from the PNG spec: row 0 is emitted raw, every other
/// row as the byte-wise difference from the row above.
const FILTER_NONE: u8 = 0;
const FILTER_UP: u8 = 2;

/// RGB accumulator for a regular tile, plus the per-pixel hovermap.
///
/// Channel planes are interleaved per block (`R G B` for block 0, then block
/// 1, ...), each plane a 4×4 pixel block. The hovermap holds the item id of
/// the last merge that inked each pixel, −1 where nothing did.
pub struct RgbTile {
    buf: Box<[[u8; 16]]>,
    hovermap: Box<[[i32; 16]]>,
}

impl RgbTile {
    /// `background` is 0xRRGGBB.
    pub fn new(background: u32) -> Self {
        let r = (background >> 16) as u8;
        let g = (background >> 8) as u8;
        let b = background as u8;
        let mut buf = vec![[0u8; 16]; BLK_CNT * 3].into_boxed_slice();
        for blk in 0..BLK_CNT {
            buf[blk * 3] = [r; 16];
            buf[blk * 3 + 1] = [g; 16];
            buf[blk * 3 + 2] = [b; 16];
        }
        RgbTile {
            buf,
            hovermap: vec![[-1i32; 16]; BLK_CNT].into_boxed_slice(),
        }
    }

    /// Merges one item's coverage with its color (0xAARRGGBB) and clears the
    /// grayscale scratch. Every pixel the scratch inked gets `item_id` in the
    /// hovermap.
    pub fn merge(&mut self, gray: &mut GrayscaleBuffer, item_id: i32, argb: u32) {
        let scaled_alpha = scale_alpha((argb >> 24) & 0xff);
        let r = (argb >> 16) as u8;
        let g = (argb >> 8) as u8;
        let b = argb as u8;

        for k in 0..gray.blklist.len() {
            let off = gray.blklist[k] as usize;
            let gblk = std::mem::replace(&mut gray.buf[off], [0u8; 16]);
            let hov = &mut self.hovermap[off];
            for p in 0..16 {
                let gv = gblk[p] as u32;
                if gv == 0 {
                    continue;
                }
                hov[p] = item_id;
                self.buf[off * 3][p] = blend_channel(self.buf[off * 3][p], r, gv, scaled_alpha);
                self.buf[off * 3 + 1][p] =
                    blend_channel(self.buf[off * 3 + 1][p], g, gv, scaled_alpha);
                self.buf[off * 3 + 2][p] =
                    blend_channel(self.buf[off * 3 + 2][p], b, gv, scaled_alpha);
            }
        }
        gray.blklist.clear();
    }

    /// PNG-filtered scanlines: 256 rows of one filter byte plus 256 RGB
    /// pixels. Compression is the host's problem.
    pub fn png_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((3 * TILE_SIZE + 1) * TILE_SIZE);
        let mut prev = [0u8; 3 * TILE_SIZE];
        let mut cur = [0u8; 3 * TILE_SIZE];
        for row in 0..TILE_SIZE {
            out.push(if row == 0 { FILTER_NONE } else { FILTER_UP });
            let base = (row / BLK) * BLK_PER_ROW;
            let sub = row % BLK;
            for bx in 0..BLK_PER_ROW {
                let blk = (base + bx) * 3;
                for i in 0..BLK {
                    let p = sub * BLK + i;
                    let x = bx * BLK + i;
                    cur[3 * x] = self.buf[blk][p];
                    cur[3 * x + 1] = self.buf[blk + 1][p];
                    cur[3 * x + 2] = self.buf[blk + 2][p];
                }
            }
            for (c, p) in cur.iter().zip(prev.iter()) {
                out.push(c.wrapping_sub(*p));
            }
            prev.copy_from_slice(&cur);
        }
        out
    }

    /// Row-major i32 hovermap, little-endian bytes.
    pub fn hovermap_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TILE_SIZE * TILE_SIZE * 4);
        for y in 0..TILE_SIZE {
            let base = (y / BLK) * BLK_PER_ROW;
            let sub = y % BLK;
            for x in 0..TILE_SIZE {
                let v = self.hovermap[base + x / BLK][sub * BLK + x % BLK];
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Debug accessor: pixel as 0xRRGGBB.
    pub fn get_pixel(&self, x: usize, y: usize) -> u32 {
        let blk = ((y / BLK) * BLK_PER_ROW + x / BLK) * 3;
        let p = (y % BLK) * BLK + x % BLK;
        ((self.buf[blk][p] as u32) << 16)
            | ((self.buf[blk + 1][p] as u32) << 8)
            | self.buf[blk + 2][p] as u32
    }

    /// Debug accessor: hovermap entry at a pixel.
    pub fn hover_at(&self, x: usize, y: usize) -> i32 {
        self.hovermap[(y / BLK) * BLK_PER_ROW + x / BLK][(y % BLK) * BLK + x % BLK]
    }
}

/// RGBW accumulator for a highlight tile, composited over transparency.
///
/// True alpha blending would need a divide per merge, so the working format
/// is premultiplied-by-coverage "RGBW": colors accumulate as if over black
/// while W accumulates opacity, always treated as target 255. The RGBW to
/// RGBA conversion happens once, at emission. No hovermap.
pub struct RgbwTile {
    buf: Box<[[u8; 16]]>,
}

impl RgbwTile {
    pub fn new() -> Self {
        RgbwTile {
            buf: vec![[0u8; 16]; BLK_CNT * 4].into_boxed_slice(),
        }
    }

    /// Merges one item's coverage; `item_id` is accepted for interface parity
    /// but highlight tiles carry no hovermap.
    pub fn merge(&mut self, gray: &mut GrayscaleBuffer, _item_id: i32, argb: u32) {
        let scaled_alpha = scale_alpha((argb >> 24) & 0xff);
        let r = (argb >> 16) as u8;
        let g = (argb >> 8) as u8;
        let b = argb as u8;

        for k in 0..gray.blklist.len() {
            let off = gray.blklist[k] as usize;
            let gblk = std::mem::replace(&mut gray.buf[off], [0u8; 16]);
            for p in 0..16 {
                let gv = gblk[p] as u32;
                if gv == 0 {
                    continue;
                }
                self.buf[off * 4][p] = blend_channel(self.buf[off * 4][p], r, gv, scaled_alpha);
                self.buf[off * 4 + 1][p] =
                    blend_channel(self.buf[off * 4 + 1][p], g, gv, scaled_alpha);
                self.buf[off * 4 + 2][p] =
                    blend_channel(self.buf[off * 4 + 2][p], b, gv, scaled_alpha);
                self.buf[off * 4 + 3][p] =
                    blend_channel(self.buf[off * 4 + 3][p], 255, gv, scaled_alpha);
            }
        }
        gray.blklist.clear();
    }

    /// PNG-filtered scanlines of RGBA pixels, after RGBW normalization:
    /// `R' = R·255/W` (ditto G, B), `A = W`; a pixel with W = 0 is fully
    /// transparent black. The construction guarantees each channel ≤ W, so
    /// the division cannot overflow a byte.
    pub fn png_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((4 * TILE_SIZE + 1) * TILE_SIZE);
        let mut prev = [0u8; 4 * TILE_SIZE];
        let mut cur = [0u8; 4 * TILE_SIZE];
        for row in 0..TILE_SIZE {
            out.push(if row == 0 { FILTER_NONE } else { FILTER_UP });
            let base = (row / BLK) * BLK_PER_ROW;
            let sub = row % BLK;
            for bx in 0..BLK_PER_ROW {
                let blk = (base + bx) * 4;
                for i in 0..BLK {
                    let p = sub * BLK + i;
                    let x = bx * BLK + i;
                    let w = self.buf[blk + 3][p] as u32;
                    if w == 0 {
                        cur[4 * x..4 * x + 4].fill(0);
                    } else {
                        cur[4 * x] = (self.buf[blk][p] as u32 * 255 / w) as u8;
                        cur[4 * x + 1] = (self.buf[blk + 1][p] as u32 * 255 / w) as u8;
                        cur[4 * x + 2] = (self.buf[blk + 2][p] as u32 * 255 / w) as u8;
                        cur[4 * x + 3] = w as u8;
                    }
                }
            }
            for (c, p) in cur.iter().zip(prev.iter()) {
                out.push(c.wrapping_sub(*p));
            }
            prev.copy_from_slice(&cur);
        }
        out
    }

    /// Debug accessor: pixel as 0xWWRRGGBB (raw, before normalization).
    pub fn get_pixel(&self, x: usize, y: usize) -> u32 {
        let blk = ((y / BLK) * BLK_PER_ROW + x / BLK) * 4;
        let p = (y % BLK) * BLK + x % BLK;
        ((self.buf[blk + 3][p] as u32) << 24)
            | ((self.buf[blk][p] as u32) << 16)
            | ((self.buf[blk + 1][p] as u32) << 8)
            | self.buf[blk + 2][p] as u32
    }
}

impl Default for RgbwTile {
    fn default() -> Self {
        Self::new()
    }
}

/// The accumulator kind a paint pass works against, picked per request.
pub enum TileBuffer {
    Rgb(RgbTile),
    Rgbw(RgbwTile),
}

impl TileBuffer {
    /// White-background RGB tile for regular requests.
    pub fn regular() -> Self {
        TileBuffer::Rgb(RgbTile::new(0xffffff))
    }

    /// Transparent RGBW tile for highlight requests.
    pub fn highlight() -> Self {
        TileBuffer::Rgbw(RgbwTile::new())
    }

    pub fn merge(&mut self, gray: &mut GrayscaleBuffer, item_id: i32, argb: u32) {
        match self {
            TileBuffer::Rgb(t) => t.merge(gray, item_id, argb),
            TileBuffer::Rgbw(t) => t.merge(gray, item_id, argb),
        }
    }

    pub fn png_bytes(&self) -> Vec<u8> {
        match self {
            TileBuffer::Rgb(t) => t.png_bytes(),
            TileBuffer::Rgbw(t) => t.png_bytes(),
        }
    }

    /// `None` for highlight tiles, which carry no hovermap.
    pub fn hovermap_bytes(&self) -> Option<Vec<u8>> {
        match self {
            TileBuffer::Rgb(t) => Some(t.hovermap_bytes()),
            TileBuffer::Rgbw(_) => None,
        }
    }

    /// Channels per emitted pixel: 3 for RGB, 4 for RGBA.
    pub fn channels(&self) -> usize {
        match self {
            TileBuffer::Rgb(_) => 3,
            TileBuffer::Rgbw(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_coverage_full_alpha_reaches_target_exactly() {
        // gray = alpha = 255 must land on the target channel despite the
        // truncating fixed-point shift.
        assert_eq!(blend_channel(255, 0, 255, scale_alpha(255)), 0);
        assert_eq!(blend_channel(0, 255, 255, scale_alpha(255)), 255);
        assert_eq!(blend_channel(17, 200, 255, scale_alpha(255)), 200);
    }

    #[test]
    fn zero_coverage_leaves_channel_untouched() {
        assert_eq!(blend_channel(123, 45, 0, scale_alpha(255)), 123);
    }

    #[test]
    fn merge_writes_hovermap_and_clears_gray() {
        let mut gray = GrayscaleBuffer::new();
        gray.draw_circle(10.0, 10.0, 3.0);
        assert!(!gray.dirty_blocks().is_empty());

        let mut tile = RgbTile::new(0xffffff);
        tile.merge(&mut gray, 7, 0xffff0000);

        assert!(gray.dirty_blocks().is_empty());
        assert_eq!(gray.get_pixel(10, 10), 0);
        assert_eq!(tile.hover_at(10, 10), 7);
        assert_eq!(tile.hover_at(200, 200), -1);
        assert_eq!(tile.get_pixel(10, 10), 0xff0000);
        assert_eq!(tile.get_pixel(200, 200), 0xffffff);
    }

    #[test]
    fn rgbw_normalizes_to_rgba_on_emission() {
        let mut gray = GrayscaleBuffer::new();
        gray.draw_circle(4.0, 4.0, 2.0);
        let mut tile = RgbwTile::new();
        tile.merge(&mut gray, 0, 0xff00ff00);

        let bytes = tile.png_bytes();
        assert_eq!(bytes.len(), (4 * TILE_SIZE + 1) * TILE_SIZE);
        // Row 4 is filter-Up; undo filters for the first rows to recover
        // pixel (4, 4), which full coverage drove to opaque green.
        let mut rgba = [0u8; 4];
        for row in 0..=4 {
            let line = &bytes[row * (4 * TILE_SIZE + 1) + 1..];
            for c in 0..4 {
                rgba[c] = rgba[c].wrapping_add(line[4 * 4 + c]);
            }
        }
        assert_eq!(rgba, [0, 255, 0, 255]);
    }

    #[test]
    fn png_row_zero_is_raw_background() {
        let tile = RgbTile::new(0xffffff);
        let bytes = tile.png_bytes();
        assert_eq!(bytes.len(), (3 * TILE_SIZE + 1) * TILE_SIZE);
        assert_eq!(bytes[0], 0);
        assert!(bytes[1..3 * TILE_SIZE + 1].iter().all(|&b| b == 255));
        // Second row: Up filter over an identical row is all zero.
        assert_eq!(bytes[3 * TILE_SIZE + 1], 2);
        assert!(bytes[3 * TILE_SIZE + 2..2 * (3 * TILE_SIZE + 1)]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn hovermap_bytes_are_row_major_le() {
        let mut gray = GrayscaleBuffer::new();
        gray.draw_circle(100.0, 50.0, 2.0);
        let mut tile = RgbTile::new(0xffffff);
        tile.merge(&mut gray, 42, 0xff0000ff);

        let bytes = tile.hovermap_bytes();
        assert_eq!(bytes.len(), TILE_SIZE * TILE_SIZE * 4);
        let at = |x: usize, y: usize| {
            let o = (y * TILE_SIZE + x) * 4;
            i32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
        };
        assert_eq!(at(100, 50), 42);
        assert_eq!(at(0, 0), -1);
    }
}
