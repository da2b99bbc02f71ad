//! Property checks for the rasterizer, run over randomized segments.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use plotflow_raster::{GrayscaleBuffer, RgbTile, TILE_SIZE};

/// Distance from pixel center (x, y) to the segment [(x0,y0), (x1,y1)].
fn dist_to_segment(x: f32, y: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> f32 {
    let (dx, dy) = (x1 - x0, y1 - y0);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((x - x0) * dx + (y - y0) * dy) / len2).clamp(0.0, 1.0)
    };
    let (px, py) = (x0 + t * dx, y0 + t * dy);
    ((x - px) * (x - px) + (y - py) * (y - py)).sqrt()
}

#[test]
fn ink_stays_inside_dilated_segment() {
    // Every non-zero pixel must lie within width/2 (plus one pixel of
    // tolerance) of the segment.
    let mut rng = SmallRng::seed_from_u64(7);
    for _ in 0..40 {
        let x0 = rng.gen_range(-40.0f32..296.0);
        let y0 = rng.gen_range(-40.0f32..296.0);
        let x1 = rng.gen_range(-40.0f32..296.0);
        let y1 = rng.gen_range(-40.0f32..296.0);
        let width = rng.gen_range(0.5f32..8.0);

        let mut buf = GrayscaleBuffer::new();
        buf.draw_line(x0, y0, x1, y1, width);

        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                if buf.get_pixel(x, y) == 0 {
                    continue;
                }
                let d = dist_to_segment(x as f32, y as f32, x0, y0, x1, y1);
                assert!(
                    d <= width / 2.0 + 1.0 + 1e-3,
                    "pixel ({x}, {y}) at distance {d} inked for segment \
                     ({x0}, {y0})-({x1}, {y1}) width {width}"
                );
            }
        }
    }
}

#[test]
fn dirty_list_matches_nonzero_blocks() {
    let mut rng = SmallRng::seed_from_u64(11);
    let mut buf = GrayscaleBuffer::new();
    for _ in 0..6 {
        buf.draw_line(
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.5f32..5.0),
        );
        buf.draw_circle(
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.0f32..256.0),
            rng.gen_range(0.5f32..4.0),
        );
    }

    let mut listed: Vec<u16> = buf.dirty_blocks().to_vec();
    let listed_sorted = {
        listed.sort_unstable();
        listed
    };
    // No duplicates.
    assert!(listed_sorted.windows(2).all(|w| w[0] != w[1]));

    // Exactly the blocks holding ink.
    let mut nonzero = Vec::new();
    for by in 0..64u16 {
        for bx in 0..64u16 {
            let mut any = false;
            for j in 0..4usize {
                for i in 0..4usize {
                    any |= buf.get_pixel(bx as usize * 4 + i, by as usize * 4 + j) != 0;
                }
            }
            if any {
                nonzero.push(by * 64 + bx);
            }
        }
    }
    assert_eq!(listed_sorted, nonzero);
}

#[test]
fn composition_is_monotone() {
    // max-compositing: drawing more never decreases any pixel.
    let mut buf = GrayscaleBuffer::new();
    buf.draw_line(20.0, 30.0, 200.0, 90.0, 4.0);
    let before: Vec<u8> = (0..TILE_SIZE * TILE_SIZE)
        .map(|i| buf.get_pixel(i % TILE_SIZE, i / TILE_SIZE))
        .collect();

    buf.draw_line(200.0, 90.0, 50.0, 220.0, 4.0);
    buf.draw_circle(200.0, 90.0, 2.0);

    for (i, &b) in before.iter().enumerate() {
        let after = buf.get_pixel(i % TILE_SIZE, i / TILE_SIZE);
        assert!(after >= b, "pixel #{i} decreased from {b} to {after}");
    }
}

/// Un-filters a PNG byte stream produced by the tile buffers.
fn unfilter(bytes: &[u8], channels: usize) -> Vec<u8> {
    let stride = channels * TILE_SIZE;
    assert_eq!(bytes.len(), (stride + 1) * TILE_SIZE);
    let mut out = vec![0u8; stride * TILE_SIZE];
    for row in 0..TILE_SIZE {
        let filter = bytes[row * (stride + 1)];
        let line = &bytes[row * (stride + 1) + 1..row * (stride + 1) + 1 + stride];
        match filter {
            0 => out[row * stride..(row + 1) * stride].copy_from_slice(line),
            2 => {
                for i in 0..stride {
                    let up = out[(row - 1) * stride + i];
                    out[row * stride + i] = line[i].wrapping_add(up);
                }
            }
            other => panic!("unexpected filter byte {other} on row {row}"),
        }
    }
    out
}

#[test]
fn png_stream_round_trips_to_pixels() {
    let mut gray = GrayscaleBuffer::new();
    let mut tile = RgbTile::new(0xffffff);
    gray.draw_line(10.0, 20.0, 240.0, 160.0, 3.0);
    tile.merge(&mut gray, 3, 0xff2040c0);
    gray.draw_circle(128.0, 128.0, 5.0);
    tile.merge(&mut gray, 4, 0xffe01010);

    let pixels = unfilter(&tile.png_bytes(), 3);
    for y in 0..TILE_SIZE {
        for x in 0..TILE_SIZE {
            let expected = tile.get_pixel(x, y);
            let o = (y * TILE_SIZE + x) * 3;
            let got = ((pixels[o] as u32) << 16)
                | ((pixels[o + 1] as u32) << 8)
                | pixels[o + 2] as u32;
            assert_eq!(got, expected, "pixel ({x}, {y})");
        }
    }
}

#[test]
fn hovermap_tracks_topmost_item() {
    let mut gray = GrayscaleBuffer::new();
    let mut tile = RgbTile::new(0xffffff);

    gray.draw_line(0.0, 100.0, 255.0, 100.0, 4.0);
    tile.merge(&mut gray, 0, 0xffff0000);
    gray.draw_line(128.0, 0.0, 128.0, 255.0, 4.0);
    tile.merge(&mut gray, 1, 0xff0000ff);

    // The crossing belongs to the later item.
    assert_eq!(tile.hover_at(128, 100), 1);
    // Untouched pixels keep -1; single-item pixels keep their item.
    assert_eq!(tile.hover_at(10, 10), -1);
    assert_eq!(tile.hover_at(10, 100), 0);
    assert_eq!(tile.hover_at(128, 10), 1);
}
