//! Canvas configurations, coordinate transforms, and tile keys.

use std::fmt;

/// Tile edge length in pixels.
pub const TILE_SIZE: i32 = 256;

/// Geometric zoom per zoom-level step. Must match the front end.
pub const ZOOM_FACTOR: f64 = 1.5;

/// A linear map `t -> scale · t + bias`, one axis each.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub xscale: f32,
    pub xbias: f32,
    pub yscale: f32,
    pub ybias: f32,
}

/// One coordinate system of the canvas.
///
/// The data corners are sticky: panning and zooming with the standard
/// controls stays inside one config (tracked by `zoom_level` and the pixel
/// offsets), so previously rendered tiles remain addressable. A fresh config
/// is only minted when the front end re-anchors the viewport.
///
/// With Z = ZOOM_FACTOR^zoom_level, data x maps to pixel
/// `px = (w-1) · (Z · (x - (x0+x1)/2) / (x1-x0) + 1/2)`; y is the same with
/// (y0-y1) in the denominator because pixel y grows downward while data y
/// grows upward. Pixel centers sit on integer coordinates.
#[derive(Clone, Debug)]
pub struct CanvasConfig {
    pub id: i32,
    pub w: i32,
    pub h: i32,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub zoom_level: i32,
    pub x_offset: i32,
    pub y_offset: i32,
}

impl CanvasConfig {
    pub fn new(id: i32, w: i32, h: i32, x0: f64, y0: f64, x1: f64, y1: f64) -> CanvasConfig {
        CanvasConfig {
            id,
            w,
            h,
            x0,
            y0,
            x1,
            y1,
            zoom_level: 0,
            x_offset: 0,
            y_offset: 0,
        }
    }

    /// Same config viewed at a different zoom level.
    pub fn at_zoom(&self, zoom_level: i32) -> CanvasConfig {
        CanvasConfig {
            zoom_level,
            ..self.clone()
        }
    }

    fn zoom(&self) -> f64 {
        ZOOM_FACTOR.powi(self.zoom_level)
    }

    /// Pixel coordinates back to data coordinates.
    pub fn data_coord(&self, px: f64, py: f64) -> (f64, f64) {
        let inv_zoom = ZOOM_FACTOR.powi(-self.zoom_level);
        let x = (self.x0 + self.x1) * 0.5
            + (self.x1 - self.x0) * inv_zoom * (px / (self.w - 1) as f64 - 0.5);
        let y = (self.y0 + self.y1) * 0.5
            + (self.y0 - self.y1) * inv_zoom * (py / (self.h - 1) as f64 - 0.5);
        (x, y)
    }

    /// Data coordinates to pixel coordinates.
    pub fn transform(&self) -> Transform {
        let zoom = self.zoom();
        let xscale = zoom * ((self.w - 1) as f64 / (self.x1 - self.x0));
        let xbias = -xscale * (self.x0 + self.x1) * 0.5 + self.w as f64 * 0.5 - 0.5;
        let yscale = zoom * ((self.h - 1) as f64 / (self.y0 - self.y1));
        let ybias = -yscale * (self.y0 + self.y1) * 0.5 + self.h as f64 * 0.5 - 0.5;
        Transform {
            xscale: xscale as f32,
            xbias: xbias as f32,
            yscale: yscale as f32,
            ybias: ybias as f32,
        }
    }

    /// Data coordinates to tile coordinates (one tile = 256 px).
    ///
    /// A tile centered on integer tile coordinates spans pixels
    /// [-0.5, 255.5], i.e. `tx = (px - (TILE_SIZE-1)/2) / TILE_SIZE`, which
    /// keeps the tile grid aligned with the rasterizer's pixel convention.
    pub fn tile_transform(&self) -> Transform {
        let ts = TILE_SIZE as f64;
        let zoom = self.zoom();
        let xscale = (zoom / ts) * ((self.w - 1) as f64 / (self.x1 - self.x0));
        let xbias = -xscale * (self.x0 + self.x1) * 0.5 + self.w as f64 / (2.0 * ts) - 0.5;
        let yscale = (zoom / ts) * ((self.h - 1) as f64 / (self.y0 - self.y1));
        let ybias = -yscale * (self.y0 + self.y1) * 0.5 + self.h as f64 / (2.0 * ts) - 0.5;
        Transform {
            xscale: xscale as f32,
            xbias: xbias as f32,
            yscale: yscale as f32,
            ybias: ybias as f32,
        }
    }
}

/// Identity of one tile: coordinate system, zoom, grid position, and the
/// selection generation it was rendered against. `item_id` is -1 for regular
/// tiles, otherwise the highlighted item.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TileKey {
    pub sm_version: i32,
    pub config_id: i32,
    pub zoom_level: i32,
    pub row: i32,
    pub col: i32,
    pub item_id: i32,
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]{}:{}:{}:{}",
            self.sm_version, self.config_id, self.zoom_level, self.row, self.col
        )?;
        if self.item_id != -1 {
            write!(f, ":{}", self.item_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_map_to_edge_pixel_centers() {
        let c = CanvasConfig::new(0, 640, 480, -2.0, -1.0, 2.0, 1.0);
        let t = c.transform();
        // x = x0 -> px = 0, x = x1 -> px = w-1.
        assert!((t.xscale * -2.0 + t.xbias).abs() < 1e-3);
        assert!((t.xscale * 2.0 + t.xbias - 639.0).abs() < 1e-3);
        // y = y1 (top) -> py = 0, y = y0 (bottom) -> py = h-1.
        assert!((t.yscale * 1.0 + t.ybias).abs() < 1e-3);
        assert!((t.yscale * -1.0 + t.ybias - 479.0).abs() < 1e-3);
    }

    #[test]
    fn data_coord_inverts_transform() {
        let c = CanvasConfig::new(0, 300, 200, 0.0, 0.0, 10.0, 5.0).at_zoom(2);
        let t = c.transform();
        for &(x, y) in &[(1.25, 0.5), (9.0, 4.75), (5.0, 2.5)] {
            let px = t.xscale as f64 * x + t.xbias as f64;
            let py = t.yscale as f64 * y + t.ybias as f64;
            let (rx, ry) = c.data_coord(px, py);
            assert!((rx - x).abs() < 1e-6, "x: {rx} vs {x}");
            assert!((ry - y).abs() < 1e-6, "y: {ry} vs {y}");
        }
    }

    #[test]
    fn tile_transform_is_pixel_transform_in_tile_units() {
        let c = CanvasConfig::new(0, 512, 512, 0.0, 0.0, 1.0, 1.0).at_zoom(1);
        let t = c.transform();
        let tt = c.tile_transform();
        for &x in &[0.0f64, 0.3, 0.9] {
            let px = t.xscale as f64 * x + t.xbias as f64;
            let tx = tt.xscale as f64 * x + tt.xbias as f64;
            let expected = (px - (TILE_SIZE - 1) as f64 / 2.0) / TILE_SIZE as f64;
            assert!((tx - expected).abs() < 1e-4, "{tx} vs {expected}");
        }
    }

    #[test]
    fn tile_key_formatting() {
        let key = TileKey {
            sm_version: 4,
            config_id: 1,
            zoom_level: 2,
            row: 3,
            col: 5,
            item_id: -1,
        };
        assert_eq!(key.to_string(), "[4]1:2:3:5");
        let hl = TileKey { item_id: 9, ..key };
        assert_eq!(hl.to_string(), "[4]1:2:3:5:9");
    }
}
