//! Tile rasterization primitives for the plotter core.
//!
//! Everything here works on a single 256×256 tile. The drawing path is
//! two-staged: one item's ink is rasterized into a [`GrayscaleBuffer`]
//! scratch (anti-aliased coverage, max-composited), then merged into a
//! colored accumulator ([`RgbTile`] for regular tiles, [`RgbwTile`] for
//! highlight tiles) with that item's color. The accumulators also produce
//! the bytes that leave the core: PNG-filtered scanlines and, for regular
//! tiles, the per-pixel item-id hovermap.
//!
//! Pixels are stored as 4×4 blocks laid out row-major in block order, so the
//! merge and clear paths touch only the blocks a drawing call actually
//! inked. The kernels are written as portable block-wise loops over that
//! layout; they carry no platform intrinsics.

mod gray;
mod tile;
mod visitor;

pub use gray::GrayscaleBuffer;
pub use tile::{RgbTile, RgbwTile, TileBuffer};
pub use visitor::GridVisitor;

/// Tile edge length in pixels.
pub const TILE_SIZE: usize = 256;

/// Pixels per block edge.
pub(crate) const BLK: usize = 4;

/// Blocks per tile row.
pub(crate) const BLK_PER_ROW: usize = TILE_SIZE / BLK;

/// Blocks per tile.
pub(crate) const BLK_CNT: usize = BLK_PER_ROW * BLK_PER_ROW;
