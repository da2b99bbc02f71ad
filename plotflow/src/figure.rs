//! Figure data: the immutable batches of line/marker geometry.
//!
//! Each ingest call produces one figure data holding a block of items. An
//! item with N points decomposes into 2N atoms: ids 0..N-2 are the segments
//! between consecutive points, id N-1 is padding (so both halves are N
//! wide and decoding is a single divmod), and ids N..2N-1 are the point
//! markers. Markers get the higher ids so they paint over the segments.
//! Atom ids are globally dense across the whole plot.
//!
//! Markers are drawn even when the caller asked for none: a circle with the
//! line's own width sits on every joint, because two fat segments meeting
//! at an angle otherwise leave a chipped corner.

use plotflow_raster::{GrayscaleBuffer, GridVisitor, TileBuffer};

use crate::array::{ArrayError, DataArray};
use crate::canvas::{CanvasConfig, Transform, TILE_SIZE};
use crate::irs::{IntersectionResult, IntersectionResultSet, SetIter};
use crate::selection::SelectionMap;

/// Data-space bounding rectangle; NaN until something merges in.
#[derive(Clone, Copy, Debug)]
pub struct Range2D {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Range2D {
    pub fn empty() -> Range2D {
        Range2D {
            xmin: f64::NAN,
            ymin: f64::NAN,
            xmax: f64::NAN,
            ymax: f64::NAN,
        }
    }

    /// NaN-tolerant union: a NaN side loses to the other operand.
    pub fn merge(&mut self, other: Range2D) {
        // f64::min/max return the non-NaN operand when one side is NaN.
        self.xmin = self.xmin.min(other.xmin);
        self.ymin = self.ymin.min(other.ymin);
        self.xmax = self.xmax.max(other.xmax);
        self.ymax = self.ymax.max(other.ymax);
    }
}

impl Default for Range2D {
    fn default() -> Self {
        Range2D::empty()
    }
}

/// Everything a worker task needs to know about one tile request. Small and
/// cheap to clone into task closures.
#[derive(Clone)]
pub struct PlotRequest {
    pub sm_version: i32,
    pub canvas: CanvasConfig,
    /// -1 for regular tiles, otherwise the highlighted item.
    pub item_id: i32,
}

impl PlotRequest {
    pub fn is_highlight(&self) -> bool {
        self.item_id != -1
    }
}

/// Fields shared by both figure data variants.
struct FigureBase {
    start_item_id: i32,
    item_cnt: i32,
    start_atom_idx: i64,
    atom_cnt: i64,
    x: DataArray,
    y: DataArray,
    colors: DataArray,
    marker_size: f32,
    line_width: f32,
    highlight_line_width: f32,
}

impl FigureBase {
    fn line_width(&self, req: &PlotRequest) -> f32 {
        if req.is_highlight() {
            self.highlight_line_width
        } else {
            self.line_width
        }
    }

    fn range(&self) -> Range2D {
        let (xmin, xmax) = self.x.minmax();
        let (ymin, ymax) = self.y.minmax();
        Range2D {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

/// Appends `atom` for every cell the marker's bounding box touches (at most
/// four, given markers are smaller than a tile).
#[inline]
fn append_marker_cells(
    irs: &IntersectionResultSet,
    out: &mut IntersectionResult,
    atom: i64,
    tx: f32,
    ty: f32,
    marker_radius: f32,
) {
    let x0 = (tx - marker_radius).round_ties_even() as i32;
    let x1 = (tx + marker_radius).round_ties_even() as i32;
    let y0 = (ty - marker_radius).round_ties_even() as i32;
    let y1 = (ty + marker_radius).round_ties_even() as i32;
    for (cx, cy) in [(x0, y0), (x0, y1), (x1, y0), (x1, y1)] {
        let id = irs.buf_id(cy, cx);
        if id >= 0 {
            out.append(id as usize, atom);
        }
    }
}

/// Pixel transform shifted into one tile's frame.
fn tile_frame(canvas: &CanvasConfig, row: i32, col: i32) -> Transform {
    let mut tr = canvas.transform();
    tr.xbias -= (col * TILE_SIZE) as f32;
    tr.ybias -= (row * TILE_SIZE) as f32;
    tr
}

/// Lines over a rectangular (item_cnt × pts_cnt) point grid: every item has
/// the same number of points, so atom decoding is one divmod by 2·pts_cnt.
pub struct RectangularLineData {
    base: FigureBase,
    pts_cnt: i32,
}

impl RectangularLineData {
    #[allow(clippy::too_many_arguments)]
    fn new(
        start_item_id: i32,
        start_atom_idx: i64,
        x: DataArray,
        y: DataArray,
        colors: DataArray,
        item_cnt: i32,
        pts_cnt: i32,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> RectangularLineData {
        RectangularLineData {
            base: FigureBase {
                start_item_id,
                item_cnt,
                start_atom_idx,
                atom_cnt: item_cnt as i64 * pts_cnt as i64 * 2,
                x,
                y,
                colors,
                marker_size,
                line_width,
                highlight_line_width,
            },
            pts_cnt,
        }
    }

    fn atom_span(&self, item_id: i32) -> (i64, i64) {
        let rel = (item_id - self.base.start_item_id) as i64;
        let start = self.base.start_atom_idx + rel * self.pts_cnt as i64 * 2;
        (start, start + self.pts_cnt as i64 * 2)
    }

    fn compute_intersection(
        &self,
        req: &PlotRequest,
        sm: &SelectionMap,
        irs: &IntersectionResultSet,
        out: &mut IntersectionResult,
    ) {
        let b = &self.base;
        let tr = req.canvas.tile_transform();
        let tw = b.line_width(req) / TILE_SIZE as f32;
        let marker_radius = b.marker_size / (2.0 * TILE_SIZE as f32);
        assert!(tw < 1.0, "line width must stay below one tile");
        assert!(marker_radius < 1.0, "markers must stay below one tile");

        let batch_start = b.start_atom_idx.max(out.start_id());
        let batch_end = (b.start_atom_idx + b.atom_cnt).min(out.end_id());
        if batch_start >= batch_end {
            return;
        }

        let per_item = 2 * self.pts_cnt as i64;
        let mut rel_item = ((batch_start - b.start_atom_idx) / per_item) as i32;
        let mut pt_idx = ((batch_start - b.start_atom_idx) % per_item) as i32;
        let mut atom = batch_start;

        let visitor = GridVisitor::new(
            irs.col_start(),
            irs.row_start(),
            irs.col_start() + irs.ncols() - 1,
            irs.row_start() + irs.nrows() - 1,
        );

        loop {
            // Skip disabled items. Highlight requests name one item
            // explicitly and never filter.
            if !req.is_highlight() {
                while !sm.is_enabled(b.start_item_id + rel_item) {
                    rel_item += 1;
                    atom += per_item - pt_idx as i64;
                    pt_idx = 0;
                    if atom >= batch_end {
                        return;
                    }
                }
            }

            // Segment atoms.
            if pt_idx < self.pts_cnt - 1 {
                let mut tx0 = b.x.get_transformed(rel_item, pt_idx, tr.xscale, tr.xbias);
                let mut ty0 = b.y.get_transformed(rel_item, pt_idx, tr.yscale, tr.ybias);
                while pt_idx < self.pts_cnt - 1 {
                    let tx1 = b.x.get_transformed(rel_item, pt_idx + 1, tr.xscale, tr.xbias);
                    let ty1 = b.y.get_transformed(rel_item, pt_idx + 1, tr.yscale, tr.ybias);
                    visitor.visit(tx0, ty0, tx1, ty1, tw, |x, y| {
                        let id = irs.buf_id(y, x);
                        if id >= 0 {
                            out.append(id as usize, atom);
                        }
                    });
                    tx0 = tx1;
                    ty0 = ty1;
                    atom += 1;
                    if atom >= batch_end {
                        return;
                    }
                    pt_idx += 1;
                }
            }

            // The padding atom between segments and markers.
            if pt_idx == self.pts_cnt - 1 {
                atom += 1;
                if atom >= batch_end {
                    return;
                }
                pt_idx += 1;
            }

            // Marker atoms.
            while pt_idx < 2 * self.pts_cnt {
                let p = pt_idx - self.pts_cnt;
                let tx = b.x.get_transformed(rel_item, p, tr.xscale, tr.xbias);
                let ty = b.y.get_transformed(rel_item, p, tr.yscale, tr.ybias);
                append_marker_cells(irs, out, atom, tx, ty, marker_radius);
                atom += 1;
                if atom >= batch_end {
                    return;
                }
                pt_idx += 1;
            }

            rel_item += 1;
            pt_idx = 0;
        }
    }

    fn paint(
        &self,
        tile: &mut TileBuffer,
        req: &PlotRequest,
        iter: &mut SetIter<'_>,
        row: i32,
        col: i32,
    ) {
        if !iter.has_next() {
            return;
        }
        let b = &self.base;
        let line_width = b.line_width(req);
        let tr = tile_frame(&req.canvas, row, col);
        let fd_end = b.start_atom_idx + b.atom_cnt;

        let mut gray = GrayscaleBuffer::new();
        // One grayscale pass per item: consecutive atoms of the same item
        // share the scratch and merge once, with that item's color.
        let mut prev_item = -1;

        while iter.has_next() && iter.peek() < fd_end {
            let atom = iter.next_id();
            let rel_item = ((atom - b.start_atom_idx) / (2 * self.pts_cnt as i64)) as i32;
            let pt_idx = ((atom - b.start_atom_idx) % (2 * self.pts_cnt as i64)) as i32;

            if prev_item != -1 && prev_item != rel_item {
                tile.merge(
                    &mut gray,
                    b.start_item_id + prev_item,
                    b.colors.get_argb(prev_item),
                );
            }
            prev_item = rel_item;

            if pt_idx < self.pts_cnt - 1 {
                let x0 = b.x.get_transformed(rel_item, pt_idx, tr.xscale, tr.xbias);
                let y0 = b.y.get_transformed(rel_item, pt_idx, tr.yscale, tr.ybias);
                let x1 = b.x.get_transformed(rel_item, pt_idx + 1, tr.xscale, tr.xbias);
                let y1 = b.y.get_transformed(rel_item, pt_idx + 1, tr.yscale, tr.ybias);
                gray.draw_line(x0, y0, x1, y1, line_width);
            } else if pt_idx >= self.pts_cnt {
                let p = pt_idx - self.pts_cnt;
                let x0 = b.x.get_transformed(rel_item, p, tr.xscale, tr.xbias);
                let y0 = b.y.get_transformed(rel_item, p, tr.yscale, tr.ybias);
                gray.draw_circle(x0, y0, b.marker_size * 0.5);
            }
        }

        if prev_item != -1 {
            tile.merge(
                &mut gray,
                b.start_item_id + prev_item,
                b.colors.get_argb(prev_item),
            );
        }
    }
}

/// Lines with per-item point counts: a start-index array maps each item into
/// the shared flat X/Y buffers.
pub struct FreeformLineData {
    base: FigureBase,
    start_idxs: DataArray,
    total_pts: i64,
}

impl FreeformLineData {
    #[allow(clippy::too_many_arguments)]
    fn new(
        start_item_id: i32,
        start_atom_idx: i64,
        x: DataArray,
        y: DataArray,
        start_idxs: DataArray,
        colors: DataArray,
        item_cnt: i32,
        total_pts: i64,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> Result<FreeformLineData, ArrayError> {
        // Start indices are validated here, once, so the walkers below can
        // read them unchecked: in range and non-decreasing (which also pins
        // every per-item point count into [0, i32::MAX]).
        let mut prev = 0i64;
        for k in 0..item_cnt {
            let v = start_idxs.get_index(0, k, total_pts.max(1))?;
            if v < prev {
                return Err(ArrayError::IndexOutOfRange {
                    name: start_idxs.name(),
                    value: v,
                    limit: prev,
                });
            }
            prev = v;
        }

        Ok(FreeformLineData {
            base: FigureBase {
                start_item_id,
                item_cnt,
                start_atom_idx,
                atom_cnt: total_pts * 2,
                x,
                y,
                colors,
                marker_size,
                line_width,
                highlight_line_width,
            },
            start_idxs,
            total_pts,
        })
    }

    /// First point of an item; validated at construction.
    fn start_idx(&self, rel_item: i32) -> i64 {
        self.start_idxs.value(0, rel_item) as i64
    }

    fn pts_cnt(&self, rel_item: i32) -> i32 {
        let next = if rel_item < self.base.item_cnt - 1 {
            self.start_idx(rel_item + 1)
        } else {
            self.total_pts
        };
        (next - self.start_idx(rel_item)) as i32
    }

    fn atom_span(&self, item_id: i32) -> (i64, i64) {
        let rel = item_id - self.base.start_item_id;
        let start = self.base.start_atom_idx + 2 * self.start_idx(rel);
        (start, start + 2 * self.pts_cnt(rel) as i64)
    }

    /// Item containing `atom`, with its start index, point count, and the
    /// atom's position within the item. Linear scan over items.
    fn locate(&self, atom: i64) -> (i32, i64, i32, i32) {
        let rel_atom = atom - self.base.start_atom_idx;
        for rel_item in 0..self.base.item_cnt {
            let start = self.start_idx(rel_item);
            let pt_idx = rel_atom - 2 * start;
            let pts = self.pts_cnt(rel_item);
            assert!(pt_idx >= 0, "atom {atom} before item #{rel_item}");
            if pt_idx < 2 * pts as i64 {
                return (rel_item, start, pts, pt_idx as i32);
            }
        }
        panic!("atom {atom} beyond this figure data");
    }

    fn compute_intersection(
        &self,
        req: &PlotRequest,
        sm: &SelectionMap,
        irs: &IntersectionResultSet,
        out: &mut IntersectionResult,
    ) {
        let b = &self.base;
        let tr = req.canvas.tile_transform();
        let tw = b.line_width(req) / TILE_SIZE as f32;
        let marker_radius = b.marker_size / (2.0 * TILE_SIZE as f32);
        assert!(tw < 1.0, "line width must stay below one tile");
        assert!(marker_radius < 1.0, "markers must stay below one tile");

        let batch_start = b.start_atom_idx.max(out.start_id());
        let batch_end = (b.start_atom_idx + b.atom_cnt).min(out.end_id());
        if batch_start >= batch_end {
            return;
        }

        let (mut rel_item, mut start_idx, mut pts_cnt, mut pt_idx) = self.locate(batch_start);
        let mut atom = batch_start;

        let visitor = GridVisitor::new(
            irs.col_start(),
            irs.row_start(),
            irs.col_start() + irs.ncols() - 1,
            irs.row_start() + irs.nrows() - 1,
        );

        loop {
            if !req.is_highlight() {
                loop {
                    if sm.is_enabled(b.start_item_id + rel_item) {
                        break;
                    }
                    rel_item += 1;
                    if rel_item >= b.item_cnt {
                        return;
                    }
                    start_idx = self.start_idx(rel_item);
                    pts_cnt = self.pts_cnt(rel_item);
                    pt_idx = 0;
                    atom = b.start_atom_idx + 2 * start_idx;
                    if atom >= batch_end {
                        return;
                    }
                }
            }

            if pt_idx < pts_cnt - 1 {
                let j = (start_idx + pt_idx as i64) as i32;
                let mut tx0 = b.x.get_transformed(0, j, tr.xscale, tr.xbias);
                let mut ty0 = b.y.get_transformed(0, j, tr.yscale, tr.ybias);
                while pt_idx < pts_cnt - 1 {
                    let j = (start_idx + pt_idx as i64) as i32 + 1;
                    let tx1 = b.x.get_transformed(0, j, tr.xscale, tr.xbias);
                    let ty1 = b.y.get_transformed(0, j, tr.yscale, tr.ybias);
                    visitor.visit(tx0, ty0, tx1, ty1, tw, |x, y| {
                        let id = irs.buf_id(y, x);
                        if id >= 0 {
                            out.append(id as usize, atom);
                        }
                    });
                    tx0 = tx1;
                    ty0 = ty1;
                    atom += 1;
                    if atom >= batch_end {
                        return;
                    }
                    pt_idx += 1;
                }
            }

            if pt_idx == pts_cnt - 1 {
                atom += 1;
                if atom >= batch_end {
                    return;
                }
                pt_idx += 1;
            }

            while pt_idx < 2 * pts_cnt {
                let j = (start_idx + (pt_idx - pts_cnt) as i64) as i32;
                let tx = b.x.get_transformed(0, j, tr.xscale, tr.xbias);
                let ty = b.y.get_transformed(0, j, tr.yscale, tr.ybias);
                append_marker_cells(irs, out, atom, tx, ty, marker_radius);
                atom += 1;
                if atom >= batch_end {
                    return;
                }
                pt_idx += 1;
            }

            rel_item += 1;
            start_idx = self.start_idx(rel_item);
            pts_cnt = self.pts_cnt(rel_item);
            pt_idx = 0;
        }
    }

    fn paint(
        &self,
        tile: &mut TileBuffer,
        req: &PlotRequest,
        iter: &mut SetIter<'_>,
        row: i32,
        col: i32,
    ) {
        if !iter.has_next() {
            return;
        }
        let b = &self.base;
        let line_width = b.line_width(req);
        let tr = tile_frame(&req.canvas, row, col);
        let fd_end = b.start_atom_idx + b.atom_cnt;

        let mut gray = GrayscaleBuffer::new();
        let mut prev_item = -1;

        let (mut rel_item, mut start_idx, mut pts_cnt, _) = self.locate(iter.peek());

        while iter.has_next() && iter.peek() < fd_end {
            let atom = iter.next_id();

            // Atoms arrive in increasing order; roll the item bookkeeping
            // forward until it covers this atom.
            let mut pt_idx = (atom - b.start_atom_idx) - 2 * start_idx;
            while pt_idx >= 2 * pts_cnt as i64 {
                rel_item += 1;
                assert!(rel_item < b.item_cnt, "atom {atom} beyond the last item");
                start_idx = self.start_idx(rel_item);
                pts_cnt = self.pts_cnt(rel_item);
                pt_idx = (atom - b.start_atom_idx) - 2 * start_idx;
            }
            let pt_idx = pt_idx as i32;

            if prev_item != -1 && prev_item != rel_item {
                tile.merge(
                    &mut gray,
                    b.start_item_id + prev_item,
                    b.colors.get_argb(prev_item),
                );
            }
            prev_item = rel_item;

            if pt_idx < pts_cnt - 1 {
                let j = (start_idx + pt_idx as i64) as i32;
                let x0 = b.x.get_transformed(0, j, tr.xscale, tr.xbias);
                let y0 = b.y.get_transformed(0, j, tr.yscale, tr.ybias);
                let x1 = b.x.get_transformed(0, j + 1, tr.xscale, tr.xbias);
                let y1 = b.y.get_transformed(0, j + 1, tr.yscale, tr.ybias);
                gray.draw_line(x0, y0, x1, y1, line_width);
            } else if pt_idx >= pts_cnt {
                let j = (start_idx + (pt_idx - pts_cnt) as i64) as i32;
                let x0 = b.x.get_transformed(0, j, tr.xscale, tr.xbias);
                let y0 = b.y.get_transformed(0, j, tr.yscale, tr.ybias);
                gray.draw_circle(x0, y0, b.marker_size * 0.5);
            }
        }

        if prev_item != -1 {
            tile.merge(
                &mut gray,
                b.start_item_id + prev_item,
                b.colors.get_argb(prev_item),
            );
        }
    }
}

/// One ingested batch of items, in either layout.
pub enum FigureData {
    Rectangular(RectangularLineData),
    Freeform(FreeformLineData),
}

impl FigureData {
    #[allow(clippy::too_many_arguments)]
    pub fn rectangular(
        start_item_id: i32,
        start_atom_idx: i64,
        x: DataArray,
        y: DataArray,
        colors: DataArray,
        item_cnt: i32,
        pts_cnt: i32,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> FigureData {
        FigureData::Rectangular(RectangularLineData::new(
            start_item_id,
            start_atom_idx,
            x,
            y,
            colors,
            item_cnt,
            pts_cnt,
            marker_size,
            line_width,
            highlight_line_width,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn freeform(
        start_item_id: i32,
        start_atom_idx: i64,
        x: DataArray,
        y: DataArray,
        start_idxs: DataArray,
        colors: DataArray,
        item_cnt: i32,
        total_pts: i64,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> Result<FigureData, ArrayError> {
        Ok(FigureData::Freeform(FreeformLineData::new(
            start_item_id,
            start_atom_idx,
            x,
            y,
            start_idxs,
            colors,
            item_cnt,
            total_pts,
            marker_size,
            line_width,
            highlight_line_width,
        )?))
    }

    fn base(&self) -> &FigureBase {
        match self {
            FigureData::Rectangular(d) => &d.base,
            FigureData::Freeform(d) => &d.base,
        }
    }

    pub fn start_item_id(&self) -> i32 {
        self.base().start_item_id
    }

    pub fn item_cnt(&self) -> i32 {
        self.base().item_cnt
    }

    pub fn start_atom_idx(&self) -> i64 {
        self.base().start_atom_idx
    }

    pub fn atom_cnt(&self) -> i64 {
        self.base().atom_cnt
    }

    /// Data-space bounds of this figure data.
    pub fn range(&self) -> Range2D {
        self.base().range()
    }

    /// Global atom-id span `[start, end)` of one item.
    pub fn atom_span(&self, item_id: i32) -> (i64, i64) {
        debug_assert!(
            item_id >= self.start_item_id() && item_id < self.start_item_id() + self.item_cnt()
        );
        match self {
            FigureData::Rectangular(d) => d.atom_span(item_id),
            FigureData::Freeform(d) => d.atom_span(item_id),
        }
    }

    /// Intersection phase: appends, for the slice of `out`'s batch that
    /// overlaps this figure data, every (cell, atom) incidence. If an atom
    /// is appended for any cell of the super-region, it is appended for all
    /// cells its geometry covers; atoms outside are ignored.
    pub fn compute_intersection(
        &self,
        req: &PlotRequest,
        sm: &SelectionMap,
        irs: &IntersectionResultSet,
        out: &mut IntersectionResult,
    ) {
        match self {
            FigureData::Rectangular(d) => d.compute_intersection(req, sm, irs, out),
            FigureData::Freeform(d) => d.compute_intersection(req, sm, irs, out),
        }
    }

    /// Paint phase: consumes the iterator while it points at this figure
    /// data's atoms, drawing into `tile` for cell (row, col).
    pub fn paint(
        &self,
        tile: &mut TileBuffer,
        req: &PlotRequest,
        iter: &mut SetIter<'_>,
        row: i32,
        col: i32,
    ) {
        match self {
            FigureData::Rectangular(d) => d.paint(tile, req, iter, row, col),
            FigureData::Freeform(d) => d.paint(tile, req, iter, row, col),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_fixture() -> FigureData {
        // Two items, three points each.
        let x = DataArray::from_f64("X", &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0], &[2, 3]).unwrap();
        let y = DataArray::from_f64("Y", &[0.0, 1.0, 0.0, 2.0, 3.0, 2.0], &[2, 3]).unwrap();
        let colors =
            DataArray::from_u8("colors", &[255, 0, 0, 0, 0, 255], &[2, 3]).unwrap();
        FigureData::rectangular(0, 0, x, y, colors, 2, 3, 4.0, 2.0, 4.0)
    }

    #[test]
    fn rectangular_atom_spans() {
        let fd = rect_fixture();
        assert_eq!(fd.atom_cnt(), 12);
        assert_eq!(fd.atom_span(0), (0, 6));
        assert_eq!(fd.atom_span(1), (6, 12));
    }

    #[test]
    fn freeform_atom_spans_follow_start_idxs() {
        let x = DataArray::from_f64("X", &[0.0; 7], &[7]).unwrap();
        let y = DataArray::from_f64("Y", &[0.0; 7], &[7]).unwrap();
        let starts = DataArray::from_i64("start_idxs", &[0, 4], &[2]).unwrap();
        let colors = DataArray::from_u8("colors", &[1, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let fd =
            FigureData::freeform(10, 100, x, y, starts, colors, 2, 7, 2.0, 1.0, 2.0).unwrap();

        assert_eq!(fd.atom_cnt(), 14);
        // Item 10: 4 points starting at 0 -> atoms [100, 108).
        assert_eq!(fd.atom_span(10), (100, 108));
        // Item 11: 3 points starting at 4 -> atoms [108, 114).
        assert_eq!(fd.atom_span(11), (108, 114));
    }

    #[test]
    fn freeform_rejects_decreasing_start_idxs() {
        let x = DataArray::from_f64("X", &[0.0; 4], &[4]).unwrap();
        let y = DataArray::from_f64("Y", &[0.0; 4], &[4]).unwrap();
        let starts = DataArray::from_i64("start_idxs", &[2, 1], &[2]).unwrap();
        let colors = DataArray::from_u8("colors", &[0; 6], &[2, 3]).unwrap();
        assert!(FigureData::freeform(0, 0, x, y, starts, colors, 2, 4, 2.0, 1.0, 2.0).is_err());
    }

    #[test]
    fn intersection_covers_the_touched_cell() {
        let fd = rect_fixture();
        let sm = SelectionMap::new(2);
        // One-tile canvas over the data: everything lands in cell (0, 0).
        let canvas = CanvasConfig::new(0, 256, 256, -0.2, -0.2, 2.2, 3.2);
        let req = PlotRequest {
            sm_version: 0,
            canvas,
            item_id: -1,
        };
        let irs = IntersectionResultSet::new(&[(0, 0)], &[], 0, fd.atom_cnt(), 100_000);
        let mut out = IntersectionResult::new(irs.tile_cnt(), 0, fd.atom_cnt());
        fd.compute_intersection(&req, &sm, &irs, &mut out);
        out.finish();
        irs.publish(0, out);

        let mut atoms = Vec::new();
        let mut it = irs.iter(0);
        while it.has_next() {
            atoms.push(it.next_id());
        }
        // Both items contribute: segments 0,1 and markers 3..5 per item
        // (atom 2 is padding and never appended).
        assert!(atoms.contains(&0) && atoms.contains(&1));
        assert!(atoms.contains(&3) && atoms.contains(&5));
        assert!(!atoms.contains(&2) && !atoms.contains(&8));
        assert!(atoms.contains(&6) && atoms.contains(&9));
    }

    #[test]
    fn disabled_items_are_skipped_for_regular_tiles_only() {
        let fd = rect_fixture();
        let sm = SelectionMap::new(2);
        sm.start_update();
        sm.set_enabled(0, false);
        sm.end_update(2);

        let canvas = CanvasConfig::new(0, 256, 256, -0.2, -0.2, 2.2, 3.2);
        let req = PlotRequest {
            sm_version: 2,
            canvas: canvas.clone(),
            item_id: -1,
        };
        let irs = IntersectionResultSet::new(&[(0, 0)], &[], 0, fd.atom_cnt(), 100_000);
        let mut out = IntersectionResult::new(irs.tile_cnt(), 0, fd.atom_cnt());
        fd.compute_intersection(&req, &sm, &irs, &mut out);
        out.finish();
        irs.publish(0, out);

        let mut it = irs.iter(0);
        while it.has_next() {
            assert!(it.next_id() >= 6, "item 0 atoms must be filtered");
        }

        // A highlight request for the disabled item still draws it.
        let hl = PlotRequest {
            sm_version: 2,
            canvas,
            item_id: 0,
        };
        let irs2 = IntersectionResultSet::new(&[(0, 0)], &[], 0, 6, 100_000);
        let mut out2 = IntersectionResult::new(irs2.tile_cnt(), 0, 6);
        fd.compute_intersection(&hl, &sm, &irs2, &mut out2);
        out2.finish();
        irs2.publish(0, out2);
        assert!(irs2.iter(0).has_next());
    }

    #[test]
    fn paint_deposits_ink_and_hovermap() {
        let fd = rect_fixture();
        let sm = SelectionMap::new(2);
        let canvas = CanvasConfig::new(0, 256, 256, -0.2, -0.2, 2.2, 3.2);
        let req = PlotRequest {
            sm_version: 0,
            canvas,
            item_id: -1,
        };
        let irs = IntersectionResultSet::new(&[(0, 0)], &[], 0, fd.atom_cnt(), 100_000);
        let mut out = IntersectionResult::new(irs.tile_cnt(), 0, fd.atom_cnt());
        fd.compute_intersection(&req, &sm, &irs, &mut out);
        out.finish();
        irs.publish(0, out);

        let mut tile = TileBuffer::regular();
        let mut it = irs.iter(0);
        fd.paint(&mut tile, &req, &mut it, 0, 0);
        assert!(!it.has_next());

        let hover = tile.hovermap_bytes().unwrap();
        let seen: std::collections::HashSet<i32> = hover
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert!(seen.contains(&0) && seen.contains(&1), "both items painted");
    }
}
