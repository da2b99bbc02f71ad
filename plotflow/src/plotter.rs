//! The plotter: ingestion, request deduplication, and the task graph.
//!
//! One tile request turns into a small dependency graph on the work pool:
//!
//! ```text
//! intersect (one per atom batch, LIFO)
//!     \ ... /        every batch feeds the launcher
//!    launcher (LIFO) - converts inflight entries to paint tasks
//!     / ... \        one paint per active cell (LIFO / LIFO-low)
//!   paint  paint  ->  PNG + hovermap -> host callback
//!     \ ... /
//!    cleanup (FIFO) - drops the request context
//! ```
//!
//! All bookkeeping (inflight tiles, sent ledger, orphaned seqs, configs)
//! lives under one mutex; figure data is append-only until the selection map
//! seals it and is read lock-free by workers afterwards.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use log::{debug, warn};
use plotflow_raster::TileBuffer;
use work_scheduler::{ScheduleClass, TaskHandle, WorkPool};

use crate::array::DataArray;
use crate::canvas::{CanvasConfig, TileKey, TILE_SIZE};
use crate::clock::{MonotonicClock, TimeSource};
use crate::error::PlotError;
use crate::figure::{FigureData, PlotRequest, Range2D};
use crate::irs::{IntersectionResult, IntersectionResultSet};
use crate::message::{fmt_double, MessageCallback, MessageData, OutgoingMessage};
use crate::selection::SelectionMap;

/// An unacknowledged sent tile is retained this long, then forgotten.
pub const TILE_ACK_EXPIRE_US: i64 = 5_000_000;

/// One requested tile cell and the FE sequence number attached to it.
#[derive(Clone, Copy, Debug)]
pub struct TileCoord {
    pub row: i32,
    pub col: i32,
    pub seq: i32,
}

impl TileCoord {
    pub fn new(row: i32, col: i32, seq: i32) -> TileCoord {
        TileCoord { row, col, seq }
    }
}

/// Where an inflight tile currently is. The intersect-phase handle list is
/// shared by every cell of the same request and filled in once the tasks
/// exist; a duplicate request arriving in the same lock section simply finds
/// it unset and has nothing to expedite yet.
enum TilePhase {
    Intersecting(Arc<OnceLock<Vec<TaskHandle>>>),
    Painting(TaskHandle),
    Sent,
}

struct InflightTile {
    phase: TilePhase,
    seq: i32,
}

#[derive(Default)]
struct PlotterState {
    next_item_id: i32,
    next_atom_idx: i64,
    range: Range2D,
    configs: HashMap<i32, CanvasConfig>,
    /// At most one entry per tile key; dedup point for repeat requests.
    inflight: HashMap<TileKey, InflightTile>,
    /// Sent-but-unacknowledged tiles by sequence number.
    sent: HashMap<i32, TileKey>,
    /// (seq, send time) in send order, for the expiry sweep.
    sent_fifo: VecDeque<(i32, i64)>,
    /// Sequence numbers superseded by duplicate requests; drained onto the
    /// next outgoing tile message.
    orphaned: Vec<i32>,
}

/// The compute core's host-facing object.
pub struct Plotter {
    pool: Arc<WorkPool>,
    callback: MessageCallback,
    clock: Arc<dyn TimeSource>,
    /// Append-only until sealed; workers clone the Arc list and read without
    /// the state lock.
    figures: RwLock<Vec<Arc<FigureData>>>,
    /// Created once (explicitly or on first render); creation seals ingest.
    sm: OnceLock<Arc<SelectionMap>>,
    state: Mutex<PlotterState>,
}

impl Plotter {
    pub fn new(pool: Arc<WorkPool>, callback: MessageCallback) -> Arc<Plotter> {
        Self::with_clock(pool, callback, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        pool: Arc<WorkPool>,
        callback: MessageCallback,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<Plotter> {
        Arc::new(Plotter {
            pool,
            callback,
            clock,
            figures: RwLock::new(Vec::new()),
            sm: OnceLock::new(),
            state: Mutex::new(PlotterState::default()),
        })
    }

    // ---- ingestion ----

    /// Adds items over a rectangular (item_cnt × pts_cnt) point grid.
    #[allow(clippy::too_many_arguments)]
    pub fn add_rectangular_line_data(
        &self,
        x: DataArray,
        y: DataArray,
        colors: DataArray,
        item_cnt: i32,
        pts_cnt: i32,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> Result<(), PlotError> {
        let mut state = self.state.lock().unwrap();
        if self.sm.get().is_some() {
            return Err(PlotError::IngestAfterSeal);
        }
        check_shape(&x, item_cnt, pts_cnt)?;
        check_shape(&y, item_cnt, pts_cnt)?;
        colors.ensure_color()?;
        check_shape(&colors, item_cnt, 3)?;

        let fd = FigureData::rectangular(
            state.next_item_id,
            state.next_atom_idx,
            x,
            y,
            colors,
            item_cnt,
            pts_cnt,
            marker_size,
            line_width,
            highlight_line_width,
        );
        self.register(&mut state, fd);
        Ok(())
    }

    /// Adds items with per-item point counts over flat X/Y buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn add_freeform_line_data(
        &self,
        x: DataArray,
        y: DataArray,
        start_idxs: DataArray,
        colors: DataArray,
        item_cnt: i32,
        total_pts: i64,
        marker_size: f32,
        line_width: f32,
        highlight_line_width: f32,
    ) -> Result<(), PlotError> {
        let mut state = self.state.lock().unwrap();
        if self.sm.get().is_some() {
            return Err(PlotError::IngestAfterSeal);
        }
        check_shape(&x, 1, total_pts as i32)?;
        check_shape(&y, 1, total_pts as i32)?;
        start_idxs.ensure_integer()?;
        check_shape(&start_idxs, 1, item_cnt)?;
        colors.ensure_color()?;
        check_shape(&colors, item_cnt, 3)?;

        let fd = FigureData::freeform(
            state.next_item_id,
            state.next_atom_idx,
            x,
            y,
            start_idxs,
            colors,
            item_cnt,
            total_pts,
            marker_size,
            line_width,
            highlight_line_width,
        )?;
        self.register(&mut state, fd);
        Ok(())
    }

    fn register(&self, state: &mut PlotterState, fd: FigureData) {
        debug_assert_eq!(fd.start_item_id(), state.next_item_id);
        debug_assert_eq!(fd.start_atom_idx(), state.next_atom_idx);
        state.next_item_id += fd.item_cnt();
        state.next_atom_idx += fd.atom_cnt();
        state.range.merge(fd.range());
        self.figures.write().unwrap().push(Arc::new(fd));
    }

    pub fn item_cnt(&self) -> i32 {
        self.state.lock().unwrap().next_item_id
    }

    // ---- selection map ----

    /// Creates the selection map and seals ingestion. Fails if already
    /// created (explicitly or by a first render).
    pub fn init_selection_map(&self) -> Result<Arc<SelectionMap>, PlotError> {
        let state = self.state.lock().unwrap();
        if self.sm.get().is_some() {
            return Err(PlotError::SelectionAlreadyInitialized);
        }
        Ok(self.ensure_sm(&state))
    }

    fn ensure_sm(&self, state: &PlotterState) -> Arc<SelectionMap> {
        let item_cnt = state.next_item_id as usize;
        self.sm
            .get_or_init(|| Arc::new(SelectionMap::new(item_cnt)))
            .clone()
    }

    pub fn selection(&self) -> Option<&Arc<SelectionMap>> {
        self.sm.get()
    }

    pub fn start_selection_update(&self) {
        self.sm
            .get()
            .expect("selection map not initialized")
            .start_update();
    }

    pub fn end_selection_update(&self, new_version: i32) {
        self.sm
            .get()
            .expect("selection map not initialized")
            .end_update(new_version);
    }

    // ---- canvas configs ----

    pub fn canvas_config(&self, id: i32) -> Option<CanvasConfig> {
        self.state.lock().unwrap().configs.get(&id).cloned()
    }

    /// Creates a canvas config and renders every tile covering it.
    ///
    /// With no predecessor the data rectangle is the global data range plus
    /// a 5% margin. With `is_zoom` the FE pixel rectangle (px0, py0)-(px1,
    /// py1) of the old config becomes the new extent; otherwise the old
    /// config's currently visible viewport (its size shifted by the pan
    /// offsets) is used and the pixel arguments are ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn create_canvas_config(
        self: &Arc<Self>,
        new_id: i32,
        w: i32,
        h: i32,
        old_id: Option<i32>,
        is_zoom: bool,
        px0: f64,
        py0: f64,
        px1: f64,
        py1: f64,
    ) -> Result<(), PlotError> {
        assert!(w >= 1 && h >= 1);
        let mut state = self.state.lock().unwrap();
        let sm = self.ensure_sm(&state);

        let (x0, y0, x1, y1) = match old_id {
            None => {
                let (x0, x1) = initial_range(state.range.xmin, state.range.xmax);
                let (y0, y1) = initial_range(state.range.ymin, state.range.ymax);
                (x0, y0, x1, y1)
            }
            Some(old_id) => {
                let old = state
                    .configs
                    .get(&old_id)
                    .ok_or(PlotError::UnknownConfig(old_id))?;
                let (px0, py0, px1, py1) = if is_zoom {
                    (px0, py0, px1, py1)
                } else {
                    (
                        -old.x_offset as f64,
                        (old.h - 1 - old.y_offset) as f64,
                        (old.w - 1 - old.x_offset) as f64,
                        -old.y_offset as f64,
                    )
                };
                let (ax, ay) = old.data_coord(px0, py0);
                let (bx, by) = old.data_coord(px1, py1);
                (ax.min(bx), ay.min(by), ax.max(bx), ay.max(by))
            }
        };

        // The host re-packages this with axis data before it reaches the FE.
        (self.callback)(OutgoingMessage::new(vec![
            "msg=CanvasConfigSubMessage".to_string(),
            format!("#config_id={new_id}"),
            format!("#w={w}"),
            format!("#h={h}"),
            format!("x0={}", fmt_double(x0)),
            format!("y0={}", fmt_double(y0)),
            format!("x1={}", fmt_double(x1)),
            format!("y1={}", fmt_double(y1)),
            "#zoom_level=0".to_string(),
            "#x_offset=0".to_string(),
            "#y_offset=0".to_string(),
        ]));

        let config = CanvasConfig::new(new_id, w, h, x0, y0, x1, y1);
        state.configs.insert(new_id, config.clone());

        // A new coordinate system invalidates everything: render the full
        // tile grid, without FE sequence numbers.
        let nrows = (h + TILE_SIZE - 1) / TILE_SIZE;
        let ncols = (w + TILE_SIZE - 1) / TILE_SIZE;
        let mut coords = Vec::with_capacity((nrows * ncols) as usize);
        for row in 0..nrows {
            for col in 0..ncols {
                coords.push(TileCoord::new(row, col, -1));
            }
        }

        let req = PlotRequest {
            sm_version: sm.version(),
            canvas: config,
            item_id: -1,
        };
        self.launch_tasks(&mut state, req, &coords, &[]);
        Ok(())
    }

    // ---- tile requests ----

    /// Handles one FE tile request against `config_id` at `zoom_level`.
    /// `item_id` is -1 for regular tiles, else the item to highlight.
    pub fn tile_req_handler(
        self: &Arc<Self>,
        config_id: i32,
        zoom_level: i32,
        item_id: i32,
        prio_coords: &[TileCoord],
        reg_coords: &[TileCoord],
    ) -> Result<(), PlotError> {
        let mut state = self.state.lock().unwrap();
        let sm = self.ensure_sm(&state);
        if item_id != -1 && !(0..state.next_item_id).contains(&item_id) {
            return Err(PlotError::InvalidItemId(item_id));
        }
        let canvas = state
            .configs
            .get(&config_id)
            .ok_or(PlotError::UnknownConfig(config_id))?
            .at_zoom(zoom_level);

        debug!(
            "tile request: config={config_id} zoom={zoom_level} item={item_id} \
             prio={} reg={}",
            prio_coords.len(),
            reg_coords.len()
        );

        let req = PlotRequest {
            sm_version: sm.version(),
            canvas,
            item_id,
        };
        self.launch_tasks(&mut state, req, prio_coords, reg_coords);
        Ok(())
    }

    /// Drops acknowledged tiles from the ledgers, then forgets tiles that
    /// were sent too long ago without an ack.
    pub fn acknowledge_seqs(&self, seqs: &[i32]) {
        let mut state = self.state.lock().unwrap();

        for &seq in seqs {
            match state.sent.remove(&seq) {
                None => {
                    warn!(
                        "FE acknowledged tile #{seq} but we don't know about it - \
                         maybe we already forgot it?"
                    );
                }
                Some(key) => {
                    debug!("FE acknowledged tile #{seq} ({key})");
                    let info = state
                        .inflight
                        .remove(&key)
                        .expect("sent tile missing from the inflight table");
                    debug_assert!(matches!(info.phase, TilePhase::Sent));
                    debug_assert_eq!(info.seq, seq);
                }
            }
        }

        let now = self.clock.now_us();
        while let Some(&(seq, sent_at)) = state.sent_fifo.front() {
            if !state.sent.contains_key(&seq) {
                // Already acknowledged above or in an earlier call.
                state.sent_fifo.pop_front();
                continue;
            }
            let age = now - sent_at;
            if age < TILE_ACK_EXPIRE_US {
                break;
            }
            let key = state.sent.remove(&seq).unwrap();
            debug!("forgetting tile #{seq} ({key}) - age {age} us");
            let info = state
                .inflight
                .remove(&key)
                .expect("expired tile missing from the inflight table");
            debug_assert!(matches!(info.phase, TilePhase::Sent));
            state.sent_fifo.pop_front();
        }
    }

    // ---- internals ----

    /// Builds and enqueues the task graph for one request. Called with the
    /// state lock held; the launcher cannot run before we release it.
    fn launch_tasks(
        self: &Arc<Self>,
        state: &mut PlotterState,
        req: PlotRequest,
        prio_coords: &[TileCoord],
        reg_coords: &[TileCoord],
    ) {
        let tasks_slot: Arc<OnceLock<Vec<TaskHandle>>> = Arc::new(OnceLock::new());
        let prio = self.dedup_inflight(state, &req, &tasks_slot, prio_coords);
        let reg = self.dedup_inflight(state, &req, &tasks_slot, reg_coords);
        if prio.is_empty() && reg.is_empty() {
            debug!("no tile left after deduplication");
            return;
        }

        let (start_idx, end_idx) = if req.item_id == -1 {
            (0, state.next_atom_idx)
        } else {
            self.atom_span(req.item_id)
        };
        let batch_size = ((end_idx - start_idx) / self.pool.nthreads() as i64).clamp(5000, 100_000);
        let irs = Arc::new(IntersectionResultSet::new(
            &prio, &reg, start_idx, end_idx, batch_size,
        ));

        let launcher = {
            let this = Arc::clone(self);
            let req = req.clone();
            let irs = Arc::clone(&irs);
            let slot = Arc::clone(&tasks_slot);
            TaskHandle::new(ScheduleClass::Lifo, move || {
                this.launcher_task(&req, irs, slot);
            })
        };

        let figures: Vec<Arc<FigureData>> = self.figures.read().unwrap().clone();
        let sm = self.sm.get().expect("selection map must exist").clone();
        let mut intersect_tasks = Vec::with_capacity(irs.batches().len());
        for (k, &(s, e)) in irs.batches().iter().enumerate() {
            let figures = figures.clone();
            let sm = sm.clone();
            let req = req.clone();
            let irs = Arc::clone(&irs);
            intersect_tasks.push(TaskHandle::with_dep(ScheduleClass::Lifo, &launcher, move || {
                let mut out = IntersectionResult::new(irs.tile_cnt(), s, e);
                for fd in figures.iter() {
                    let fd_start = fd.start_atom_idx();
                    let fd_end = fd_start + fd.atom_cnt();
                    if s < fd_end && e > fd_start {
                        fd.compute_intersection(&req, &sm, &irs, &mut out);
                    }
                }
                out.finish();
                irs.publish(k, out);
            }));
        }

        for t in &intersect_tasks {
            self.pool.enqueue_shared(t);
        }
        // Duplicate requests arriving from here on can expedite them.
        let _ = tasks_slot.set(intersect_tasks);
        self.pool.enqueue(&launcher);
    }

    /// Filters out coordinates whose tile key is already inflight, wiring up
    /// seq handoff and expediting for the duplicates.
    fn dedup_inflight(
        &self,
        state: &mut PlotterState,
        req: &PlotRequest,
        tasks_slot: &Arc<OnceLock<Vec<TaskHandle>>>,
        coords: &[TileCoord],
    ) -> Vec<(i32, i32)> {
        let mut fresh = Vec::with_capacity(coords.len());
        for &TileCoord { row, col, seq } in coords {
            let key = TileKey {
                sm_version: req.sm_version,
                config_id: req.canvas.id,
                zoom_level: req.canvas.zoom_level,
                row,
                col,
                item_id: req.item_id,
            };
            match state.inflight.entry(key) {
                Entry::Vacant(v) => {
                    v.insert(InflightTile {
                        phase: TilePhase::Intersecting(Arc::clone(tasks_slot)),
                        seq,
                    });
                    fresh.push((row, col));
                }
                Entry::Occupied(mut o) => {
                    let info = o.get_mut();
                    match &info.phase {
                        TilePhase::Sent => {
                            // The FE is about to receive (or already has)
                            // this tile: acknowledge the new seq right away.
                            debug!("dedup: tile {key} already sent (seq #{})", info.seq);
                            state.orphaned.push(seq);
                        }
                        TilePhase::Intersecting(slot) => {
                            debug!("dedup: tile {key} in intersect phase (seq #{})", info.seq);
                            state.orphaned.push(info.seq);
                            info.seq = seq;
                            if let Some(tasks) = slot.get() {
                                for t in tasks {
                                    self.pool.expedite(t);
                                }
                            }
                        }
                        TilePhase::Painting(task) => {
                            debug!("dedup: tile {key} in paint phase (seq #{})", info.seq);
                            self.pool.expedite(task);
                            state.orphaned.push(info.seq);
                            info.seq = seq;
                        }
                    }
                }
            }
        }
        fresh
    }

    /// Runs after every intersect batch: turns each active cell's inflight
    /// entry into a paint task, all feeding one cleanup task that owns the
    /// request context.
    fn launcher_task(
        self: &Arc<Self>,
        req: &PlotRequest,
        irs: Arc<IntersectionResultSet>,
        tasks_slot: Arc<OnceLock<Vec<TaskHandle>>>,
    ) {
        let mut state = self.state.lock().unwrap();

        // The intersect tasks are done; hand their handles back.
        if let Some(tasks) = tasks_slot.get() {
            for t in tasks {
                self.pool.relinquish(t.clone());
            }
        }

        let cleanup = {
            let irs = Arc::clone(&irs);
            let slot = Arc::clone(&tasks_slot);
            TaskHandle::new(ScheduleClass::Fifo, move || {
                debug!("request context dropped");
                drop(irs);
                drop(slot);
            })
        };

        for row in irs.row_start()..irs.row_start() + irs.nrows() {
            for col in irs.col_start()..irs.col_start() + irs.ncols() {
                if irs.buf_id(row, col) < 0 {
                    continue;
                }
                let key = TileKey {
                    sm_version: req.sm_version,
                    config_id: req.canvas.id,
                    zoom_level: req.canvas.zoom_level,
                    row,
                    col,
                    item_id: req.item_id,
                };
                let class = if irs.is_priority(row, col) {
                    ScheduleClass::Lifo
                } else {
                    ScheduleClass::LifoLow
                };

                let task = {
                    let this = Arc::clone(self);
                    let req = req.clone();
                    let irs = Arc::clone(&irs);
                    TaskHandle::with_dep(class, &cleanup, move || {
                        this.paint_task(&req, &irs, row, col);
                    })
                };

                let info = state
                    .inflight
                    .get_mut(&key)
                    .expect("inflight entry vanished before painting");
                debug_assert!(matches!(info.phase, TilePhase::Intersecting(_)));
                info.phase = TilePhase::Painting(task.clone());
                self.pool.enqueue_shared(&task);
            }
        }

        self.pool.enqueue(&cleanup);
    }

    /// Composes one tile, emits its bytes, and retires its seqs. Runs even
    /// when every seq has been superseded: the output is cheap and the FE
    /// accepts it.
    fn paint_task(self: &Arc<Self>, req: &PlotRequest, irs: &IntersectionResultSet, row: i32, col: i32) {
        let buf_id = irs.buf_id(row, col);
        assert!(buf_id >= 0, "paint task on an inactive cell");
        let mut iter = irs.iter(buf_id as usize);

        let mut tile = if req.is_highlight() {
            TileBuffer::highlight()
        } else {
            TileBuffer::regular()
        };

        let figures: Vec<Arc<FigureData>> = self.figures.read().unwrap().clone();
        for fd in figures.iter() {
            if !iter.has_next() {
                break;
            }
            if iter.peek() < fd.start_atom_idx() + fd.atom_cnt() {
                fd.paint(&mut tile, req, &mut iter, row, col);
            }
        }

        let png = MessageData::new(format!("tile-r{row}-c{col}"), tile.png_bytes());
        let hovermap = tile
            .hovermap_bytes()
            .map(|b| MessageData::new(format!("hovermap-r{row}-c{col}"), b));

        let key = TileKey {
            sm_version: req.sm_version,
            config_id: req.canvas.id,
            zoom_level: req.canvas.zoom_level,
            row,
            col,
            item_id: req.item_id,
        };

        let seqs = {
            let mut state = self.state.lock().unwrap();
            let mut seqs = std::mem::take(&mut state.orphaned);
            let info = state
                .inflight
                .get_mut(&key)
                .expect("inflight entry vanished at paint completion");
            let seq = info.seq;
            info.phase = TilePhase::Sent;
            seqs.push(seq);
            let now = self.clock.now_us();
            state.sent.entry(seq).or_insert(key);
            state.sent_fifo.push_back((seq, now));
            seqs
        };

        // Version skew detected mid-render: report the requested version
        // with the low bit set so the FE knows the tile is transient.
        let sm = self.sm.get().expect("selection map must exist");
        let mut sm_version = sm.version();
        if sm_version != req.sm_version {
            sm_version = req.sm_version | 1;
        }

        let seqs_str = seqs
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(":");
        let mut fields = vec![
            "msg=tile".to_string(),
            format!("seqs={seqs_str}"),
            format!("#sm_version={sm_version}"),
            format!("#config_id={}", req.canvas.id),
            format!("#zoom_level={}", req.canvas.zoom_level),
            format!("#row={row}"),
            format!("#col={col}"),
        ];
        if req.is_highlight() {
            fields.push(format!("#item_id={}", req.item_id));
        }

        let mut msg = OutgoingMessage::new(fields).with_blob(png);
        if let Some(h) = hovermap {
            msg = msg.with_blob(h);
        }
        (self.callback)(msg);
    }

    /// Atom span of one item. The id is validated at the API boundary, so a
    /// miss here is a bookkeeping bug.
    fn atom_span(&self, item_id: i32) -> (i64, i64) {
        let figures = self.figures.read().unwrap();
        for fd in figures.iter() {
            if item_id < fd.start_item_id() + fd.item_cnt() {
                return fd.atom_span(item_id);
            }
        }
        panic!("item id {item_id} beyond every figure data");
    }
}

/// Initial data rectangle: the data range widened by 5% per side, or ±1
/// around a degenerate range.
fn initial_range(lo: f64, hi: f64) -> (f64, f64) {
    let diff = hi - lo;
    let margin = if diff == 0.0 { 1.0 } else { diff * 0.05 };
    (lo - margin, hi + margin)
}

fn check_shape(arr: &DataArray, rows: i32, cols: i32) -> Result<(), PlotError> {
    let got = arr.shape();
    if got != [rows, cols] {
        return Err(PlotError::ShapeMismatch {
            name: arr.name(),
            rows,
            cols,
            got_rows: got[0],
            got_cols: got[1],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_range_margins() {
        assert_eq!(initial_range(0.0, 10.0), (-0.5, 10.5));
        assert_eq!(initial_range(3.0, 3.0), (2.0, 4.0));
    }
}
