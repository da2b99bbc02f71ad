//! Intersection result set: compact per-tile lists of atom ids.
//!
//! The intersection phase answers "which atoms may touch which tile" for a
//! whole request at once. Each intersect task covers one contiguous batch of
//! atom ids and owns one [`IntersectionResult`]; inside it, every active
//! tile has a buffer holding a run-length-encoded stream of sorted atom
//! ids. Because batches partition the id space in order and each task
//! appends in increasing order, the combined iterator over all batches
//! yields strictly increasing ids per tile with no merging.

use std::sync::OnceLock;

/// Entries per strip.
pub const STRIP_SZ: usize = 1024;

/// Run-length-encoded, strip-chained atom-id lists for one batch.
///
/// A buffer is a singly linked list of strips of [`STRIP_SZ`] i64 entries:
///
/// - `(id << 16) | n` is a run of `n` consecutive ids starting at `id`,
///   1 ≤ n ≤ 65535;
/// - `0` means end of buffer;
/// - a negative entry links to the next strip (encoded strip index);
/// - the first entry of every buffer is the sentinel `-1`, skipped on read.
///
/// Appending an id equal to the last id already stored is a no-op, so
/// callers may report the same atom for a cell several times in a row.
pub struct IntersectionResult {
    start_id: i64,
    end_id: i64,
    strips: Vec<Box<[i64]>>,
    freelist: Vec<usize>,
    /// Current strip and last-written index per buffer. Strip `k` starts out
    /// assigned to buffer `k`.
    cur: Vec<usize>,
    idx: Vec<usize>,
}

const SENTINEL: i64 = -1;

#[inline]
fn run_end(entry: i64) -> i64 {
    (entry >> 16) + (entry & 0xffff)
}

#[inline]
fn link_encode(strip: usize) -> i64 {
    -(strip as i64 + 1)
}

#[inline]
fn link_decode(entry: i64) -> usize {
    (-entry - 1) as usize
}

impl IntersectionResult {
    /// Creates buffers for `tile_cnt` tiles covering atom ids
    /// `[start_id, end_id)`.
    pub fn new(tile_cnt: usize, start_id: i64, end_id: i64) -> IntersectionResult {
        assert!(tile_cnt > 0);
        assert!(start_id <= end_id);

        let extra = 5.max(tile_cnt / 5);
        let mut strips = Vec::with_capacity(tile_cnt + extra);
        for _ in 0..tile_cnt + extra {
            strips.push(vec![0i64; STRIP_SZ].into_boxed_slice());
        }
        for strip in strips.iter_mut().take(tile_cnt) {
            strip[0] = SENTINEL;
        }

        IntersectionResult {
            start_id,
            end_id,
            strips,
            freelist: (tile_cnt..tile_cnt + extra).collect(),
            cur: (0..tile_cnt).collect(),
            idx: vec![0; tile_cnt],
        }
    }

    pub fn start_id(&self) -> i64 {
        self.start_id
    }

    pub fn end_id(&self) -> i64 {
        self.end_id
    }

    /// Appends `id` to the buffer of tile `buf_id`. Ids must arrive in
    /// non-decreasing order per buffer.
    pub fn append(&mut self, buf_id: usize, id: i64) {
        debug_assert!(
            id >= self.start_id && id < self.end_id,
            "atom id {id} outside batch [{}, {})",
            self.start_id,
            self.end_id
        );

        let cur = self.cur[buf_id];
        let idx = self.idx[buf_id];
        let entry = self.strips[cur][idx];

        // Same id as the last one: nothing to do. The sentinel is excluded
        // explicitly; it must not masquerade as a run ending at the new id.
        if entry >= 0 && run_end(entry) == id + 1 {
            return;
        }

        // Extend the current run when contiguous and not saturated.
        if run_end(entry) == id && (entry & 0xffff) != 0xffff {
            self.strips[cur][idx] = entry + 1;
            return;
        }

        // Room for a new run in this strip (the last two slots are reserved
        // for the terminator or the next-strip link).
        if idx < STRIP_SZ - 2 {
            self.idx[buf_id] = idx + 1;
            self.strips[cur][idx + 1] = (id << 16) | 1;
            return;
        }

        // Strip full: chain a fresh one.
        let next = match self.freelist.pop() {
            Some(s) => s,
            None => self.grow(),
        };
        self.strips[next].fill(0);
        self.strips[cur][idx + 1] = link_encode(next);
        self.cur[buf_id] = next;
        self.idx[buf_id] = 0;
        self.strips[next][0] = (id << 16) | 1;
    }

    /// Refills the freelist and returns one strip index.
    fn grow(&mut self) -> usize {
        let add = (self.strips.len() / 2).clamp(20, 1024);
        let base = self.strips.len();
        for _ in 0..add {
            self.strips.push(vec![0i64; STRIP_SZ].into_boxed_slice());
        }
        self.freelist.extend(base + 1..base + add);
        base
    }

    /// Terminates every buffer. Must be called before iteration.
    pub fn finish(&mut self) {
        for b in 0..self.cur.len() {
            let (cur, idx) = (self.cur[b], self.idx[b]);
            self.strips[cur][idx + 1] = 0;
        }
    }

    /// Iterator over the ids of one buffer. Call only after
    /// [`finish`](Self::finish).
    pub fn iter(&self, buf_id: usize) -> ResultIter<'_> {
        // Buffer k's chain starts at strip k; entry 0 is the sentinel.
        let first = self.strips[buf_id][1];
        if first == 0 {
            ResultIter {
                ir: self,
                strip: 0,
                pos: 0,
                next: 0,
                done: true,
            }
        } else {
            ResultIter {
                ir: self,
                strip: buf_id,
                pos: 1,
                next: first >> 16,
                done: false,
            }
        }
    }
}

/// In-order walk of one buffer's RLE stream.
pub struct ResultIter<'a> {
    ir: &'a IntersectionResult,
    strip: usize,
    pos: usize,
    next: i64,
    done: bool,
}

impl<'a> ResultIter<'a> {
    pub fn has_next(&self) -> bool {
        !self.done
    }

    pub fn peek(&self) -> i64 {
        debug_assert!(!self.done);
        self.next
    }

    pub fn next_id(&mut self) -> i64 {
        debug_assert!(!self.done);
        let ret = self.next;

        let entry = self.ir.strips[self.strip][self.pos];
        self.next += 1;
        if self.next < run_end(entry) {
            return ret;
        }

        // Run exhausted; advance to the next entry (maybe via a strip link).
        self.pos += 1;
        let mut entry = self.ir.strips[self.strip][self.pos];
        if entry == 0 {
            self.done = true;
            return ret;
        }
        if entry < 0 {
            self.strip = link_decode(entry);
            self.pos = 0;
            entry = self.ir.strips[self.strip][self.pos];
        }
        self.next = entry >> 16;
        ret
    }
}

/// All intersection state for one tile request: the rectangular super-region
/// of requested cells, the cell-to-buffer map, priority flags, and one
/// [`IntersectionResult`] per atom batch.
///
/// Each batch slot is written by exactly one intersect task and read only
/// after the request's launcher barrier, so publication goes through a
/// `OnceLock` and needs no locking.
pub struct IntersectionResultSet {
    tile_cnt: usize,
    row_start: i32,
    col_start: i32,
    nrows: i32,
    ncols: i32,
    tile_map: Vec<i32>,
    is_prio: Vec<bool>,
    batches: Vec<(i64, i64)>,
    results: Vec<OnceLock<IntersectionResult>>,
}

impl IntersectionResultSet {
    /// `prio_coords` and `reg_coords` are disjoint (row, col) cell lists;
    /// together they define the active cells. Atom ids `[start, end)` are
    /// split into `batch_size` stripes, one result slot each.
    pub fn new(
        prio_coords: &[(i32, i32)],
        reg_coords: &[(i32, i32)],
        start: i64,
        end: i64,
        batch_size: i64,
    ) -> IntersectionResultSet {
        assert!(!prio_coords.is_empty() || !reg_coords.is_empty());
        assert!(start <= end && batch_size > 0);

        let all = prio_coords.iter().chain(reg_coords.iter());
        let row_min = all.clone().map(|c| c.0).min().unwrap();
        let row_max = all.clone().map(|c| c.0).max().unwrap();
        let col_min = all.clone().map(|c| c.1).min().unwrap();
        let col_max = all.map(|c| c.1).max().unwrap();

        let nrows = row_max - row_min + 1;
        let ncols = col_max - col_min + 1;
        let area = (nrows * ncols) as usize;
        let mut tile_map = vec![-1i32; area];
        let mut is_prio = vec![false; area];

        let cell = |r: i32, c: i32| ((r - row_min) * ncols + (c - col_min)) as usize;
        for &(r, c) in prio_coords {
            assert_eq!(tile_map[cell(r, c)], -1, "duplicate cell ({r}, {c})");
            tile_map[cell(r, c)] = 0;
            is_prio[cell(r, c)] = true;
        }
        for &(r, c) in reg_coords {
            assert_eq!(tile_map[cell(r, c)], -1, "duplicate cell ({r}, {c})");
            tile_map[cell(r, c)] = 0;
        }

        let mut tile_cnt = 0;
        for slot in tile_map.iter_mut() {
            if *slot == 0 {
                *slot = tile_cnt as i32;
                tile_cnt += 1;
            }
        }
        assert_eq!(tile_cnt, prio_coords.len() + reg_coords.len());

        let mut batches = Vec::new();
        let mut at = start;
        while at < end {
            let sz = batch_size.min(end - at);
            batches.push((at, at + sz));
            at += sz;
        }
        let results = (0..batches.len()).map(|_| OnceLock::new()).collect();

        IntersectionResultSet {
            tile_cnt,
            row_start: row_min,
            col_start: col_min,
            nrows,
            ncols,
            tile_map,
            is_prio,
            batches,
            results,
        }
    }

    pub fn tile_cnt(&self) -> usize {
        self.tile_cnt
    }

    pub fn row_start(&self) -> i32 {
        self.row_start
    }

    pub fn col_start(&self) -> i32 {
        self.col_start
    }

    pub fn nrows(&self) -> i32 {
        self.nrows
    }

    pub fn ncols(&self) -> i32 {
        self.ncols
    }

    /// Buffer id for a cell, -1 if the cell is outside the super-region or
    /// inactive.
    pub fn buf_id(&self, row: i32, col: i32) -> i32 {
        if row >= self.row_start
            && row < self.row_start + self.nrows
            && col >= self.col_start
            && col < self.col_start + self.ncols
        {
            self.tile_map[((row - self.row_start) * self.ncols + (col - self.col_start)) as usize]
        } else {
            -1
        }
    }

    pub fn is_priority(&self, row: i32, col: i32) -> bool {
        if row >= self.row_start
            && row < self.row_start + self.nrows
            && col >= self.col_start
            && col < self.col_start + self.ncols
        {
            self.is_prio[((row - self.row_start) * self.ncols + (col - self.col_start)) as usize]
        } else {
            false
        }
    }

    /// Batch atom-id ranges, in id order; index with [`publish`](Self::publish).
    pub fn batches(&self) -> &[(i64, i64)] {
        &self.batches
    }

    /// Installs a finished batch result. Each slot accepts exactly one.
    pub fn publish(&self, batch: usize, result: IntersectionResult) {
        if self.results[batch].set(result).is_err() {
            panic!("batch #{batch} published twice");
        }
    }

    /// Combined in-order iterator over every batch for one buffer. All
    /// batches must be published.
    pub fn iter(&self, buf_id: usize) -> SetIter<'_> {
        let mut it = SetIter {
            irs: self,
            buf_id,
            batch: 0,
            inner: None,
        };
        it.advance();
        it
    }

    fn result(&self, batch: usize) -> &IntersectionResult {
        self.results[batch]
            .get()
            .expect("batch result read before publication")
    }
}

/// Strictly increasing atom ids for one buffer across all batches.
pub struct SetIter<'a> {
    irs: &'a IntersectionResultSet,
    buf_id: usize,
    batch: usize,
    inner: Option<ResultIter<'a>>,
}

impl<'a> SetIter<'a> {
    fn advance(&mut self) {
        while self.batch < self.irs.batches.len() {
            let it = self.irs.result(self.batch).iter(self.buf_id);
            self.batch += 1;
            if it.has_next() {
                self.inner = Some(it);
                return;
            }
        }
        self.inner = None;
    }

    pub fn has_next(&self) -> bool {
        self.inner.is_some()
    }

    pub fn peek(&self) -> i64 {
        self.inner.as_ref().expect("iterator exhausted").peek()
    }

    pub fn next_id(&mut self) -> i64 {
        let it = self.inner.as_mut().expect("iterator exhausted");
        let ret = it.next_id();
        if !it.has_next() {
            self.advance();
        }
        ret
    }
}
