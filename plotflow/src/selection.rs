//! Per-item enable flags with a lock-free reader protocol.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Which items are currently drawn. All items start enabled.
///
/// The host mutates the flags between [`start_update`](Self::start_update)
/// and [`end_update`](Self::end_update) while holding its own lock; the
/// version counter goes odd for the duration. Worker tasks never block on
/// the map: they sample the version before and after reading flags, and if
/// either sample is odd or the two disagree they still produce output but
/// tag the result as transient.
pub struct SelectionMap {
    version: AtomicI32,
    flags: Box<[AtomicU8]>,
}

impl SelectionMap {
    pub fn new(item_cnt: usize) -> SelectionMap {
        SelectionMap {
            version: AtomicI32::new(0),
            flags: (0..item_cnt).map(|_| AtomicU8::new(1)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn version(&self) -> i32 {
        self.version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_enabled(&self, item_id: i32) -> bool {
        self.flags[item_id as usize].load(Ordering::Relaxed) != 0
    }

    /// Host write path; bracket with start/end update.
    pub fn set_enabled(&self, item_id: usize, enabled: bool) {
        self.flags[item_id].store(enabled as u8, Ordering::Relaxed);
    }

    /// Marks an update in progress: the version becomes odd.
    pub fn start_update(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Publishes the new (even) version.
    pub fn end_update(&self, new_version: i32) {
        debug_assert_eq!(new_version & 1, 0, "published versions are even");
        self.version.store(new_version, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_all_enabled_at_version_zero() {
        let sm = SelectionMap::new(3);
        assert_eq!(sm.len(), 3);
        assert_eq!(sm.version(), 0);
        assert!((0..3).all(|i| sm.is_enabled(i)));
    }

    #[test]
    fn update_protocol_goes_odd_then_even() {
        let sm = SelectionMap::new(2);
        sm.start_update();
        assert_eq!(sm.version() & 1, 1);
        sm.set_enabled(0, false);
        sm.end_update(2);
        assert_eq!(sm.version(), 2);
        assert!(!sm.is_enabled(0));
        assert!(sm.is_enabled(1));
    }
}
