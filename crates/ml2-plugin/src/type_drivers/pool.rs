//! Segmentation id pool shared by the pooled type drivers.

use ml2_types::SegmentationId;
use std::collections::BTreeSet;

/// Free/used bookkeeping for one id space.
///
/// Only allocated ids are stored; free ids are derived from the configured
/// ranges, so very wide ranges (a full VNI space) cost nothing up front.
/// Ids outside every range can still be reserved by provider networks;
/// they are forgotten again on release.
#[derive(Debug, Clone, Default)]
pub struct IdPool {
    ranges: Vec<(SegmentationId, SegmentationId)>,
    allocated: BTreeSet<SegmentationId>,
}

impl IdPool {
    pub fn new(ranges: Vec<(SegmentationId, SegmentationId)>) -> Self {
        Self {
            ranges,
            allocated: BTreeSet::new(),
        }
    }

    pub fn ranges(&self) -> &[(SegmentationId, SegmentationId)] {
        &self.ranges
    }

    pub fn in_ranges(&self, id: SegmentationId) -> bool {
        self.ranges.iter().any(|&(min, max)| (min..=max).contains(&id))
    }

    pub fn is_allocated(&self, id: SegmentationId) -> bool {
        self.allocated.contains(&id)
    }

    /// Marks `id` as used. Returns false if it already was.
    pub fn reserve(&mut self, id: SegmentationId) -> bool {
        self.allocated.insert(id)
    }

    /// Takes the lowest free id of the first range that has one.
    pub fn pop(&mut self) -> Option<SegmentationId> {
        let id = self.first_free()?;
        self.allocated.insert(id);
        Some(id)
    }

    /// Returns `id` to the pool. Returns false if it was not allocated.
    pub fn release(&mut self, id: SegmentationId) -> bool {
        self.allocated.remove(&id)
    }

    /// Replaces the allocation state with `live` ids.
    pub fn sync(&mut self, live: impl IntoIterator<Item = SegmentationId>) {
        self.allocated = live.into_iter().collect();
    }

    /// Number of free ids across all ranges.
    pub fn free_count(&self) -> u64 {
        let mut total = 0u64;
        for &(min, max) in &self.ranges {
            let size = u64::from(max) - u64::from(min) + 1;
            let used = self.allocated.range(min..=max).count() as u64;
            total += size - used;
        }
        total
    }

    fn first_free(&self) -> Option<SegmentationId> {
        for &(min, max) in &self.ranges {
            let mut candidate = u64::from(min);
            for &used in self.allocated.range(min..=max) {
                if u64::from(used) != candidate {
                    break;
                }
                candidate += 1;
            }
            if candidate <= u64::from(max) {
                return SegmentationId::try_from(candidate).ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pop_in_order() {
        let mut pool = IdPool::new(vec![(100, 102)]);
        assert_eq!(pool.pop(), Some(100));
        assert_eq!(pool.pop(), Some(101));
        assert_eq!(pool.pop(), Some(102));
        assert_eq!(pool.pop(), None);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_pop_fills_gaps() {
        let mut pool = IdPool::new(vec![(1, 5)]);
        assert!(pool.reserve(1));
        assert!(pool.reserve(2));
        assert!(pool.reserve(4));
        assert_eq!(pool.pop(), Some(3));
        assert_eq!(pool.pop(), Some(5));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn test_ranges_tried_in_configured_order() {
        let mut pool = IdPool::new(vec![(500, 500), (10, 11)]);
        assert_eq!(pool.pop(), Some(500));
        assert_eq!(pool.pop(), Some(10));
    }

    #[test]
    fn test_reserve_twice_fails() {
        let mut pool = IdPool::new(vec![(1, 10)]);
        assert!(pool.reserve(7));
        assert!(!pool.reserve(7));
        // outside any range
        assert!(pool.reserve(4000));
        assert!(!pool.reserve(4000));
        assert!(!pool.in_ranges(4000));
    }

    #[test]
    fn test_release_returns_id() {
        let mut pool = IdPool::new(vec![(100, 100)]);
        assert_eq!(pool.pop(), Some(100));
        assert!(pool.release(100));
        assert!(!pool.release(100));
        assert_eq!(pool.pop(), Some(100));
    }

    #[test]
    fn test_full_width_range() {
        let mut pool = IdPool::new(vec![(u32::MAX - 1, u32::MAX)]);
        assert_eq!(pool.pop(), Some(u32::MAX - 1));
        assert_eq!(pool.pop(), Some(u32::MAX));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn test_sync_replaces_state() {
        let mut pool = IdPool::new(vec![(1, 3)]);
        pool.pop();
        pool.sync([2, 3]);
        assert!(!pool.is_allocated(1));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.pop(), Some(1));
    }
}
