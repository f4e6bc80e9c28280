use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU page replacement policy over the unpinned frames of the pool.
///
/// Order runs from least recently unpinned (front) to most recently
/// unpinned (back); a frame re-enters the order only when its pin count
/// drops to zero, so a duplicate unpin never reorders it.
pub struct LRUReplacer {
    inner: Mutex<LinkedHashMap<FrameId, ()>>,
    capacity: usize,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Evict the least recently unpinned frame, if any
    pub fn victim(&self) -> Option<FrameId> {
        let mut frames = self.inner.lock();
        frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A frame was pinned: it is no longer a replacement candidate.
    /// Idempotent; pinning an untracked frame is a no-op.
    pub fn pin(&self, frame_id: FrameId) {
        let mut frames = self.inner.lock();
        frames.remove(&frame_id);
    }

    /// A frame's pin count reached zero: it becomes the most recent
    /// replacement candidate. Already-tracked frames keep their position,
    /// and nothing is inserted beyond capacity.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut frames = self.inner.lock();
        if frames.contains_key(&frame_id) {
            return;
        }
        if frames.len() >= self.capacity {
            return;
        }
        frames.insert(frame_id, ());
    }

    /// Number of frames currently eligible for replacement
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }
}
