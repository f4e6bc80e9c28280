use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, guarded by the pool latch
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn vacant() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// Pool metadata under the coarse latch. Disk I/O happens while this is
/// held; page payloads live behind `PagePtr` so client page latches never
/// nest inside it.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    frames: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// Buffer pool manager: a fixed set of frames caching disk pages, with
/// pin/unpin reference counting and LRU eviction.
///
/// Instances can be sharded: each of `num_instances` peers owns the page
/// ids congruent to its `instance_index`, and allocates ids by stepping
/// the counter in `num_instances` strides.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    replacer: LRUReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        Self::new_sharded(pool_size, 1, 0, db_path)
    }

    /// Create one shard of a parallel buffer pool
    pub fn new_sharded(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "a pool must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index must fall within the pool"
        );

        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        // Initially every frame is free
        for frame_id in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta::vacant());
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                frames,
                next_page_id: instance_index as PageId,
            }),
            replacer: LRUReplacer::new(pool_size),
            disk_manager,
        })
    }

    /// Allocate a fresh, zeroed, pinned page
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        // Fail before burning a page id if every frame is pinned
        let frame_id = self.find_victim(&mut state)?;
        let page_id = Self::allocate_page_id(&mut state, self.num_instances);

        let page_ptr = &self.pages[frame_id];
        {
            let mut page = page_ptr.write();
            page.reset();
            page.page_id = page_id;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((page_ptr.clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.validate_page_id(page_id);

        let mut state = self.state.lock();

        // Fast path: already resident
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.find_victim(&mut state)?;

        {
            let mut page = self.pages[frame_id].write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(self.pages[frame_id].clone())
    }

    /// Drop one pin on a page, recording whether the caller wrote to it.
    ///
    /// The dirty flag only ever ORs in: a clean unpin after a dirty one
    /// must not lose the pending write-back.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.validate_page_id(page_id);

        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let meta = &mut state.frames[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page's current contents to disk, regardless of the dirty
    /// flag, and mark it clean. The page stays resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.validate_page_id(page_id);

        loop {
            let frame_id = {
                let state = self.state.lock();
                match state.page_table.get(&page_id) {
                    Some(&frame_id) => frame_id,
                    None => return Err(BufferPoolError::PageNotFound(page_id)),
                }
            };

            // The page can be evicted between the lookup and the flush
            // pinning its frame; look it up again when that happens
            if self.flush_frame(page_id, frame_id)? {
                return Ok(());
            }
        }
    }

    /// Write back every resident dirty page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let dirty: Vec<(PageId, FrameId)> = {
            let state = self.state.lock();
            state
                .page_table
                .iter()
                .filter(|&(_, &frame_id)| state.frames[frame_id].is_dirty)
                .map(|(&page_id, &frame_id)| (page_id, frame_id))
                .collect()
        };

        for (page_id, frame_id) in dirty {
            // A page evicted since the scan was already written back by
            // the eviction, so a stale pair is simply skipped
            self.flush_frame(page_id, frame_id)?;
        }

        Ok(())
    }

    /// Drop a page from the pool and return its frame to the free list.
    ///
    /// Deleting a non-resident page succeeds; deleting a pinned page
    /// fails. Page ids are not recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        // The sentinel names no page, and no page means nothing to delete
        if page_id < 0 {
            return Ok(());
        }
        self.validate_page_id(page_id);

        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        if state.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if state.frames[frame_id].is_dirty {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }

        state.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        state.frames[frame_id] = FrameMeta::vacant();
        self.pages[frame_id].write().reset();
        state.free_list.push_back(frame_id);

        Ok(())
    }

    /// Current pin count of a resident page, for assertions and tests
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id].pin_count)
    }

    /// Number of frames eligible for replacement
    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Write one resident page to disk without holding the pool latch
    /// across the page-latch acquisition. Returns false when the page was
    /// evicted before the flush could pin it.
    ///
    /// The frame is pinned for the duration so it cannot be victimized,
    /// and the dirty bit is cleared before the write: a writer racing past
    /// the flush re-dirties the page through its own unpin, so a pending
    /// write-back is never lost.
    fn flush_frame(&self, page_id: PageId, frame_id: FrameId) -> Result<bool, BufferPoolError> {
        {
            let mut state = self.state.lock();
            if state.page_table.get(&page_id) != Some(&frame_id) {
                return Ok(false);
            }
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            state.frames[frame_id].is_dirty = false;
        }

        let result = {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(&page)
        };

        let mut state = self.state.lock();
        let meta = &mut state.frames[frame_id];
        meta.pin_count -= 1;
        if result.is_err() {
            // The write never happened; put the pending write-back back
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        drop(state);

        result?;
        Ok(true)
    }

    /// Find a frame to hold a page: free list first, then eviction.
    /// Evicting flushes the outgoing page when dirty and removes it from
    /// the page table. Fails when every frame is pinned.
    fn find_victim(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.victim() {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let evicted_page_id = state.frames[frame_id].page_id;
        if state.frames[frame_id].is_dirty {
            // The victim is unpinned, so no client holds its latch
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }
        debug!("evicting page {} from frame {}", evicted_page_id, frame_id);
        state.page_table.remove(&evicted_page_id);

        Ok(frame_id)
    }

    fn allocate_page_id(state: &mut PoolState, num_instances: u32) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += num_instances as PageId;
        page_id
    }

    fn validate_page_id(&self, page_id: PageId) {
        assert!(
            page_id >= 0 && page_id as u32 % self.num_instances == self.instance_index,
            "page {} does not belong to instance {}/{}",
            page_id,
            self.instance_index,
            self.num_instances
        );
    }
}
