use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{IndexKey, PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::hash::error::HashTableError;
use crate::index::hash::hasher::{DefaultKeyHasher, KeyHasher};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::bucket_page::BucketPage;
use crate::storage::page::directory_page::{DirectoryPage, MAX_GLOBAL_DEPTH};

/// Ceiling on any bucket's local depth; a bucket already at this depth
/// refuses to split
pub const MAX_BUCKET_DEPTH: u32 = MAX_GLOBAL_DEPTH;

/// Disk-resident extendible hash index mapping keys to record ids.
///
/// One directory page plus one page per bucket, all addressed through the
/// buffer pool. The table latch serializes structural changes (splits and
/// merges take it in write mode) while point operations take it in read
/// mode and rely on per-bucket page latches.
pub struct ExtendibleHashTable<H: KeyHasher = DefaultKeyHasher> {
    buffer_pool: Arc<BufferPoolManager>,
    table_latch: RwLock<()>,
    // Holds INVALID_PAGE_ID until first use; the mutex is also the
    // initialization latch, so the directory is created exactly once.
    directory_page_id: Mutex<PageId>,
    hasher: H,
}

impl ExtendibleHashTable<DefaultKeyHasher> {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::with_hasher(buffer_pool, DefaultKeyHasher)
    }
}

impl<H: KeyHasher> ExtendibleHashTable<H> {
    pub fn with_hasher(buffer_pool: Arc<BufferPoolManager>, hasher: H) -> Self {
        Self {
            buffer_pool,
            table_latch: RwLock::new(()),
            directory_page_id: Mutex::new(INVALID_PAGE_ID),
            hasher,
        }
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: IndexKey) -> Result<Vec<Rid>, HashTableError> {
        let _table = self.table_latch.read();
        let (_dir_ptr, dir) = self.fetch_directory()?;

        let bucket_idx = self.key_to_index(key, &dir);
        let bucket_page_id = dir.bucket_page_id(bucket_idx);
        let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

        let values = {
            let page = bucket_ptr.read();
            BucketPage::from_page(&page).get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(dir.page_id(), false)?;
        Ok(values)
    }

    /// Insert a (key, value) pair.
    ///
    /// Returns `Ok(false)` when the exact pair is already present or the
    /// key's bucket cannot split any further. A full bucket triggers a
    /// split and a retry.
    pub fn insert(&self, key: IndexKey, value: Rid) -> Result<bool, HashTableError> {
        {
            let _table = self.table_latch.read();
            let (_dir_ptr, dir) = self.fetch_directory()?;

            let bucket_idx = self.key_to_index(key, &dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut page = bucket_ptr.write();
                let mut bucket = BucketPage::from_page(&page);
                if !bucket.is_full() {
                    let inserted = bucket.insert(key, value);
                    if inserted {
                        bucket.write_to(&mut page);
                    }
                    drop(page);
                    self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                    self.buffer_pool.unpin_page(dir.page_id(), false)?;
                    return Ok(inserted);
                }
            }

            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
            // Table read latch drops here; the split re-acquires in write mode
        }
        self.split_insert(key, value)
    }

    /// Split the bucket `key` currently lands in, then retry the insert.
    ///
    /// Doubles the directory when the bucket already discriminates every
    /// global bit. Entries are redistributed by rehashing under the
    /// deepened local mask.
    fn split_insert(&self, key: IndexKey, value: Rid) -> Result<bool, HashTableError> {
        {
            let _table = self.table_latch.write();
            let (dir_ptr, mut dir) = self.fetch_directory()?;

            let split_idx = self.key_to_index(key, &dir);
            let split_depth = dir.local_depth(split_idx);

            if split_depth >= MAX_BUCKET_DEPTH {
                self.buffer_pool.unpin_page(dir.page_id(), false)?;
                return Ok(false);
            }

            if split_depth == dir.global_depth() {
                dir.incr_global_depth();
            }
            dir.incr_local_depth(split_idx);
            let new_depth = dir.local_depth(split_idx);

            let split_page_id = dir.bucket_page_id(split_idx);
            let split_ptr = self.buffer_pool.fetch_page(split_page_id)?;

            // A fresh zeroed page is an empty bucket
            let (image_ptr, image_page_id) = self.buffer_pool.new_page()?;
            let image_idx = dir.split_image_index(split_idx);

            // Point every slot in the split family at the old bucket and
            // every slot in the image family at the new one
            let mask = dir.local_depth_mask(split_idx) as usize;
            for i in 0..dir.size() {
                if i & mask == split_idx & mask {
                    dir.set_bucket_page_id(i, split_page_id);
                    dir.set_local_depth(i, new_depth);
                } else if i & mask == image_idx & mask {
                    dir.set_bucket_page_id(i, image_page_id);
                    dir.set_local_depth(i, new_depth);
                }
            }

            {
                let mut split_page = split_ptr.write();
                let entries = BucketPage::from_page(&split_page).entries();

                let mut split_bucket = BucketPage::new();
                let mut image_bucket = BucketPage::new();
                for (k, v) in entries {
                    let target_idx = self.hash(k) as usize & mask;
                    if dir.bucket_page_id(target_idx) == split_page_id {
                        split_bucket.insert(k, v);
                    } else {
                        image_bucket.insert(k, v);
                    }
                }

                split_bucket.write_to(&mut split_page);
                let mut image_page = image_ptr.write();
                image_bucket.write_to(&mut image_page);
            }

            {
                let mut dir_page = dir_ptr.write();
                dir.write_to(&mut dir_page);
            }

            debug!(
                "split bucket page {} into image page {} at local depth {}",
                split_page_id, image_page_id, new_depth
            );

            self.buffer_pool.unpin_page(split_page_id, true)?;
            self.buffer_pool.unpin_page(image_page_id, true)?;
            self.buffer_pool.unpin_page(dir.page_id(), true)?;
        }
        // The key's bucket may still be full if every entry rehashed with it
        self.insert(key, value)
    }

    /// Remove the exact (key, value) pair. An emptied bucket is offered to
    /// `merge`.
    pub fn remove(&self, key: IndexKey, value: Rid) -> Result<bool, HashTableError> {
        let removed;
        let now_empty;
        let bucket_idx;
        {
            let _table = self.table_latch.read();
            let (_dir_ptr, dir) = self.fetch_directory()?;

            bucket_idx = self.key_to_index(key, &dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut page = bucket_ptr.write();
                let mut bucket = BucketPage::from_page(&page);
                removed = bucket.remove(key, value);
                if removed {
                    bucket.write_to(&mut page);
                }
                now_empty = bucket.is_empty();
            }

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
        }

        if now_empty {
            self.merge(bucket_idx)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// as far as it will go.
    ///
    /// The decision to merge was made without the write latch, so every
    /// precondition is re-checked here and the merge silently backs off
    /// when the world has moved on.
    fn merge(&self, target_idx: usize) -> Result<(), HashTableError> {
        let _table = self.table_latch.write();
        let (dir_ptr, mut dir) = self.fetch_directory()?;

        // The directory may have shrunk below the remembered index
        if target_idx >= dir.size() {
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
            return Ok(());
        }

        let local_depth = dir.local_depth(target_idx);
        if local_depth == 0 {
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
            return Ok(());
        }

        // Only buckets whose split image sits at the same depth can fold
        let image_idx = dir.split_image_index(target_idx);
        if dir.local_depth(image_idx) != local_depth {
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
            return Ok(());
        }

        let target_page_id = dir.bucket_page_id(target_idx);

        let still_empty = {
            let target_ptr = self.buffer_pool.fetch_page(target_page_id)?;
            let page = target_ptr.read();
            BucketPage::from_page(&page).is_empty()
        };
        self.buffer_pool.unpin_page(target_page_id, false)?;
        if !still_empty {
            self.buffer_pool.unpin_page(dir.page_id(), false)?;
            return Ok(());
        }

        self.buffer_pool.delete_page(target_page_id)?;

        let image_page_id = dir.bucket_page_id(image_idx);
        dir.set_bucket_page_id(target_idx, image_page_id);
        dir.decr_local_depth(target_idx);
        dir.decr_local_depth(image_idx);

        // Every slot that named either bucket now names the image
        let new_depth = dir.local_depth(target_idx);
        for i in 0..dir.size() {
            let page_id = dir.bucket_page_id(i);
            if page_id == target_page_id || page_id == image_page_id {
                dir.set_bucket_page_id(i, image_page_id);
                dir.set_local_depth(i, new_depth);
            }
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
        }

        {
            let mut dir_page = dir_ptr.write();
            dir.write_to(&mut dir_page);
        }

        debug!(
            "merged bucket page {} into image page {}",
            target_page_id, image_page_id
        );

        self.buffer_pool.unpin_page(dir.page_id(), true)?;
        Ok(())
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();
        let (_dir_ptr, dir) = self.fetch_directory()?;
        let depth = dir.global_depth();
        self.buffer_pool.unpin_page(dir.page_id(), false)?;
        Ok(depth)
    }

    /// Audit the directory invariants; panics on violation
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();
        let (_dir_ptr, dir) = self.fetch_directory()?;
        dir.verify_integrity();
        self.buffer_pool.unpin_page(dir.page_id(), false)?;
        Ok(())
    }

    fn hash(&self, key: IndexKey) -> u32 {
        self.hasher.hash_key(key)
    }

    fn key_to_index(&self, key: IndexKey, dir: &DirectoryPage) -> usize {
        (self.hash(key) & dir.global_depth_mask()) as usize
    }

    /// Pin the directory page, creating it (and bucket zero) on first use
    fn fetch_directory(&self) -> Result<(PagePtr, DirectoryPage), HashTableError> {
        let directory_page_id = {
            let mut guard = self.directory_page_id.lock();
            if *guard == INVALID_PAGE_ID {
                let (dir_ptr, dir_page_id) = self.buffer_pool.new_page()?;
                let (_bucket_ptr, bucket_page_id) = self.buffer_pool.new_page()?;

                let mut dir = DirectoryPage::new(dir_page_id);
                dir.set_bucket_page_id(0, bucket_page_id);
                {
                    let mut page = dir_ptr.write();
                    dir.write_to(&mut page);
                }

                self.buffer_pool.unpin_page(dir_page_id, true)?;
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                *guard = dir_page_id;
            }
            *guard
        };

        let dir_ptr = self.buffer_pool.fetch_page(directory_page_id)?;
        let dir = {
            let page = dir_ptr.read();
            DirectoryPage::from_page(&page)
        };
        Ok((dir_ptr, dir))
    }
}
