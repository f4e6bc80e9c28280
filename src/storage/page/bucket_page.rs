use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{IndexKey, Page, Rid, PAGE_SIZE};

/// Bytes per slot: an 8-byte key and an 8-byte rid
pub const BUCKET_SLOT_SIZE: usize = 16;

/// Slots per bucket, sized so two bitmaps plus the slot array fill the page:
/// each slot costs 8*BUCKET_SLOT_SIZE bits plus one occupied and one
/// readable bit.
pub const BUCKET_CAPACITY: usize = (PAGE_SIZE * 8) / (2 + 8 * BUCKET_SLOT_SIZE);

/// Bytes per bitmap
pub const BUCKET_BITMAP_BYTES: usize = (BUCKET_CAPACITY + 7) / 8;

const OCCUPIED_OFFSET: usize = 0;
const READABLE_OFFSET: usize = BUCKET_BITMAP_BYTES;
const SLOTS_OFFSET: usize = 2 * BUCKET_BITMAP_BYTES;

/// Bucket page of the extendible hash index.
///
/// Layout (little-endian): `[occupied bitmap][readable bitmap][slot array]`.
/// A slot with its occupied bit set but its readable bit clear is a
/// tombstone left by a removal.
pub struct BucketPage {
    occupied: [u8; BUCKET_BITMAP_BYTES],
    readable: [u8; BUCKET_BITMAP_BYTES],
    slots: [(IndexKey, Rid); BUCKET_CAPACITY],
}

impl Default for BucketPage {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketPage {
    pub fn new() -> Self {
        Self {
            occupied: [0; BUCKET_BITMAP_BYTES],
            readable: [0; BUCKET_BITMAP_BYTES],
            slots: [(0, Rid::default()); BUCKET_CAPACITY],
        }
    }

    /// Decode a bucket from a page buffer
    pub fn from_page(page: &Page) -> Self {
        let mut bucket = Self::new();
        bucket
            .occupied
            .copy_from_slice(&page.data[OCCUPIED_OFFSET..OCCUPIED_OFFSET + BUCKET_BITMAP_BYTES]);
        bucket
            .readable
            .copy_from_slice(&page.data[READABLE_OFFSET..READABLE_OFFSET + BUCKET_BITMAP_BYTES]);

        for i in 0..BUCKET_CAPACITY {
            let base = SLOTS_OFFSET + i * BUCKET_SLOT_SIZE;
            let key = LittleEndian::read_u64(&page.data[base..base + 8]);
            let page_id = LittleEndian::read_i32(&page.data[base + 8..base + 12]);
            let slot_num = LittleEndian::read_u32(&page.data[base + 12..base + 16]);
            bucket.slots[i] = (key, Rid::new(page_id, slot_num));
        }

        bucket
    }

    /// Encode this bucket into a page buffer
    pub fn write_to(&self, page: &mut Page) {
        page.data[OCCUPIED_OFFSET..OCCUPIED_OFFSET + BUCKET_BITMAP_BYTES]
            .copy_from_slice(&self.occupied);
        page.data[READABLE_OFFSET..READABLE_OFFSET + BUCKET_BITMAP_BYTES]
            .copy_from_slice(&self.readable);

        for i in 0..BUCKET_CAPACITY {
            let base = SLOTS_OFFSET + i * BUCKET_SLOT_SIZE;
            let (key, rid) = self.slots[i];
            LittleEndian::write_u64(&mut page.data[base..base + 8], key);
            LittleEndian::write_i32(&mut page.data[base + 8..base + 12], rid.page_id);
            LittleEndian::write_u32(&mut page.data[base + 12..base + 16], rid.slot_num);
        }
    }

    /// Collect the values stored under `key`
    pub fn get_value(&self, key: IndexKey) -> Vec<Rid> {
        let mut result = Vec::new();
        for i in 0..BUCKET_CAPACITY {
            if self.is_readable(i) && self.slots[i].0 == key {
                result.push(self.slots[i].1);
            }
        }
        result
    }

    /// Insert a pair into the first reusable slot.
    ///
    /// Returns false when the exact (key, value) pair is already present
    /// or no slot is free. Tombstoned slots are reused.
    pub fn insert(&mut self, key: IndexKey, value: Rid) -> bool {
        let mut available = None;
        for i in 0..BUCKET_CAPACITY {
            if self.is_readable(i) {
                if self.slots[i] == (key, value) {
                    return false;
                }
            } else if available.is_none() {
                available = Some(i);
            }
        }

        let slot = match available {
            Some(slot) => slot,
            None => return false,
        };

        self.slots[slot] = (key, value);
        self.set_occupied(slot);
        self.set_readable(slot);
        true
    }

    /// Remove the exact (key, value) pair, leaving a tombstone
    pub fn remove(&mut self, key: IndexKey, value: Rid) -> bool {
        for i in 0..BUCKET_CAPACITY {
            if self.is_readable(i) && self.slots[i] == (key, value) {
                self.remove_at(i);
                return true;
            }
        }
        false
    }

    /// Clear a slot's readable bit; the occupied bit stays set
    pub fn remove_at(&mut self, slot: usize) {
        self.readable[slot / 8] &= !(1 << (slot % 8));
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_occupied(&mut self, slot: usize) {
        self.occupied[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize) {
        self.readable[slot / 8] |= 1 << (slot % 8);
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == BUCKET_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&byte| byte == 0)
    }

    /// Number of live entries
    pub fn num_readable(&self) -> usize {
        let mut count: usize = self
            .readable
            .iter()
            .map(|&byte| byte.count_ones() as usize)
            .sum();
        // Mask off padding bits past the last slot
        let tail = BUCKET_CAPACITY % 8;
        if tail != 0 {
            let padding = self.readable[BUCKET_BITMAP_BYTES - 1] >> tail;
            count -= padding.count_ones() as usize;
        }
        count
    }

    /// Snapshot of the live entries, used when redistributing on a split
    pub fn entries(&self) -> Vec<(IndexKey, Rid)> {
        (0..BUCKET_CAPACITY)
            .filter(|&i| self.is_readable(i))
            .map(|i| self.slots[i])
            .collect()
    }

    /// Clear every slot and both bitmaps
    pub fn reset(&mut self) {
        self.occupied = [0; BUCKET_BITMAP_BYTES];
        self.readable = [0; BUCKET_BITMAP_BYTES];
        self.slots = [(0, Rid::default()); BUCKET_CAPACITY];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn rid(n: u32) -> Rid {
        Rid::new(1, n)
    }

    #[test]
    fn test_insert_and_get() {
        let mut bucket = BucketPage::new();
        assert!(bucket.insert(42, rid(0)));
        assert!(bucket.insert(42, rid(1))); // same key, different value
        assert!(bucket.insert(7, rid(2)));

        assert_eq!(bucket.get_value(42), vec![rid(0), rid(1)]);
        assert_eq!(bucket.get_value(7), vec![rid(2)]);
        assert!(bucket.get_value(99).is_empty());
        assert_eq!(bucket.num_readable(), 3);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut bucket = BucketPage::new();
        assert!(bucket.insert(42, rid(0)));
        assert!(!bucket.insert(42, rid(0)));
        assert_eq!(bucket.num_readable(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut bucket = BucketPage::new();
        assert!(bucket.insert(42, rid(0)));
        assert!(bucket.remove(42, rid(0)));
        assert!(!bucket.remove(42, rid(0)));

        // slot 0 is a tombstone: occupied but no longer readable
        assert!(bucket.is_occupied(0));
        assert!(!bucket.is_readable(0));
        assert!(bucket.is_empty());

        // and it can be reused
        assert!(bucket.insert(8, rid(3)));
        assert!(bucket.is_readable(0));
    }

    #[test]
    fn test_fills_to_capacity() {
        let mut bucket = BucketPage::new();
        for i in 0..BUCKET_CAPACITY {
            assert!(bucket.insert(i as IndexKey, rid(i as u32)));
        }
        assert!(bucket.is_full());
        assert!(!bucket.insert(u64::MAX, rid(0)));

        assert!(bucket.remove(0, rid(0)));
        assert!(!bucket.is_full());
        assert!(bucket.insert(u64::MAX, rid(0)));
        assert!(bucket.is_full());
    }

    #[test]
    fn test_page_round_trip() {
        let mut bucket = BucketPage::new();
        bucket.insert(1, rid(10));
        bucket.insert(2, rid(20));
        bucket.remove(1, rid(10));

        let mut page = Page::new(INVALID_PAGE_ID);
        bucket.write_to(&mut page);
        let decoded = BucketPage::from_page(&page);

        assert!(decoded.get_value(1).is_empty());
        assert_eq!(decoded.get_value(2), vec![rid(20)]);
        assert!(decoded.is_occupied(0));
        assert!(!decoded.is_readable(0));
        assert_eq!(decoded.num_readable(), 1);
    }

    #[test]
    fn test_layout_fills_page_exactly() {
        assert_eq!(BUCKET_CAPACITY, 252);
        assert_eq!(
            2 * BUCKET_BITMAP_BYTES + BUCKET_CAPACITY * BUCKET_SLOT_SIZE,
            PAGE_SIZE
        );
    }
}
