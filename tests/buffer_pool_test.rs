use anyhow::Result;

mod common;
use common::{create_temp_db_file, create_test_buffer_pool};

use cinderdb::common::types::INVALID_PAGE_ID;
use cinderdb::storage::buffer::{BufferPoolError, BufferPoolManager};

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // Ids start at the instance index, which is 0 for an unsharded pool
    assert!(page_id >= 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert_eq!(buffer_pool.pin_count(page_id), Some(1));
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;

    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_pin_count_tracks_fetches() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    let _second = buffer_pool.fetch_page(page_id)?;
    let _third = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(3));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    // A fourth unpin violates the contract
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));

    Ok(())
}

#[test]
fn test_page_modification() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }

    buffer_pool.unpin_page(page_id, true)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;

    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_pool_saturation() -> Result<()> {
    // Three frames, all pinned: the fourth page has nowhere to go
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (_page_a, page_a) = buffer_pool.new_page()?;
    let (_page_b, page_b) = buffer_pool.new_page()?;
    let (_page_c, _page_c_id) = buffer_pool.new_page()?;

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));

    // Unpinning one page makes it the eviction candidate
    buffer_pool.unpin_page(page_a, false)?;

    // A resident page is still fetchable without disk traffic
    let fetched_b = buffer_pool.fetch_page(page_b)?;
    assert_eq!(fetched_b.read().page_id, page_b);
    buffer_pool.unpin_page(page_b, false)?;

    let (_page_d, page_d) = buffer_pool.new_page()?;
    assert!(page_d > page_b);

    // A was evicted to make room
    assert_eq!(buffer_pool.pin_count(page_a), None);

    Ok(())
}

#[test]
fn test_dirty_eviction_flush() -> Result<()> {
    // A single frame forces every new page to evict the previous one
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (page1, page1_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page1.write();
        page_guard.data = [0xAA; cinderdb::common::types::PAGE_SIZE];
    }
    buffer_pool.unpin_page(page1_id, true)?;

    // Evicts page 1, which must be flushed on the way out
    let (_page2, page2_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page2_id, false)?;

    let fetched = buffer_pool.fetch_page(page1_id)?;
    {
        let page_guard = fetched.read();
        assert!(page_guard.data.iter().all(|&b| b == 0xAA));
    }
    buffer_pool.unpin_page(page1_id, false)?;

    Ok(())
}

#[test]
fn test_clean_unpin_preserves_dirty_flag() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0x5A;
    }
    buffer_pool.unpin_page(page_id, true)?;

    // A later clean reader must not wash out the pending write-back
    let _again = buffer_pool.fetch_page(page_id)?;
    buffer_pool.unpin_page(page_id, false)?;

    let (_other, other_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(other_id, false)?;

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().data[0], 0x5A);
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }

    buffer_pool.unpin_page(page_id, true)?;
    buffer_pool.flush_page(page_id)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;

    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data For Flushing";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }

    buffer_pool.unpin_page(page_id, false)?;

    // Flushing a page that was never resident is a contract violation
    assert!(matches!(
        buffer_pool.flush_page(page_id + 1000),
        Err(BufferPoolError::PageNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = buffer_pool.new_page()?;

        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }

        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;

        {
            let page_guard = fetched_page.read();
            let expected_data = format!("Test Data {}", i).into_bytes();
            assert_eq!(
                &page_guard.data[100..100 + expected_data.len()],
                expected_data.as_slice()
            );
        }

        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Deleting while pinned fails
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), None);

    // Deleting a page that is not resident succeeds
    buffer_pool.delete_page(page_id)?;

    let (new_page, new_page_id) = buffer_pool.new_page()?;
    {
        let page_guard = new_page.read();
        assert_eq!(page_guard.page_id, new_page_id);
    }
    buffer_pool.unpin_page(new_page_id, false)?;

    Ok(())
}

#[test]
fn test_invalid_page_id_is_rejected_not_fatal() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    assert!(matches!(
        buffer_pool.fetch_page(INVALID_PAGE_ID),
        Err(BufferPoolError::InvalidPageId(_))
    ));
    assert!(matches!(
        buffer_pool.unpin_page(INVALID_PAGE_ID, true),
        Err(BufferPoolError::InvalidPageId(_))
    ));
    assert!(matches!(
        buffer_pool.flush_page(INVALID_PAGE_ID),
        Err(BufferPoolError::InvalidPageId(_))
    ));

    // The sentinel is never resident, and deleting a non-resident page
    // succeeds
    buffer_pool.delete_page(INVALID_PAGE_ID)?;

    Ok(())
}

#[test]
fn test_flush_of_pinned_page_does_not_block_the_pool() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0x42;
    }

    // Still pinned: the flush pins alongside, writes, and leaves the
    // caller's pin intact
    buffer_pool.flush_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    buffer_pool.unpin_page(page_id, false)?;

    // Fill the pool and allocate once more: the clean page is evicted
    // without a write-back, so the read below only sees 0x42 because the
    // flush already put it on disk
    for _ in 0..3 {
        let (_other, other_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(other_id, false)?;
    }
    assert_eq!(buffer_pool.pin_count(page_id), None);

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().data[0], 0x42);
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_frame_bookkeeping_invariant() -> Result<()> {
    // Every frame is free, pinned, or tracked by the replacer
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    assert_eq!(buffer_pool.replacer_size(), 0);

    let mut page_ids = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }
    // All pinned: nothing replaceable
    assert_eq!(buffer_pool.replacer_size(), 0);

    for &page_id in &page_ids {
        buffer_pool.unpin_page(page_id, false)?;
    }
    assert_eq!(buffer_pool.replacer_size(), 3);

    let _page = buffer_pool.fetch_page(page_ids[0])?;
    assert_eq!(buffer_pool.replacer_size(), 2);
    buffer_pool.unpin_page(page_ids[0], false)?;

    Ok(())
}

#[test]
fn test_sharded_allocation() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;

    let shard0 = BufferPoolManager::new_sharded(4, 2, 0, &path)?;
    let shard1 = BufferPoolManager::new_sharded(4, 2, 1, &path)?;

    let (_, a) = shard0.new_page()?;
    let (_, b) = shard0.new_page()?;
    let (_, c) = shard1.new_page()?;
    let (_, d) = shard1.new_page()?;

    assert_eq!(a % 2, 0);
    assert_eq!(b % 2, 0);
    assert_eq!(c % 2, 1);
    assert_eq!(d % 2, 1);
    assert_eq!(b, a + 2);
    assert_eq!(d, c + 2);

    Ok(())
}

#[test]
#[should_panic(expected = "does not belong to instance")]
fn test_fetch_foreign_page_panics() {
    let (_file, path) = create_temp_db_file().unwrap();
    let shard0 = BufferPoolManager::new_sharded(4, 2, 0, &path).unwrap();
    // Page 1 belongs to shard 1
    let _ = shard0.fetch_page(1);
}
