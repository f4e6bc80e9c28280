use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use cinderdb::index::hash::{ExtendibleHashTable, IdentityKeyHasher};
use cinderdb::storage::buffer::BufferPoolManager;
use cinderdb::transaction::concurrency::{LockManager, TransactionManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a hash table whose hasher maps a key to its own low bits, so
// tests can steer which bucket a key lands in
#[allow(dead_code)]
pub fn create_test_hash_table(
    pool_size: usize,
) -> Result<(
    Arc<ExtendibleHashTable<IdentityKeyHasher>>,
    Arc<BufferPoolManager>,
    NamedTempFile,
)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let table = Arc::new(ExtendibleHashTable::with_hasher(
        buffer_pool.clone(),
        IdentityKeyHasher,
    ));
    Ok((table, buffer_pool, file))
}

// Create a transaction manager wired to a lock manager
#[allow(dead_code)]
pub fn create_test_lock_manager() -> (Arc<TransactionManager>, Arc<LockManager>) {
    let txn_manager = Arc::new(TransactionManager::new());
    let lock_manager = Arc::new(LockManager::new(txn_manager.clone()));
    (txn_manager, lock_manager)
}
