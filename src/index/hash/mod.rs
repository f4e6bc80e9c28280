pub mod error;
pub mod hasher;
pub mod table;

pub use error::HashTableError;
pub use hasher::{DefaultKeyHasher, IdentityKeyHasher, KeyHasher};
pub use table::{ExtendibleHashTable, MAX_BUCKET_DEPTH};
