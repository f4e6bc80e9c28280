pub mod index_write;

pub use index_write::{ExecutionError, IndexWriter};
