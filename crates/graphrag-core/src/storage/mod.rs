pub mod kv_store;
pub mod vector_store;

pub use kv_store::{KvStore, SledKvStore};
pub use vector_store::{LanceVectorStore, VectorStore, VectorStoreStatus};

