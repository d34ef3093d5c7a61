pub mod store;

pub use store::SqliteBlobStore;
