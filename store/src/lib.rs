mod diskstore;
mod error;

pub use diskstore::DiskStore;
pub use error::StoreError;
