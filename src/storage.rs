//! Local object storage.
//!
//! The store only needs create/read/update/delete by key from the node it runs on;
//! how objects are laid out is the adapter's business. Buckets are namespaces of objects.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} does not exist")]
    NotFound(String),

    /// Names must be non-empty and must not contain path separators or `..`
    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The storage adapter a replica applies data-plane requests to.
pub trait Storage: Send + Sync {
    fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Deleting a bucket that does not exist succeeds
    fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Fails with [StorageError::AlreadyExists] if the key exists.
    /// A missing bucket is created on the fly.
    fn create_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError>;

    fn read_object(&self, bucket: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Fails with [StorageError::NotFound] if the key does not exist
    fn update_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError>;

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    fn bucket_exists(&self, bucket: &str) -> bool;
}

pub(crate) fn validate_name(name: &str) -> Result<&str, StorageError> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}
