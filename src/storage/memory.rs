use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use super::{validate_name, Storage, StorageError};

type Buckets = HashMap<String, HashMap<String, String>>;

/// A volatile [Storage], handy for tests and for nodes that do not need durability.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<Buckets>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        // A panic while holding the lock cannot leave the maps half-written
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets().get(bucket).map(|b| b.len()).unwrap_or(0)
    }
}

impl Storage for MemoryStorage {
    fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let bucket = validate_name(bucket)?;
        let mut buckets = self.buckets();
        if buckets.contains_key(bucket) {
            return Err(StorageError::AlreadyExists(format!("bucket {}", bucket)));
        }
        buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.buckets().remove(validate_name(bucket)?);
        Ok(())
    }

    fn create_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let (bucket, key) = (validate_name(bucket)?, validate_name(key)?);
        let mut buckets = self.buckets();
        let objects = buckets.entry(bucket.to_string()).or_default();
        if objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(format!("object {}/{}", bucket, key)));
        }
        objects.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<Option<String>, StorageError> {
        let (bucket, key) = (validate_name(bucket)?, validate_name(key)?);
        Ok(self
            .buckets()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned())
    }

    fn update_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let (bucket, key) = (validate_name(bucket)?, validate_name(key)?);
        match self
            .buckets()
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
        {
            Some(existing) => {
                *existing = value.to_string();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("object {}/{}", bucket, key))),
        }
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let (bucket, key) = (validate_name(bucket)?, validate_name(key)?);
        self.buckets()
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("object {}/{}", bucket, key)))
    }

    fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets().contains_key(bucket)
    }
}
