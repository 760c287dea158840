use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use super::{validate_name, Storage, StorageError};

/// Stores each bucket as a directory under `root`, and each object as a file in its bucket directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_name(bucket)?))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.bucket_path(bucket)?.join(validate_name(key)?))
    }
}

impl Storage for FileStorage {
    fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&self.root)?;
        match fs::create_dir(&path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(format!("bucket {}", bucket)))
            }
            other => Ok(other?),
        }
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let path = self.bucket_path(bucket)?;
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    fn create_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        fs::create_dir_all(self.bucket_path(bucket)?)?;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(format!("object {}/{}", bucket, key)))
            }
            other => other?,
        };
        file.write_all(value.as_bytes())?;
        Ok(())
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.object_path(bucket, key)?) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(format!("object {}/{}", bucket, key)));
        }
        fs::write(path, value)?;
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.object_path(bucket, key)?) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("object {}/{}", bucket, key)))
            }
            other => Ok(other?),
        }
    }

    fn bucket_exists(&self, bucket: &str) -> bool {
        self.bucket_path(bucket)
            .map(|path| path.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::FileStorage;
    use crate::storage::{Storage, StorageError};

    #[test]
    fn bucket_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.create_bucket("photos").unwrap();
        assert!(storage.bucket_exists("photos"));
        assert!(matches!(
            storage.create_bucket("photos"),
            Err(StorageError::AlreadyExists(_))
        ));

        storage.delete_bucket("photos").unwrap();
        assert!(!storage.bucket_exists("photos"));
        storage.delete_bucket("photos").unwrap();
    }

    #[test]
    fn object_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.create_object("photos", "cat", "meow").unwrap();
        assert!(storage.bucket_exists("photos"));
        assert!(matches!(
            storage.create_object("photos", "cat", "purr"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(
            storage.read_object("photos", "cat").unwrap().as_deref(),
            Some("meow")
        );

        storage.update_object("photos", "cat", "purr").unwrap();
        assert_eq!(
            storage.read_object("photos", "cat").unwrap().as_deref(),
            Some("purr")
        );

        storage.delete_object("photos", "cat").unwrap();
        assert_eq!(storage.read_object("photos", "cat").unwrap(), None);
        assert!(matches!(
            storage.update_object("photos", "cat", "meow"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete_object("photos", "cat"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("data"));
        assert!(matches!(
            storage.create_object("..", "passwd", "x"),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            storage.read_object("photos", "../../passwd"),
            Err(StorageError::InvalidName(_))
        ));
    }
}
