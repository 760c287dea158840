use std::sync::Arc;

use crate::{
    storage::{Storage, StorageError},
    transport::{Acknowledgement, Request, SessionId},
};

/// Applies `request` to the local store on the blocking pool, so storage adapters may do
/// synchronous file IO without stalling the runtime.
pub(crate) async fn apply(
    storage: Arc<dyn Storage>,
    session: SessionId,
    request: Request,
) -> Acknowledgement {
    let request_type = request.request_type();
    let key = request.routing_key().to_string();
    match tokio::task::spawn_blocking(move || apply_to(storage.as_ref(), session, &request)).await {
        Ok(ack) => ack,
        Err(e) => {
            log::error!("{:?} {} could not be applied locally: {}", request_type, key, e);
            Acknowledgement {
                session,
                request_type,
                key,
                replicas: 1,
                success: false,
                value: None,
            }
        }
    }
}

/// Applies `request` to `storage` and builds the acknowledgement reporting it.
///
/// Storage failures are not errors here: they are logged and acknowledged with `success = false`.
/// A read succeeds only if the object exists.
fn apply_to(storage: &dyn Storage, session: SessionId, request: &Request) -> Acknowledgement {
    let result: Result<Option<String>, StorageError> = match request {
        Request::BucketCreate { bucket } => storage.create_bucket(bucket).map(|_| None),
        Request::BucketDelete { bucket } => storage.delete_bucket(bucket).map(|_| None),
        Request::ObjectCreate { bucket, key, value } => {
            storage.create_object(bucket, key, value).map(|_| None)
        }
        Request::ObjectRead { bucket, key } => {
            storage.read_object(bucket, key).and_then(|value| {
                value
                    .map(Some)
                    .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
            })
        }
        Request::ObjectUpdate { bucket, key, value } => {
            storage.update_object(bucket, key, value).map(|_| None)
        }
        Request::ObjectDelete { bucket, key } => storage.delete_object(bucket, key).map(|_| None),
    };

    let (success, value) = match result {
        Ok(value) => (true, value),
        Err(e) => {
            log::warn!(
                "{:?} {} failed locally: {}",
                request.request_type(),
                request.routing_key(),
                e
            );
            (false, None)
        }
    };

    Acknowledgement {
        session,
        request_type: request.request_type(),
        key: request.routing_key().to_string(),
        replicas: 1,
        success,
        value,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{apply, apply_to};
    use crate::{
        storage::{FileStorage, MemoryStorage, Storage},
        transport::{MessageType, Request},
    };

    fn create(key: &str, value: &str) -> Request {
        Request::ObjectCreate {
            bucket: "b1".into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[test]
    fn acknowledgements_carry_the_session_and_the_routing_key() {
        let storage = MemoryStorage::default();
        let ack = apply_to(&storage, 77, &create("k1", "v1"));
        assert_eq!(ack.session, 77);
        assert_eq!(ack.request_type, MessageType::ObjectCreate);
        assert_eq!(ack.key, "k1");
        assert_eq!(ack.replicas, 1);
        assert!(ack.success);
        assert!(storage.bucket_exists("b1"));
    }

    #[test]
    fn storage_failures_are_acknowledged_as_failures() {
        let storage = MemoryStorage::default();
        assert!(apply_to(&storage, 1, &create("k1", "v1")).success);
        assert!(!apply_to(&storage, 2, &create("k1", "v2")).success);

        let update = Request::ObjectUpdate {
            bucket: "b1".into(),
            key: "missing".into(),
            value: "v".into(),
        };
        assert!(!apply_to(&storage, 3, &update).success);
    }

    #[test]
    fn reads_return_the_stored_value() {
        let storage = MemoryStorage::default();
        apply_to(&storage, 1, &create("k1", "v1"));

        let read = |key: &str| Request::ObjectRead {
            bucket: "b1".into(),
            key: key.into(),
        };
        let found = apply_to(&storage, 2, &read("k1"));
        assert!(found.success);
        assert_eq!(found.value.as_deref(), Some("v1"));

        let missing = apply_to(&storage, 3, &read("k2"));
        assert!(!missing.success);
        assert_eq!(missing.value, None);
    }

    #[test]
    fn bucket_requests_route_by_bucket_name() {
        let storage = MemoryStorage::default();
        let ack = apply_to(
            &storage,
            4,
            &Request::BucketCreate {
                bucket: "photos".into(),
            },
        );
        assert_eq!(ack.key, "photos");
        assert!(ack.success);
        assert!(storage.bucket_exists("photos"));
    }

    #[tokio::test]
    async fn file_storage_is_applied_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()));

        let ack = apply(Arc::clone(&storage), 9, create("k1", "v1")).await;
        assert!(ack.success);
        assert_eq!(ack.session, 9);

        let read = apply(
            Arc::clone(&storage),
            10,
            Request::ObjectRead {
                bucket: "b1".into(),
                key: "k1".into(),
            },
        )
        .await;
        assert_eq!(read.value.as_deref(), Some("v1"));
        assert!(dir.path().join("b1").join("k1").is_file());
    }
}
