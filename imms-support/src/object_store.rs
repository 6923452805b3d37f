//! The object store that holds incoming batch files (`SOURCE_BUCKET_NAME`),
//! the ACK files written back to submitters (`ACK_BUCKET_NAME`), and the
//! reference-data config (`CONFIG_BUCKET_NAME`). The real provider (S3 or
//! equivalent) is out of scope; this trait is the narrow surface the batch
//! pipeline actually needs.

use hashbrown::HashMap;
use miette::Diagnostic;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ObjectStoreError {
    #[error("object {0} not found")]
    NotFound(ObjectKey),

    #[error("object store request timed out after {attempts} attempt(s)")]
    Unhandled { attempts: u32 },
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &ObjectKey, body: Vec<u8>) -> Result<(), ObjectStoreError>;

    fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, ObjectStoreError>;

    /// Lists keys under `bucket` whose key starts with `prefix`, in no
    /// particular order. Used by the orchestrator's watchdog sweep and by
    /// tests, never on the row-processing hot path.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
}

/// An in-memory object store standing in for the sandbox fixture server:
/// production deployments point `imms-pipeline` and `imms-api` at a real
/// provider; this implementation is what unit and integration tests in this
/// workspace run against.
#[derive(Default)]
pub struct LocalObjectStore {
    objects: Mutex<HashMap<ObjectKey, Vec<u8>>>,
}

impl LocalObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &ObjectKey, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .expect("object store mutex poisoned")
            .insert(key.clone(), body);
        Ok(())
    }

    fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .lock()
            .expect("object store mutex poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.clone()))
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .lock()
            .expect("object store mutex poisoned")
            .keys()
            .filter(|k| k.bucket == bucket && k.key.starts_with(prefix))
            .map(|k| k.key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_object() {
        let store = LocalObjectStore::new();
        let key = ObjectKey::new("source", "FLU_Vaccinations_V5_X26_20250101T120000.csv");
        store.put(&key, b"hello".to_vec()).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"hello");
    }

    #[test]
    fn missing_object_is_not_found() {
        let store = LocalObjectStore::new();
        let key = ObjectKey::new("source", "missing.csv");
        assert!(matches!(
            store.get(&key),
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_filters_by_bucket_and_prefix() {
        let store = LocalObjectStore::new();
        store
            .put(&ObjectKey::new("ack", "ack/a.csv"), vec![])
            .unwrap();
        store
            .put(&ObjectKey::new("ack", "other/b.csv"), vec![])
            .unwrap();
        store
            .put(&ObjectKey::new("source", "ack/c.csv"), vec![])
            .unwrap();

        let listed = store.list("ack", "ack/");
        assert_eq!(listed.unwrap(), vec!["ack/a.csv".to_string()]);
    }
}
