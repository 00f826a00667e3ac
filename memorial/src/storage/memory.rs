use super::{ObjectStore, StoredObject};
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    List,
    Upload,
    Remove,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BTreeMap<String, Bytes>>,
    denied: HashSet<(StorageOp, String)>,
    recording: bool,
    calls: Vec<(StorageOp, String)>,
}

/// Object store held in memory, with per-bucket access denial for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
    public_base: String,
}

impl MemoryObjectStore {
    pub fn new(buckets: &[String]) -> Self {
        let store = Self {
            inner: Mutex::default(),
            public_base: "memory://".into(),
        };
        {
            let mut inner = store.inner.lock();
            for b in buckets {
                inner.buckets.insert(b.clone(), BTreeMap::new());
            }
        }
        store
    }

    /// Like [`new`](Self::new), but every call is logged for [`calls`](Self::calls).
    pub fn recording(buckets: &[String]) -> Self {
        let store = Self::new(buckets);
        store.inner.lock().recording = true;
        store
    }

    /// Make `op` against `bucket` fail as if access were denied.
    pub fn deny(&self, op: StorageOp, bucket: &str) {
        self.inner.lock().denied.insert((op, bucket.to_string()));
    }

    pub fn allow(&self, op: StorageOp, bucket: &str) {
        self.inner.lock().denied.remove(&(op, bucket.to_string()));
    }

    pub fn calls(&self) -> Vec<(StorageOp, String)> {
        self.inner.lock().calls.clone()
    }

    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        self.inner
            .lock()
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn begin(
        &self,
        op: StorageOp,
        bucket: &str,
    ) -> Result<parking_lot::MutexGuard<'_, Inner>, GatewayError> {
        let mut guard = self.inner.lock();
        if guard.recording {
            guard.calls.push((op, bucket.to_string()));
        }
        if guard.denied.contains(&(op, bucket.to_string())) {
            return Err(GatewayError::Rejected {
                status: 403,
                message: format!("access to bucket {} denied", bucket),
            });
        }
        if !guard.buckets.contains_key(bucket) {
            return Err(GatewayError::NotFound(format!("bucket {}", bucket)));
        }
        Ok(guard)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StoredObject>, GatewayError> {
        let guard = self.begin(StorageOp::List, bucket)?;
        let objects = guard.buckets.get(bucket).map(|b| {
            b.keys()
                .filter(|name| match (prefix, name.rsplit_once('/')) {
                    (Some(p), Some((folder, _))) => folder == p,
                    (None, None) => true,
                    _ => false,
                })
                .map(|name| StoredObject { name: name.clone() })
                .collect()
        });
        Ok(objects.unwrap_or_default())
    }

    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), GatewayError> {
        let mut guard = self.begin(StorageOp::Upload, bucket)?;
        let objects = guard.buckets.entry(bucket.to_string()).or_default();
        if objects.contains_key(name) {
            return Err(GatewayError::Conflict(name.to_string()));
        }
        objects.insert(name.to_string(), data);
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}{}/{}", self.public_base, bucket, name)
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<(), GatewayError> {
        let mut guard = self.begin(StorageOp::Remove, bucket)?;
        if let Some(objects) = guard.buckets.get_mut(bucket) {
            for n in names {
                objects.remove(n);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denial_and_listing() {
        let store = MemoryObjectStore::recording(&["images".to_string()]);
        store
            .upload("images", "g/1_a.png", Bytes::from_static(b"a"), "image/png")
            .await
            .unwrap();
        store
            .upload("images", "2_b.png", Bytes::from_static(b"b"), "image/png")
            .await
            .unwrap();
        assert_eq!(store.list("images", None).await.unwrap().len(), 1);
        assert_eq!(store.list("images", Some("g")).await.unwrap()[0].name, "g/1_a.png");
        store.deny(StorageOp::List, "images");
        assert!(store.list("images", None).await.is_err());
        assert!(store.list("other", None).await.is_err());
        assert_eq!(store.calls().len(), 6);
    }

    #[tokio::test]
    async fn plain_store_keeps_no_call_log() {
        let store = MemoryObjectStore::new(&["images".to_string()]);
        for i in 0..20 {
            store
                .upload("images", &format!("{}_a.png", i), Bytes::from_static(b"a"), "image/png")
                .await
                .unwrap();
            store.list("images", None).await.unwrap();
        }
        assert!(store.calls().is_empty());
        assert_eq!(store.object_names("images").len(), 20);
    }
}
