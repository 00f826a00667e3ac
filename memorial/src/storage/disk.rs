use super::{ObjectStore, StoredObject};
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Buckets as directories below a root. Only buckets created up front exist.
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    root: PathBuf,
    public_base: String,
}

impl DiskObjectStore {
    /// Create the store and one directory per bucket.
    pub async fn open<P: AsRef<Path>>(
        root: P,
        buckets: &[String],
        public_base: &str,
    ) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        for b in buckets {
            fs::create_dir_all(root.join(b)).await?;
        }
        Ok(Self {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve an object to its file, refusing names that escape the bucket.
    pub fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf, GatewayError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let rel = Path::new(name);
        if name.is_empty()
            || !rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("invalid object name {:?}", name),
            });
        }
        Ok(bucket_dir.join(rel))
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, GatewayError> {
        if bucket.is_empty() || bucket.contains(['/', '\\', '.']) {
            return Err(GatewayError::NotFound(format!("bucket {}", bucket)));
        }
        let dir = self.root.join(bucket);
        if !dir.is_dir() {
            return Err(GatewayError::NotFound(format!("bucket {}", bucket)));
        }
        Ok(dir)
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StoredObject>, GatewayError> {
        let dir = match prefix {
            Some(p) => self.object_path(bucket, p)?,
            None => self.bucket_dir(bucket)?,
        };
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // an unknown group folder is simply empty
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && prefix.is_some() => {
                return Ok(out)
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file = entry.file_name().to_string_lossy().into_owned();
            let name = match prefix {
                Some(p) => format!("{}/{}", p, file),
                None => file,
            };
            out.push(StoredObject { name });
        }
        Ok(out)
    }

    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), GatewayError> {
        let path = self.object_path(bucket, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/{}/{}", self.public_base, bucket, name)
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<(), GatewayError> {
        for name in names {
            let path = self.object_path(bucket, name)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(tmp: &tempfile::TempDir) -> DiskObjectStore {
        DiskObjectStore::open(tmp.path(), &["images".to_string()], "http://localhost:8790/")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_list_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(&tmp).await;
        s.upload("images", "1_a.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();
        s.upload("images", "family/2_b.png", Bytes::from_static(b"y"), "image/png")
            .await
            .unwrap();
        let root = s.list("images", None).await.unwrap();
        assert_eq!(root, vec![StoredObject { name: "1_a.png".into() }]);
        let grouped = s.list("images", Some("family")).await.unwrap();
        assert_eq!(grouped[0].name, "family/2_b.png");
        assert!(s.list("images", Some("nobody")).await.unwrap().is_empty());
        assert_eq!(
            s.public_url("images", "1_a.png"),
            "http://localhost:8790/storage/images/1_a.png"
        );
        s.remove("images", &["1_a.png".to_string()]).await.unwrap();
        assert!(s.list("images", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn names_are_unique_and_contained() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(&tmp).await;
        s.upload("images", "1_a.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();
        assert!(matches!(
            s.upload("images", "1_a.png", Bytes::from_static(b"x"), "image/png")
                .await,
            Err(GatewayError::Conflict(_))
        ));
        assert!(s.object_path("images", "../secret").is_err());
        assert!(matches!(
            s.list("gallary_images", None).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
