//! Gallery feed controller: bucket listings, uploads and moderation.

use crate::auth::Access;
use crate::error::{GatewayError, MemorialError, Result};
use crate::model::{GalleryImage, ImageGroup};
use crate::notice::{Notice, Notices};
use crate::storage::{
    caption_from_name, group_from_name, object_name, sanitize_group, timestamp_from_name,
    BucketChain, ImageUpload, ObjectStore, PLACEHOLDER_URL,
};
use crate::store::{now_millis, Records};
use serde::Serialize;
use std::sync::Arc;

pub struct GalleryFeed {
    records: Records,
    objects: Arc<dyn ObjectStore>,
    buckets: BucketChain,
    max_upload_bytes: u64,
    visitor_uploads: bool,
    images: Vec<GalleryImage>,
    groups: Vec<ImageGroup>,
    filter: Option<String>,
    unavailable: bool,
    notices: Notices,
}

#[derive(Debug, Serialize)]
pub struct GalleryView {
    pub images: Vec<GalleryImage>,
    pub groups: Vec<ImageGroup>,
    pub group: Option<String>,
    /// Every bucket listing failed; `images` is empty as a result.
    pub unavailable: bool,
}

fn newest_first(images: &mut [GalleryImage]) {
    images.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
}

impl GalleryFeed {
    pub fn new(
        records: Records,
        objects: Arc<dyn ObjectStore>,
        buckets: BucketChain,
        max_upload_bytes: u64,
        visitor_uploads: bool,
    ) -> Self {
        Self {
            records,
            objects,
            buckets,
            max_upload_bytes,
            visitor_uploads,
            images: Vec::new(),
            groups: Vec::new(),
            filter: None,
            unavailable: false,
            notices: Notices::default(),
        }
    }

    pub fn images(&self) -> &[GalleryImage] {
        &self.images
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    fn image(&self, bucket: &str, name: &str) -> GalleryImage {
        GalleryImage {
            name: name.to_string(),
            bucket: bucket.to_string(),
            url: self.objects.public_url(bucket, name),
            fallback_url: PLACEHOLDER_URL,
            caption: caption_from_name(name),
            group: group_from_name(name),
            created_at: timestamp_from_name(name),
        }
    }

    async fn list_bucket(&self, bucket: &str, prefixes: &[Option<String>]) -> Result<Vec<GalleryImage>, GatewayError> {
        let mut out = Vec::new();
        for prefix in prefixes {
            for object in self.objects.list(bucket, prefix.as_deref()).await? {
                out.push(self.image(bucket, &object.name));
            }
        }
        Ok(out)
    }

    /// List images from every candidate bucket, newest first. Storage
    /// failures leave an empty gallery flagged unavailable rather than an
    /// error, but only when no bucket could be listed at all.
    pub async fn list(&mut self, group: Option<&str>) -> &[GalleryImage] {
        let group = group.map(sanitize_group).filter(|g| !g.is_empty());
        let prefixes: Vec<Option<String>> = match &group {
            Some(g) => vec![Some(g.clone())],
            None => {
                // the unfiltered view also shows every known group folder
                if self.groups.is_empty() {
                    if let Ok(groups) = self.records.list_image_groups().await {
                        self.groups = groups;
                    }
                }
                let mut p = vec![None];
                p.extend(
                    self.groups
                        .iter()
                        .map(|g| sanitize_group(&g.name))
                        .filter(|g| !g.is_empty())
                        .map(Some),
                );
                p.dedup();
                p
            }
        };

        let mut images = Vec::new();
        let mut any_ok = false;
        for bucket in self.buckets.attempts() {
            match self.list_bucket(&bucket, &prefixes).await {
                Ok(listed) => {
                    any_ok = true;
                    images.extend(listed);
                }
                Err(e) => {
                    tracing::warn!(bucket = %bucket, error = %e, "listing bucket failed");
                }
            }
        }

        self.filter = group;
        newest_first(&mut images);
        self.images = images;
        self.unavailable = !any_ok;
        if self.unavailable {
            tracing::error!("no storage bucket could be listed");
            self.notices.error("Unable to load images right now");
        }
        &self.images
    }

    /// Upload an image. Visitors may only upload when the deployment allows it.
    pub async fn upload(
        &mut self,
        access: &Access,
        file: ImageUpload,
        caption: Option<&str>,
        group: Option<&str>,
    ) -> Result<GalleryImage> {
        if !self.visitor_uploads {
            access.require_moderator()?;
        }
        let image = match file.validate(self.max_upload_bytes) {
            Ok(image) => image,
            Err(e) => {
                self.notices.error(e.to_string());
                return Err(e);
            }
        };
        let name = object_name(now_millis(), caption.unwrap_or_default(), &image.ext, group);
        let bucket = match self.buckets.upload(self.objects.as_ref(), &name, &image).await {
            Ok(bucket) => bucket,
            Err(e) => {
                tracing::error!(error = %e, "gallery upload failed");
                self.notices.error("Failed to upload image");
                return Err(e.into());
            }
        };
        let uploaded = self.image(&bucket, &name);
        if self.filter.is_none() || self.filter == uploaded.group {
            self.images.push(uploaded.clone());
            newest_first(&mut self.images);
        }
        tracing::info!(bucket = %bucket, name = %name, "image uploaded");
        self.notices.success("Image uploaded successfully");
        Ok(uploaded)
    }

    /// Moderator only.
    pub async fn delete(&mut self, access: &Access, bucket: &str, name: &str) -> Result<()> {
        let moderator = access.require_moderator()?.email.clone();
        if !self.buckets.contains(bucket) {
            return Err(MemorialError::NotFound(format!("bucket {}", bucket)));
        }
        if let Err(e) = self.objects.remove(bucket, &[name.to_string()]).await {
            tracing::error!(bucket = %bucket, name = %name, error = %e, "deleting image failed");
            self.notices.error("Failed to delete image");
            return Err(e.into());
        }
        self.images.retain(|i| !(i.bucket == bucket && i.name == name));
        tracing::info!(bucket = %bucket, name = %name, moderator = %moderator, "image deleted");
        self.notices.success("Image deleted successfully");
        Ok(())
    }

    pub async fn groups(&mut self) -> Result<&[ImageGroup]> {
        match self.records.list_image_groups().await {
            Ok(groups) => {
                self.groups = groups;
                Ok(&self.groups)
            }
            Err(e) => {
                tracing::error!(error = %e, "loading image groups failed");
                self.notices.error("Failed to load groups");
                Err(e.into())
            }
        }
    }

    /// Moderator only.
    pub async fn create_group(&mut self, access: &Access, name: &str) -> Result<ImageGroup> {
        access.require_moderator()?;
        let name = name.trim();
        if sanitize_group(name).is_empty() {
            self.notices.error("Please enter a group name");
            return Err(MemorialError::validation("group name is required"));
        }
        match self.records.insert_image_group(name).await {
            Ok(group) => {
                self.groups.push(group.clone());
                self.notices.success("Group created");
                Ok(group)
            }
            Err(e) => {
                tracing::error!(error = %e, "creating image group failed");
                self.notices.error("Failed to create group");
                Err(e.into())
            }
        }
    }

    pub fn view(&self) -> GalleryView {
        GalleryView {
            images: self.images.clone(),
            groups: self.groups.clone(),
            group: self.filter.clone(),
            unavailable: self.unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;
    use crate::storage::memory::{MemoryObjectStore, StorageOp};
    use crate::store::memory::MemoryRecordStore;
    use bytes::Bytes;

    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00";

    fn buckets() -> Vec<String> {
        vec!["images".to_string(), "gallary_images".to_string()]
    }

    fn gallery(visitor_uploads: bool) -> (Arc<MemoryObjectStore>, GalleryFeed) {
        let objects = Arc::new(MemoryObjectStore::recording(&buckets()));
        let feed = GalleryFeed::new(
            Records::new(Arc::new(MemoryRecordStore::new())),
            objects.clone(),
            BucketChain::new(buckets()),
            5 * 1024 * 1024,
            visitor_uploads,
        );
        (objects, feed)
    }

    fn moderator() -> Access {
        Access::Moderator(User {
            id: "m".into(),
            email: "mod@example.org".into(),
            role: Some("admin".into()),
        })
    }

    fn gif() -> ImageUpload {
        ImageUpload {
            file_name: Some("pic.gif".into()),
            content_type: Some("image/gif".into()),
            data: Bytes::from_static(GIF),
        }
    }

    async fn put(objects: &MemoryObjectStore, bucket: &str, name: &str) {
        objects
            .upload(bucket, name, Bytes::from_static(GIF), "image/gif")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lists_newest_first_with_fallback_bucket() {
        let (objects, mut g) = gallery(false);
        put(&objects, "gallary_images", "1000_old_one.gif").await;
        put(&objects, "gallary_images", "3000_newest.gif").await;
        put(&objects, "gallary_images", "2000_middle.gif").await;
        let names: Vec<_> = g.list(None).await.iter().map(|i| i.name.clone()).collect();
        assert_eq!(names, ["3000_newest.gif", "2000_middle.gif", "1000_old_one.gif"]);
        let first = &g.images()[0];
        assert_eq!(first.caption.as_deref(), Some("newest"));
        assert_eq!(first.fallback_url, PLACEHOLDER_URL);
        assert_eq!(first.created_at, 3000);

        let lists: Vec<_> = objects
            .calls()
            .into_iter()
            .filter(|(op, _)| *op == StorageOp::List)
            .map(|(_, b)| b)
            .collect();
        assert_eq!(lists, ["images", "gallary_images"]);
    }

    #[tokio::test]
    async fn listing_merges_every_bucket() {
        let (objects, mut g) = gallery(true);
        put(&objects, "images", "1000_old.gif").await;
        objects.deny(StorageOp::Upload, "images");
        let fresh = g.upload(&Access::Visitor, gif(), Some("new"), None).await.unwrap();
        assert_eq!(fresh.bucket, "gallary_images");

        let mut other = GalleryFeed::new(
            Records::new(Arc::new(MemoryRecordStore::new())),
            objects.clone(),
            BucketChain::new(buckets()),
            5 * 1024 * 1024,
            true,
        );
        let listed: Vec<_> = other
            .list(None)
            .await
            .iter()
            .map(|i| (i.bucket.clone(), i.name.clone()))
            .collect();
        assert_eq!(
            listed,
            [
                ("gallary_images".to_string(), fresh.name.clone()),
                ("images".to_string(), "1000_old.gif".to_string()),
            ]
        );
        assert!(!other.is_unavailable());

        objects.deny(StorageOp::List, "images");
        assert_eq!(other.list(None).await.len(), 1);
        assert!(!other.is_unavailable());
    }

    #[tokio::test]
    async fn group_filter_lists_folder() {
        let (objects, mut g) = gallery(false);
        put(&objects, "images", "1000_root.gif").await;
        put(&objects, "images", "family/2000_reunion.gif").await;
        let grouped = g.list(Some("Family")).await;
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].group.as_deref(), Some("family"));
        assert_eq!(g.list(None).await.len(), 1);
        g.create_group(&moderator(), "Family").await.unwrap();
        assert_eq!(g.list(None).await.len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_degrades_to_empty() {
        let (objects, mut g) = gallery(false);
        put(&objects, "images", "1000_a.gif").await;
        objects.deny(StorageOp::List, "images");
        objects.deny(StorageOp::List, "gallary_images");
        assert!(g.list(None).await.is_empty());
        assert!(g.is_unavailable());
        assert_eq!(g.take_notices().len(), 1);
    }

    #[tokio::test]
    async fn upload_requires_moderator_unless_open() {
        let (objects, mut g) = gallery(false);
        assert!(matches!(
            g.upload(&Access::Visitor, gif(), None, None).await,
            Err(MemorialError::Unauthorized)
        ));
        assert!(objects.calls().is_empty());

        let (_, mut open) = gallery(true);
        let img = open.upload(&Access::Visitor, gif(), None, None).await.unwrap();
        assert!(img.name.ends_with("_memorial.gif"));
    }

    #[tokio::test]
    async fn upload_falls_back_and_remembers() {
        let (objects, mut g) = gallery(false);
        objects.deny(StorageOp::Upload, "images");
        let img = g
            .upload(&moderator(), gif(), Some("Grandma's garden"), Some("Family Days"))
            .await
            .unwrap();
        assert_eq!(img.bucket, "gallary_images");
        assert_eq!(img.group.as_deref(), Some("family-days"));
        assert!(img.name.contains("_Grandmas_garden."));
        assert_eq!(g.images().len(), 1);

        objects.allow(StorageOp::Upload, "images");
        let second = g.upload(&moderator(), gif(), None, None).await.unwrap();
        assert_eq!(second.bucket, "gallary_images");
    }

    #[tokio::test]
    async fn invalid_upload_makes_no_call() {
        let (objects, mut g) = gallery(true);
        let bad = ImageUpload {
            file_name: Some("notes.txt".into()),
            content_type: Some("text/plain".into()),
            data: Bytes::from_static(b"hello"),
        };
        assert!(g.upload(&Access::Visitor, bad, None, None).await.is_err());
        assert!(objects.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_is_moderated() {
        let (objects, mut g) = gallery(false);
        put(&objects, "images", "1000_a.gif").await;
        g.list(None).await;
        assert!(g.delete(&Access::Visitor, "images", "1000_a.gif").await.is_err());
        assert!(matches!(
            g.delete(&moderator(), "elsewhere", "1000_a.gif").await,
            Err(MemorialError::NotFound(_))
        ));
        objects.deny(StorageOp::Remove, "images");
        assert!(g.delete(&moderator(), "images", "1000_a.gif").await.is_err());
        assert_eq!(g.images().len(), 1);
        objects.allow(StorageOp::Remove, "images");
        g.delete(&moderator(), "images", "1000_a.gif").await.unwrap();
        assert!(g.images().is_empty());
        assert!(objects.object_names("images").is_empty());
    }

    #[tokio::test]
    async fn groups_round_trip_through_store() {
        let (_, mut g) = gallery(false);
        assert!(g.create_group(&moderator(), "   ").await.is_err());
        assert!(g.create_group(&Access::Visitor, "Family").await.is_err());
        g.create_group(&moderator(), "Family").await.unwrap();
        let groups = g.groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Family");
    }
}
