//! Guestbook feed controller.
//!
//! Holds one viewer's ordered tributes and, per tribute, the comments known
//! so far and the state of its comment form. Local state only changes after
//! the matching remote call has succeeded.

use crate::auth::Access;
use crate::error::{MemorialError, Result};
use crate::model::{Comment, RecordId, Tribute};
use crate::notice::{Notice, Notices};
use crate::storage::{object_name, BucketChain, ImageUpload, ObjectStore};
use crate::store::{now_millis, Records};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormState {
    #[default]
    Hidden,
    Open,
}

/// Per-tribute state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    /// Oldest first.
    pub comments: Vec<Comment>,
    /// Whether `comments` reflects a full fetch from the store.
    pub loaded: bool,
    pub form: FormState,
}

impl Thread {
    fn insert_sorted(&mut self, comment: Comment) {
        let key = (comment.created_at, comment.id);
        let at = self
            .comments
            .partition_point(|c| (c.created_at, c.id) <= key);
        self.comments.insert(at, comment);
    }
}

/// What the feed is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Unloaded,
    Live(Vec<Tribute>),
    /// Fixed local sample shown when the store is empty or unreachable. It is
    /// never written back.
    Degraded(Vec<Tribute>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Unloaded,
    Live,
    Degraded,
}

/// Illustrative entries for degraded mode. Ids are negative so they can never
/// collide with store ids.
pub fn sample_tributes() -> Vec<Tribute> {
    vec![
        Tribute {
            id: -1,
            author_name: "The Department".into(),
            message: "More than a leader: a mentor, friend and inspiration to all who had the privilege of working with them.".into(),
            image_url: String::new(),
            created_at: 1_700_000_300_000,
        },
        Tribute {
            id: -2,
            author_name: "A former student".into(),
            message: "Thank you for believing in us before we believed in ourselves. Rest well.".into(),
            image_url: String::new(),
            created_at: 1_700_000_200_000,
        },
        Tribute {
            id: -3,
            author_name: "A colleague".into(),
            message: "Two decades of dedicated service. Your legacy lives on in every mind you inspired.".into(),
            image_url: String::new(),
            created_at: 1_700_000_100_000,
        },
    ]
}

pub struct GuestbookFeed {
    records: Records,
    objects: Arc<dyn ObjectStore>,
    buckets: BucketChain,
    max_upload_bytes: u64,
    feed: Feed,
    threads: HashMap<RecordId, Thread>,
    notices: Notices,
    reveal: Option<RecordId>,
}

impl GuestbookFeed {
    pub fn new(
        records: Records,
        objects: Arc<dyn ObjectStore>,
        buckets: BucketChain,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            records,
            objects,
            buckets,
            max_upload_bytes,
            feed: Feed::Unloaded,
            threads: HashMap::new(),
            notices: Notices::default(),
            reveal: None,
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn mode(&self) -> Mode {
        match self.feed {
            Feed::Unloaded => Mode::Unloaded,
            Feed::Live(_) => Mode::Live,
            Feed::Degraded(_) => Mode::Degraded,
        }
    }

    pub fn tributes(&self) -> &[Tribute] {
        match &self.feed {
            Feed::Unloaded => &[],
            Feed::Live(t) | Feed::Degraded(t) => t,
        }
    }

    pub fn thread(&self, tribute_id: RecordId) -> Option<&Thread> {
        self.threads.get(&tribute_id)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    /// The tribute the view should scroll to, consumed once read.
    pub fn take_reveal(&mut self) -> Option<RecordId> {
        self.reveal.take()
    }

    /// Fetch all tributes newest first. Never fails: an empty or unreachable
    /// store switches the feed to the sample set.
    pub async fn load_feed(&mut self) -> Mode {
        match self.records.list_tributes().await {
            Ok(tributes) if !tributes.is_empty() => {
                let mut threads = HashMap::with_capacity(tributes.len());
                for t in &tributes {
                    let form = self.threads.get(&t.id).map(|th| th.form).unwrap_or_default();
                    threads.insert(
                        t.id,
                        Thread {
                            form,
                            ..Thread::default()
                        },
                    );
                }
                self.threads = threads;
                self.feed = Feed::Live(tributes);
            }
            Ok(_) => {
                tracing::info!("guestbook is empty, showing sample entries");
                self.notices
                    .info("No tributes yet. Showing example entries until the first one is shared.");
                self.enter_degraded();
            }
            Err(e) => {
                tracing::error!(error = %e, "loading tributes failed");
                self.notices
                    .error("Failed to load guestbook entries. Showing example entries.");
                self.enter_degraded();
            }
        }
        self.mode()
    }

    fn enter_degraded(&mut self) {
        let sample = sample_tributes();
        self.threads = sample
            .iter()
            .map(|t| {
                (
                    t.id,
                    Thread {
                        loaded: true,
                        ..Thread::default()
                    },
                )
            })
            .collect();
        self.feed = Feed::Degraded(sample);
    }

    /// Load the feed and every tribute's comments, as the moderation view does.
    pub async fn load_feed_with_comments(&mut self) -> Mode {
        if self.load_feed().await != Mode::Live {
            return self.mode();
        }
        let records = self.records.clone();
        let ids: Vec<RecordId> = self.tributes().iter().map(|t| t.id).collect();
        let fetched = futures::future::join_all(ids.iter().map(|id| records.list_comments(*id))).await;
        for (id, result) in ids.into_iter().zip(fetched) {
            match result {
                Ok(comments) => {
                    let thread = self.threads.entry(id).or_default();
                    thread.comments = comments;
                    thread.loaded = true;
                }
                Err(e) => {
                    tracing::warn!(tribute = id, error = %e, "loading comments failed");
                }
            }
        }
        self.mode()
    }

    /// Fetch one tribute's comments, oldest first.
    pub async fn load_comments(&mut self, tribute_id: RecordId) -> Result<&[Comment]> {
        match self.feed {
            Feed::Live(_) => {}
            Feed::Degraded(_) => {
                return Ok(self.thread(tribute_id).map(|t| t.comments.as_slice()).unwrap_or(&[]))
            }
            Feed::Unloaded => return Err(MemorialError::NotFound("tribute".into())),
        }
        self.require_live_tribute(tribute_id)?;
        match self.records.list_comments(tribute_id).await {
            Ok(comments) => {
                let thread = self.threads.entry(tribute_id).or_default();
                thread.comments = comments;
                thread.loaded = true;
                Ok(&thread.comments)
            }
            Err(e) => {
                tracing::error!(tribute = tribute_id, error = %e, "loading comments failed");
                self.notices.error("Failed to load comments");
                Err(e.into())
            }
        }
    }

    fn require_live_tribute(&self, tribute_id: RecordId) -> Result<()> {
        match &self.feed {
            Feed::Live(tributes) if tributes.iter().any(|t| t.id == tribute_id) => Ok(()),
            Feed::Degraded(tributes) if tributes.iter().any(|t| t.id == tribute_id) => {
                Err(MemorialError::Degraded)
            }
            _ => Err(MemorialError::NotFound(format!("tribute {}", tribute_id))),
        }
    }

    fn required(&mut self, author_name: &str, message: &str) -> Result<(String, String)> {
        let author = author_name.trim();
        let message = message.trim();
        if author.is_empty() || message.is_empty() {
            self.notices.error("Please fill in all fields");
            return Err(MemorialError::validation("name and message are required"));
        }
        Ok((author.to_string(), message.to_string()))
    }

    /// Post a new tribute, uploading its image first when one is attached.
    pub async fn submit_tribute(
        &mut self,
        author_name: &str,
        message: &str,
        image: Option<ImageUpload>,
    ) -> Result<Tribute> {
        let (author, message) = self.required(author_name, message)?;
        let image = match image.map(|i| i.validate(self.max_upload_bytes)).transpose() {
            Ok(image) => image,
            Err(e) => {
                self.notices.error(e.to_string());
                return Err(e);
            }
        };

        let mut uploaded = None;
        let mut image_url = String::new();
        if let Some(image) = image {
            let name = object_name(now_millis(), &author, &image.ext, Some("tributes"));
            match self.buckets.upload(self.objects.as_ref(), &name, &image).await {
                Ok(bucket) => {
                    image_url = self.objects.public_url(&bucket, &name);
                    uploaded = Some((bucket, name));
                }
                Err(e) => {
                    tracing::error!(error = %e, "tribute image upload failed");
                    self.notices.error("Failed to upload image");
                    return Err(e.into());
                }
            }
        }

        let tribute = match self
            .records
            .insert_tribute(&author, &message, &image_url)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "inserting tribute failed");
                self.notices.error("Failed to submit tribute");
                if let Some((bucket, name)) = uploaded {
                    if let Err(e) = self.objects.remove(&bucket, &[name]).await {
                        tracing::warn!(error = %e, "removing orphaned tribute image failed");
                    }
                }
                return Err(e.into());
            }
        };

        if let Feed::Live(tributes) = &mut self.feed {
            tributes.retain(|t| t.id != tribute.id);
            tributes.insert(0, tribute.clone());
        } else if self.mode() == Mode::Degraded {
            // samples may be hiding stored tributes, so swap them for the real feed
            self.load_feed().await;
        }
        // an unloaded feed has nothing to prepend to; the next load picks it up
        if let Feed::Live(tributes) = &self.feed {
            if tributes.iter().any(|t| t.id == tribute.id) {
                self.threads.entry(tribute.id).or_default().loaded = true;
                self.reveal = Some(tribute.id);
            }
        }
        tracing::info!(tribute = tribute.id, "tribute added");
        self.notices.success("Your tribute has been added");
        Ok(tribute)
    }

    pub fn open_comment_form(&mut self, tribute_id: RecordId) -> Result<()> {
        self.require_live_tribute(tribute_id)?;
        self.threads.entry(tribute_id).or_default().form = FormState::Open;
        Ok(())
    }

    pub fn cancel_comment_form(&mut self, tribute_id: RecordId) -> Result<()> {
        if let Some(thread) = self.threads.get_mut(&tribute_id) {
            thread.form = FormState::Hidden;
            Ok(())
        } else {
            Err(MemorialError::NotFound(format!("tribute {}", tribute_id)))
        }
    }

    /// Add a comment to a tribute. On success the comment joins the local
    /// thread and the form closes.
    pub async fn submit_comment(
        &mut self,
        tribute_id: RecordId,
        author_name: &str,
        message: &str,
    ) -> Result<Comment> {
        let (author, message) = self.required(author_name, message)?;
        self.require_live_tribute(tribute_id)?;
        match self
            .records
            .insert_comment(tribute_id, &author, &message)
            .await
        {
            Ok(comment) => {
                let thread = self.threads.entry(tribute_id).or_default();
                thread.insert_sorted(comment.clone());
                thread.form = FormState::Hidden;
                self.notices.success("Your comment has been added");
                Ok(comment)
            }
            Err(e) => {
                tracing::error!(tribute = tribute_id, error = %e, "inserting comment failed");
                self.notices.error("Failed to add comment");
                Err(e.into())
            }
        }
    }

    /// Moderator only. Comments go first; if that fails the tribute stays.
    pub async fn delete_tribute(&mut self, access: &Access, tribute_id: RecordId) -> Result<()> {
        let moderator = access.require_moderator()?.email.clone();
        self.require_live_tribute(tribute_id)?;

        if let Err(e) = self.records.delete_comments_for(tribute_id).await {
            tracing::error!(tribute = tribute_id, error = %e, "deleting comments failed");
            self.notices.error("Failed to delete associated comments");
            return Err(e.into());
        }
        if let Some(thread) = self.threads.get_mut(&tribute_id) {
            thread.comments.clear();
            thread.loaded = true;
        }

        if let Err(e) = self.records.delete_tribute(tribute_id).await {
            tracing::error!(tribute = tribute_id, error = %e, "deleting tribute failed");
            self.notices.error("Failed to delete tribute");
            return Err(e.into());
        }
        if let Feed::Live(tributes) = &mut self.feed {
            tributes.retain(|t| t.id != tribute_id);
        }
        self.threads.remove(&tribute_id);
        tracing::info!(tribute = tribute_id, moderator = %moderator, "tribute deleted");
        self.notices.success("Tribute deleted successfully");
        Ok(())
    }

    /// Moderator only.
    pub async fn delete_comment(
        &mut self,
        access: &Access,
        tribute_id: RecordId,
        comment_id: RecordId,
    ) -> Result<()> {
        let moderator = access.require_moderator()?.email.clone();
        self.require_live_tribute(tribute_id)?;
        match self.records.delete_comment(tribute_id, comment_id).await {
            Ok(0) => {
                tracing::warn!(
                    tribute = tribute_id,
                    comment = comment_id,
                    "no such comment on tribute"
                );
                self.notices.error("Failed to delete comment");
                return Err(MemorialError::NotFound(format!(
                    "comment {} on tribute {}",
                    comment_id, tribute_id
                )));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(comment = comment_id, error = %e, "deleting comment failed");
                self.notices.error("Failed to delete comment");
                return Err(e.into());
            }
        }
        if let Some(thread) = self.threads.get_mut(&tribute_id) {
            thread.comments.retain(|c| c.id != comment_id);
        }
        tracing::info!(comment = comment_id, moderator = %moderator, "comment deleted");
        self.notices.success("Comment deleted successfully");
        Ok(())
    }

    /// Serializable snapshot for the presentation layer.
    pub fn view(&self) -> FeedView {
        FeedView {
            mode: self.mode(),
            degraded: self.mode() == Mode::Degraded,
            tributes: self
                .tributes()
                .iter()
                .map(|t| {
                    let thread = self.threads.get(&t.id).cloned().unwrap_or_default();
                    TributeView {
                        comment_count: thread.comments.len(),
                        tribute: t.clone(),
                        comments: thread.comments,
                        comments_loaded: thread.loaded,
                        form: thread.form,
                    }
                })
                .collect(),
            reveal: self.reveal,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TributeView {
    #[serde(flatten)]
    pub tribute: Tribute,
    pub comments: Vec<Comment>,
    pub comment_count: usize,
    pub comments_loaded: bool,
    pub form: FormState,
}

#[derive(Debug, Serialize)]
pub struct FeedView {
    pub mode: Mode,
    pub degraded: bool,
    pub tributes: Vec<TributeView>,
    pub reveal: Option<RecordId>,
}
