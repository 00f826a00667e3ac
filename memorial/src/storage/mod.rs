//! Object storage contract, image upload validation and object naming.

pub mod disk;
pub mod memory;
pub mod rest;

use crate::error::{GatewayError, MemorialError};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Inline glyph shown in place of an image that fails to load.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24" fill="none" stroke="#9ca3af" stroke-width="1.5"><rect x="3" y="3" width="18" height="18" rx="2"/><circle cx="8.5" cy="8.5" r="1.5"/><path d="M21 15l-5-5L5 21"/></svg>"##;

pub const PLACEHOLDER_URL: &str = "/placeholder.svg";

const MAX_CAPTION_LEN: usize = 60;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

/// An object as reported by a bucket listing. `name` is the full key,
/// including any folder prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Objects directly inside `prefix` (or the bucket root). Sub-folders are
    /// not descended into.
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StoredObject>, GatewayError>;

    /// Store a new object. Fails when the name is taken.
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GatewayError>;

    fn public_url(&self, bucket: &str, name: &str) -> String;

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<(), GatewayError>;
}

/// A file offered for upload, before validation.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// An upload that passed validation.
#[derive(Debug, Clone)]
pub struct ValidImage {
    pub mime: &'static str,
    pub ext: String,
    pub data: Bytes,
}

fn allowed(mime: &str) -> Option<&'static str> {
    ALLOWED_IMAGE_TYPES
        .iter()
        .copied()
        .find(|m| m.eq_ignore_ascii_case(mime))
}

fn canonical_ext(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "webp",
    }
}

impl ImageUpload {
    /// Check type and size without touching any backend.
    ///
    /// The declared type must be an allowed image type, and when the bytes
    /// carry a known signature that type must be allowed too. Files must be
    /// strictly smaller than `max_bytes`.
    pub fn validate(self, max_bytes: u64) -> Result<ValidImage, MemorialError> {
        if self.data.is_empty() {
            return Err(MemorialError::validation("the selected file is empty"));
        }
        if self.data.len() as u64 >= max_bytes {
            return Err(MemorialError::validation(format!(
                "image size should be less than {}MB",
                max_bytes / (1024 * 1024)
            )));
        }
        let declared = self
            .content_type
            .clone()
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|n| mime_guess::from_path(n).first())
                    .map(|m| m.essence_str().to_string())
            })
            .unwrap_or_default();
        let invalid = || MemorialError::validation("please select a valid image file (JPEG, PNG, GIF, WEBP)");
        let mut mime = allowed(&declared).ok_or_else(invalid)?;
        if let Some(sniffed) = infer::get(&self.data) {
            mime = allowed(sniffed.mime_type()).ok_or_else(invalid)?;
        }
        let ext = self
            .file_name
            .as_deref()
            .and_then(|n| n.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()))
            .filter(|e| {
                mime_guess::from_ext(e)
                    .iter()
                    .any(|m| m.essence_str() == mime)
            })
            .unwrap_or_else(|| canonical_ext(mime).to_string());
        Ok(ValidImage {
            mime,
            ext,
            data: self.data,
        })
    }
}

/// Reduce free text to something safe inside an object name.
pub fn sanitize_caption(caption: &str) -> String {
    let joined = WHITESPACE.replace_all(caption.trim(), "_");
    let cleaned = UNSAFE.replace_all(&joined, "");
    let mut out: String = cleaned.trim_matches(|c: char| c == '_' || c == '-').to_string();
    out.truncate(MAX_CAPTION_LEN);
    if out.is_empty() {
        "memorial".to_string()
    } else {
        out
    }
}

/// `{millis}_{sanitized caption}.{ext}`, inside `{group}/` when grouped.
pub fn object_name(now_ms: i64, caption: &str, ext: &str, group: Option<&str>) -> String {
    let base = format!("{}_{}.{}", now_ms, sanitize_caption(caption), ext);
    match group.map(sanitize_group).filter(|g| !g.is_empty()) {
        Some(g) => format!("{}/{}", g, base),
        None => base,
    }
}

/// Group tags become folder names.
pub fn sanitize_group(group: &str) -> String {
    let joined = WHITESPACE.replace_all(group.trim(), "-");
    UNSAFE
        .replace_all(&joined, "")
        .trim_matches(|c: char| c == '_' || c == '-')
        .to_lowercase()
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Milliseconds encoded at the start of an object name, 0 when absent.
pub fn timestamp_from_name(name: &str) -> i64 {
    let digits: String = base_name(name)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Human caption recovered from an object name.
pub fn caption_from_name(name: &str) -> Option<String> {
    let base = base_name(name);
    let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);
    let (_, rest) = stem.split_once('_')?;
    let caption = rest.replace('_', " ").trim().to_string();
    if caption.is_empty() {
        None
    } else {
        Some(caption)
    }
}

/// Group folder of an object, if it has one.
pub fn group_from_name(name: &str) -> Option<String> {
    name.rsplit_once('/').map(|(g, _)| g.to_string())
}

/// Ordered storage targets. Attempts start at the last bucket that worked and
/// wrap around the list.
#[derive(Debug, Clone)]
pub struct BucketChain {
    candidates: Vec<String>,
    winner: usize,
}

impl BucketChain {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            winner: 0,
        }
    }

    pub fn winner(&self) -> Option<&str> {
        self.candidates.get(self.winner).map(|s| s.as_str())
    }

    /// Candidates in attempt order.
    pub fn attempts(&self) -> Vec<String> {
        let n = self.candidates.len();
        (0..n)
            .map(|i| self.candidates[(self.winner + i) % n].clone())
            .collect()
    }

    pub fn remember(&mut self, bucket: &str) {
        if let Some(pos) = self.candidates.iter().position(|c| c == bucket) {
            self.winner = pos;
        }
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.candidates.iter().any(|c| c == bucket)
    }

    /// Upload to the first bucket that accepts the object and return its name.
    /// A name clash is final: the object would only be duplicated elsewhere.
    pub async fn upload(
        &mut self,
        store: &dyn ObjectStore,
        name: &str,
        image: &ValidImage,
    ) -> Result<String, GatewayError> {
        let mut last_err = GatewayError::NotFound("no storage bucket configured".into());
        for bucket in self.attempts() {
            match store
                .upload(&bucket, name, image.data.clone(), image.mime)
                .await
            {
                Ok(()) => {
                    self.remember(&bucket);
                    return Ok(bucket);
                }
                Err(e @ GatewayError::Conflict(_)) => {
                    tracing::warn!(bucket = %bucket, error = %e, "object name already taken");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(bucket = %bucket, error = %e, "upload failed, trying next bucket");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
