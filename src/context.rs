//! Bounded per-(group, user) conversation history.
//!
//! Images are stored out of line in the [`BlobStore`] and referenced from
//! entries by key. Every write diffs the image keys of the old and new history
//! and deletes the blobs that are no longer referenced, so blobs never outlive
//! the entries that point at them.

use crate::llm::{Content, ContentPart, Message};
use crate::storage::{
    context_key, load_json, read_json, save_json, BlobStore, KeyValueStore, StorageError,
};
use base64::Engine;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A stored history entry. Image parts carry blob keys.
pub type ContextEntry = Message;

/// Image keys referenced anywhere in `entries`
#[must_use]
pub fn image_keys(entries: &[ContextEntry]) -> HashSet<String> {
    entries
        .iter()
        .flat_map(Message::image_urls)
        .map(ToString::to_string)
        .collect()
}

/// KV-backed conversation history with blob lifecycle management
#[derive(Clone)]
pub struct ConversationContextStore {
    kv: Arc<dyn KeyValueStore>,
    blobs: Arc<dyn BlobStore>,
    max_length: usize,
}

impl ConversationContextStore {
    /// Build a store keeping at most `max_length` entries per pair
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, blobs: Arc<dyn BlobStore>, max_length: usize) -> Self {
        Self {
            kv,
            blobs,
            max_length,
        }
    }

    /// Stored history, oldest first. Absent or unreadable history is empty.
    pub async fn get(&self, group_id: i64, user_id: i64) -> Vec<ContextEntry> {
        load_json(self.kv.as_ref(), &context_key(group_id, user_id))
            .await
            .unwrap_or_default()
    }

    /// History for a read-modify-write: a failed read is an error, never an empty history
    async fn stored(&self, group_id: i64, user_id: i64) -> Result<Vec<ContextEntry>, StorageError> {
        Ok(read_json(self.kv.as_ref(), &context_key(group_id, user_id))
            .await?
            .unwrap_or_default())
    }

    /// Append entries, keep the newest `max_length`, delete blobs that fell out.
    ///
    /// # Errors
    ///
    /// Returns an error if the current history cannot be read or the new one
    /// cannot be written. Blob deletion failures are only logged.
    pub async fn append(
        &self,
        group_id: i64,
        user_id: i64,
        new_entries: Vec<ContextEntry>,
    ) -> Result<Vec<ContextEntry>, StorageError> {
        let mut updated = self.stored(group_id, user_id).await?;
        updated.extend(new_entries);
        // Includes new entries evicted by this same append
        let candidate_keys = image_keys(&updated);

        let overflow = updated.len().saturating_sub(self.max_length);
        updated.drain(..overflow);

        save_json(self.kv.as_ref(), &context_key(group_id, user_id), &updated).await?;
        self.delete_orphans(&candidate_keys, &image_keys(&updated)).await;
        Ok(updated)
    }

    /// Reset the history to empty and drop every blob it referenced
    ///
    /// # Errors
    ///
    /// Returns an error if the current history cannot be read or the empty
    /// history cannot be written.
    pub async fn clear(&self, group_id: i64, user_id: i64) -> Result<(), StorageError> {
        let previous_keys = image_keys(&self.stored(group_id, user_id).await?);
        let empty: Vec<ContextEntry> = Vec::new();
        save_json(self.kv.as_ref(), &context_key(group_id, user_id), &empty).await?;
        self.delete_orphans(&previous_keys, &HashSet::new()).await;
        Ok(())
    }

    async fn delete_orphans(&self, previous: &HashSet<String>, current: &HashSet<String>) {
        for key in previous.difference(current) {
            match self.blobs.delete_blob(key).await {
                Ok(()) => debug!(key, "Deleted orphaned image blob"),
                Err(e) => warn!(key, error = %e, "Failed to delete orphaned image blob"),
            }
        }
    }

    /// Replace blob-key image parts with inline `data:` URLs for the model.
    ///
    /// Missing or unreadable blobs become a text note instead of failing the request.
    pub async fn resolve_images(&self, entries: &[ContextEntry]) -> Vec<Message> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            let content = match &entry.content {
                Content::Text(text) => Content::Text(text.clone()),
                Content::Parts(parts) => Content::Parts(self.resolve_parts(parts).await),
            };
            resolved.push(Message {
                role: entry.role,
                content,
            });
        }
        resolved
    }

    async fn resolve_parts(&self, parts: &[ContentPart]) -> Vec<ContentPart> {
        let mut resolved = Vec::with_capacity(parts.len());
        for part in parts {
            let ContentPart::ImageUrl { image_url } = part else {
                resolved.push(part.clone());
                continue;
            };
            match self.blobs.get_blob(&image_url.url).await {
                Ok(Some(bytes)) => resolved.push(ContentPart::image(jpeg_data_url(&bytes))),
                Ok(None) => {
                    warn!(key = %image_url.url, "Image blob missing");
                    resolved.push(ContentPart::text(format!(
                        "(image data missing: {})",
                        image_url.url
                    )));
                }
                Err(e) => {
                    warn!(key = %image_url.url, error = %e, "Image blob unreadable");
                    resolved.push(ContentPart::text(format!(
                        "(image data missing: {})",
                        image_url.url
                    )));
                }
            }
        }
        resolved
    }
}

/// Base64 `data:` URL for JPEG bytes, the format Telegram serves photos in
#[must_use]
pub fn jpeg_data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
