//! Persistence contract consumed by the execution session, plus an
//! in-memory implementation used by tests and the CLI harness.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{DraftTier, PostSnapshot, TierDraft};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Persistence failures.  Diagnostic context names the entity and column but
/// never row contents or credentials.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("post not found: {post_id}")]
    NotFound { post_id: String },
    #[error(
        "revision conflict on post {post_id} ({column}): expected {expected}, found {actual}"
    )]
    RevisionConflict {
        post_id: String,
        column: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("database failure on {entity}.{column}: {message}")]
    Database {
        entity: String,
        column: String,
        message: String,
    },
}

impl StoreError {
    /// Only the optimistic-concurrency conflict is worth retrying; everything
    /// else indicates a missing entity or an infrastructure fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RevisionConflict { .. })
    }
}

// ── Revision history ─────────────────────────────────────────────────────────

/// Immutable snapshot appended after every successful draft write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: Uuid,
    pub post_id: String,
    pub taken_at: DateTime<Utc>,
    pub snapshot: Value,
}

// ── Contract ─────────────────────────────────────────────────────────────────

/// Read/write contract against the CMS relational store.  The engine only
/// ever reads one post, replaces one tier's draft, and appends a revision —
/// schema and querying stay on the other side of this trait.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn load_post(&self, post_id: &str) -> Result<PostSnapshot, StoreError>;

    /// Replace `tier`'s draft for `post_id`.
    ///
    /// `expected_revision` must equal the tier's current revision or the
    /// write is rejected with [`StoreError::RevisionConflict`].  On success
    /// the stored revision becomes `expected_revision + 1` and is returned.
    ///
    /// Writing [`DraftTier::Source`] replaces the live post fields and the
    /// props of every module named in the draft.
    async fn write_draft(
        &self,
        post_id: &str,
        tier: DraftTier,
        draft: TierDraft,
        expected_revision: u64,
    ) -> Result<u64, StoreError>;

    /// Append an immutable revision snapshot, pruning the oldest entries
    /// beyond the store's retention count.
    async fn append_revision(&self, post_id: &str, snapshot: Value) -> Result<(), StoreError>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Reference [`ContentStore`] backed by process memory.
pub struct MemoryContentStore {
    posts: RwLock<HashMap<String, PostSnapshot>>,
    revisions: RwLock<HashMap<String, Vec<RevisionRecord>>>,
    retention: usize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::with_retention(20)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            posts: RwLock::new(HashMap::new()),
            revisions: RwLock::new(HashMap::new()),
            retention: retention.max(1),
        }
    }

    pub async fn insert(&self, post: PostSnapshot) {
        self.posts.write().await.insert(post.id.clone(), post);
    }

    pub async fn revisions_for(&self, post_id: &str) -> Vec<RevisionRecord> {
        self.revisions
            .read()
            .await
            .get(post_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn load_post(&self, post_id: &str) -> Result<PostSnapshot, StoreError> {
        self.posts
            .read()
            .await
            .get(post_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                post_id: post_id.to_string(),
            })
    }

    async fn write_draft(
        &self,
        post_id: &str,
        tier: DraftTier,
        mut draft: TierDraft,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let mut posts = self.posts.write().await;
        let post = posts.get_mut(post_id).ok_or_else(|| StoreError::NotFound {
            post_id: post_id.to_string(),
        })?;

        let actual = post.tier_revision(tier);
        if actual != expected_revision {
            return Err(StoreError::RevisionConflict {
                post_id: post_id.to_string(),
                column: tier.column(),
                expected: expected_revision,
                actual,
            });
        }

        let next = expected_revision + 1;
        match tier {
            DraftTier::Source => {
                post.fields = draft.post;
                for (module_id, props) in draft.module_props {
                    if let Some(module) = post.modules.iter_mut().find(|m| m.id == module_id) {
                        module.props = props;
                    }
                }
                post.revision = next;
            }
            DraftTier::Review => {
                draft.revision = next;
                post.review = draft;
            }
            DraftTier::AiReview => {
                draft.revision = next;
                post.ai_review = draft;
            }
        }
        debug!(post_id, tier = tier.as_str(), revision = next, "draft written");
        Ok(next)
    }

    async fn append_revision(&self, post_id: &str, snapshot: Value) -> Result<(), StoreError> {
        let mut revisions = self.revisions.write().await;
        let entries = revisions.entry(post_id.to_string()).or_default();
        entries.push(RevisionRecord {
            id: Uuid::new_v4(),
            post_id: post_id.to_string(),
            taken_at: Utc::now(),
            snapshot,
        });
        if entries.len() > self.retention {
            let excess = entries.len() - self.retention;
            entries.drain(..excess);
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_with_title(id: &str, title: &str) -> PostSnapshot {
        let mut post = PostSnapshot::new(id);
        post.fields.insert("title".to_string(), json!(title));
        post
    }

    #[tokio::test]
    async fn load_missing_post_is_not_found() {
        let store = MemoryContentStore::new();
        let err = store.load_post("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn write_draft_bumps_revision() {
        let store = MemoryContentStore::new();
        store.insert(post_with_title("p1", "Old")).await;

        let mut draft = TierDraft::default();
        draft.post.insert("title".to_string(), json!("New"));
        let revision = store
            .write_draft("p1", DraftTier::AiReview, draft, 0)
            .await
            .unwrap();
        assert_eq!(revision, 1);

        let post = store.load_post("p1").await.unwrap();
        assert_eq!(post.ai_review.post["title"], "New");
        assert_eq!(post.ai_review.revision, 1);
        // live content untouched
        assert_eq!(post.fields["title"], "Old");
    }

    #[tokio::test]
    async fn stale_revision_is_rejected_as_retryable() {
        let store = MemoryContentStore::new();
        store.insert(post_with_title("p1", "Old")).await;

        store
            .write_draft("p1", DraftTier::AiReview, TierDraft::default(), 0)
            .await
            .unwrap();
        let err = store
            .write_draft("p1", DraftTier::AiReview, TierDraft::default(), 0)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn source_write_replaces_live_fields() {
        let store = MemoryContentStore::new();
        store.insert(post_with_title("p1", "Old")).await;

        let mut draft = TierDraft::default();
        draft.post.insert("title".to_string(), json!("Live"));
        store
            .write_draft("p1", DraftTier::Source, draft, 0)
            .await
            .unwrap();

        let post = store.load_post("p1").await.unwrap();
        assert_eq!(post.fields["title"], "Live");
        assert_eq!(post.revision, 1);
    }

    #[tokio::test]
    async fn revision_history_is_pruned_to_retention() {
        let store = MemoryContentStore::with_retention(3);
        store.insert(post_with_title("p1", "Old")).await;

        for i in 0..5 {
            store
                .append_revision("p1", json!({ "iteration": i }))
                .await
                .unwrap();
        }
        let records = store.revisions_for("p1").await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].snapshot["iteration"], 2);
        assert_eq!(records[2].snapshot["iteration"], 4);
    }
}
