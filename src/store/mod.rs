pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::document::SyncDocument;
use crate::error::SyncResult;

/// Document store contract shared by the local embedded store and every
/// remote adapter. One store instance is scoped to a single document kind
/// `T`; the sync engine is generic over any pair of implementations.
///
/// Pending-change operations (`get_pending*`, `remove_pending`) are no-ops
/// for stores that don't track pending changes (i.e. remote adapters). The
/// default bodies below return the empty/no-op result so implementers only
/// override what applies to them.
#[async_trait]
pub trait DocumentStore<T: SyncDocument>: Send + Sync {
    /// Point lookup scoped to `user_id`. Errors with `InvalidArgument` if
    /// `user_id` is empty.
    async fn get(&self, id: &str, user_id: &str) -> SyncResult<Option<T>>;

    /// Every document owned by `user_id` of this store's document kind.
    async fn get_by_user(&self, user_id: &str) -> SyncResult<Vec<T>>;

    /// Every document of this store's kind, regardless of owner.
    async fn get_all(&self) -> SyncResult<Vec<T>>;

    /// Insert-or-replace keyed by `id`, marking the document pending where
    /// that concept applies.
    async fn upsert(&self, document: &T) -> SyncResult<()>;

    /// Batched form of `upsert`. Atomic per document, not across documents.
    async fn upsert_bulk(&self, documents: &[T]) -> SyncResult<()>;

    async fn get_pending(&self) -> SyncResult<Vec<T>> {
        Ok(Vec::new())
    }

    async fn get_pending_for_user(&self, _user_id: &str) -> SyncResult<Vec<T>> {
        Ok(Vec::new())
    }

    async fn remove_pending(&self, _id: &str) -> SyncResult<()> {
        Ok(())
    }
}

/// Extension implemented only by stores that track pending changes (i.e.
/// the local store): lets callers suppress the pending-change side effect
/// of an upsert, which the sync engine's pull phase relies on so pulled
/// documents never reappear as local work.
#[async_trait]
pub trait LocalWrite<T: SyncDocument>: DocumentStore<T> {
    async fn upsert_marked(&self, document: &T, mark_pending: bool) -> SyncResult<()>;

    async fn upsert_bulk_marked(&self, documents: &[T], mark_pending: bool) -> SyncResult<()>;
}

pub(crate) fn require_non_empty_user_id(user_id: &str) -> SyncResult<()> {
    if user_id.trim().is_empty() {
        return Err(crate::error::SyncError::InvalidArgument(
            "user_id must not be empty".to_string(),
        ));
    }
    Ok(())
}
