use std::marker::PhantomData;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::document::{local_is_newer, remote_is_newer, SyncDocument};
use crate::error::{SyncError, SyncResult};
use crate::store::{DocumentStore, LocalWrite};

/// Outcome of one `sync()`/`initial_pull()` call. The engine itself only
/// returns this; emitting it anywhere durable (metrics, a log sink) is the
/// host application's job via the `tracing` events raised alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub skipped_push: usize,
    pub skipped_pull: usize,
    pub elapsed: Duration,
}

/// Bidirectional reconciler between a local store and a remote store for
/// one document kind and one current user. Generic over any pair of
/// `DocumentStore` implementations, including in-memory test doubles, so
/// the push/pull algorithm below is written once.
pub struct SyncEngine<T, L, R>
where
    T: SyncDocument,
    L: LocalWrite<T>,
    R: DocumentStore<T>,
{
    local: L,
    remote: R,
    current_user: RwLock<String>,
    _kind: PhantomData<T>,
}

impl<T, L, R> SyncEngine<T, L, R>
where
    T: SyncDocument,
    L: LocalWrite<T>,
    R: DocumentStore<T>,
{
    pub fn new(local: L, remote: R, user_id: impl Into<String>) -> SyncResult<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(SyncError::InvalidState(
                "sync engine requires a non-empty user_id".to_string(),
            ));
        }
        Ok(Self {
            local,
            remote,
            current_user: RwLock::new(user_id),
            _kind: PhantomData,
        })
    }

    /// Replaces the engine's user scope. Documents already pulled for prior
    /// users are left in the local store; supporting multi-account clients
    /// is deliberate.
    pub fn set_user(&self, user_id: impl Into<String>) -> SyncResult<()> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(SyncError::InvalidState(
                "set_user requires a non-empty user_id".to_string(),
            ));
        }
        *self.current_user.write().expect("sync engine lock poisoned") = user_id;
        Ok(())
    }

    pub fn current_user(&self) -> String {
        self.current_user.read().expect("sync engine lock poisoned").clone()
    }

    /// Runs one push-then-pull cycle with no cancellation signal attached.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.sync_cancellable(&CancellationToken::new()).await
    }

    #[tracing::instrument(skip(self, cancel), fields(user_id = %self.current_user(), doc_type = T::KIND))]
    pub async fn sync_cancellable(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let push = self.push_phase(cancel).await;
        let (pushed, skipped_push) = match push {
            Ok(counts) => counts,
            Err(err) => {
                tracing::error!(phase = "push", error = %err, "sync cycle aborted");
                return Err(err);
            }
        };

        let pull = self.pull_phase(cancel).await;
        let (pulled, skipped_pull) = match pull {
            Ok(counts) => counts,
            Err(err) => {
                tracing::error!(phase = "pull", error = %err, "sync cycle aborted");
                return Err(err);
            }
        };

        let report = SyncReport {
            pushed,
            pulled,
            skipped_push,
            skipped_pull,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            pushed = report.pushed,
            pulled = report.pulled,
            skipped_push = report.skipped_push,
            skipped_pull = report.skipped_pull,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync cycle completed"
        );
        Ok(report)
    }

    /// Push phase: every locally pending document is compared against its
    /// remote counterpart; the local copy is pushed only when it is
    /// strictly newer (or the remote copy is absent). Every examined id has
    /// its pending row cleared once the bulk upsert succeeds, including ids
    /// that lost the comparison (see DESIGN.md).
    async fn push_phase(&self, cancel: &CancellationToken) -> SyncResult<(usize, usize)> {
        let pending = self.local.get_pending().await?;
        let mut to_push = Vec::new();
        let mut examined = Vec::new();

        for doc in pending {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if doc.id().is_empty() {
                tracing::warn!("skipping pending document with empty id");
                continue;
            }
            if doc.user_id().is_empty() {
                tracing::warn!(id = doc.id(), "skipping pending document with empty user_id");
                continue;
            }

            let remote_counterpart = self.remote.get(doc.id(), doc.user_id()).await?;
            let should_push = local_is_newer(doc.last_modified(), remote_counterpart.as_ref().and_then(|r| r.last_modified()));

            examined.push(doc.id().to_string());
            if should_push {
                to_push.push(doc);
            }
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let pushed = to_push.len();
        if !to_push.is_empty() {
            self.remote.upsert_bulk(&to_push).await?;
        }

        // Pending rows are cleared for every id the push phase consulted
        // remote about, not just the ones actually pushed.
        for id in &examined {
            self.local.remove_pending(id).await?;
        }

        let skipped = examined.len() - pushed;
        Ok((pushed, skipped))
    }

    /// Pull phase: every remote document owned by the current user is
    /// compared against its local counterpart; the remote copy wins
    /// ties/absences per the same LWW rule, and is written back with
    /// `mark_pending = false` so pulled updates never reappear as local
    /// work. Malformed remote documents are already filtered out by
    /// `DocumentStore::get_by_user` before this loop sees them; a local
    /// read that fails with `InvalidArgument` is skipped here too, so one
    /// bad document never drops the rest of the batch.
    async fn pull_phase(&self, cancel: &CancellationToken) -> SyncResult<(usize, usize)> {
        let user_id = self.current_user();
        let remote_docs = self.remote.get_by_user(&user_id).await?;

        let mut to_pull = Vec::new();
        let mut examined = 0usize;
        let mut cancelled = false;

        for doc in remote_docs {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let local_counterpart = match self.local.get(doc.id(), &user_id).await {
                Ok(v) => v,
                Err(SyncError::InvalidArgument(msg)) => {
                    tracing::warn!(id = doc.id(), error = %msg, "skipping remote document during pull");
                    continue;
                }
                Err(err) => return Err(err),
            };

            examined += 1;
            if remote_is_newer(local_counterpart.and_then(|l| l.last_modified()), doc.last_modified()) {
                to_pull.push(doc);
            }
        }

        let pulled = to_pull.len();
        if !to_pull.is_empty() {
            self.local.upsert_bulk_marked(&to_pull, false).await?;
        }

        if cancelled {
            return Err(SyncError::Cancelled);
        }

        let skipped = examined - pulled;
        Ok((pulled, skipped))
    }

    /// Bootstrap variant for a freshly empty local store: pull-only, no
    /// pending rows created. `doc_type` names the kind being bootstrapped
    /// for tracing context and is asserted to agree with `T::KIND` (the
    /// accessor-driven fallback in `effective_type()` already handles
    /// documents whose own `type` field is blank, so no field mutation is
    /// needed here, see DESIGN.md).
    #[tracing::instrument(skip(self, cancel), fields(user_id = %self.current_user()))]
    pub async fn initial_pull(&self, doc_type: &str, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        if doc_type != T::KIND {
            return Err(SyncError::InvalidArgument(format!(
                "initial_pull called with doc_type {doc_type:?} but this engine is scoped to {:?}",
                T::KIND
            )));
        }

        let started = Instant::now();
        let (pulled, skipped_pull) = self.pull_phase(cancel).await?;
        let report = SyncReport {
            pushed: 0,
            pulled,
            skipped_push: 0,
            skipped_pull,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            pulled = report.pulled,
            skipped_pull = report.skipped_pull,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "initial pull completed"
        );
        Ok(report)
    }
}
