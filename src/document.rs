use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Shape every synchronized document satisfies.
///
/// Implementations are ordinary application structs, no reflection involved:
/// the accessors below are resolved at compile time, so a document kind that
/// forgets `last_modified` or `user_id` fails to build rather than failing a
/// sync cycle at runtime.
///
/// `Self::KIND` is the document-kind name used whenever `doc_type()` is
/// empty. Callers SHOULD default the `type` field in their own
/// `Deserialize` impl (e.g. `#[serde(default = "...")]`) so this fallback is
/// rarely exercised, but the sync engine re-checks it defensively at each
/// phase boundary.
pub trait SyncDocument:
    Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static
{
    /// Document-kind name, e.g. `"Item"`. Used as the default `type` tag.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn user_id(&self) -> &str;

    /// Raw `type` tag as carried by the document; may be empty.
    fn doc_type(&self) -> &str;

    /// `doc_type()`, falling back to `Self::KIND` when empty.
    fn effective_type(&self) -> &str {
        let t = self.doc_type();
        if t.is_empty() { Self::KIND } else { t }
    }

    fn last_modified(&self) -> Option<DateTime<Utc>>;

    fn is_deleted(&self) -> bool {
        false
    }

    /// `"{user_id}:{type}"`, the remote database's routing key.
    fn partition_key(&self) -> String {
        partition_key(self.user_id(), self.effective_type())
    }
}

/// Derives the partition key from its two components. Centralized so the
/// remote adapter and any diagnostics agree on the exact format.
pub fn partition_key(user_id: &str, doc_type: &str) -> String {
    format!("{user_id}:{doc_type}")
}

/// Resolves the winner of an LWW comparison between a local and a remote
/// candidate: strict greater-than, missing timestamps lose to present ones,
/// equality and double-absence both mean "no update".
pub fn remote_is_newer(
    local_last_modified: Option<DateTime<Utc>>,
    remote_last_modified: Option<DateTime<Utc>>,
) -> bool {
    match (local_last_modified, remote_last_modified) {
        (Some(l), Some(r)) => r > l,
        (Some(_), None) => false,
        (None, Some(_)) => true,
        (None, None) => false,
    }
}

/// Same comparison, from the push phase's point of view: is the local copy
/// newer than (or the remote copy simply absent relative to) the remote one?
pub fn local_is_newer(
    local_last_modified: Option<DateTime<Utc>>,
    remote_last_modified: Option<DateTime<Utc>>,
) -> bool {
    match (local_last_modified, remote_last_modified) {
        (Some(l), Some(r)) => l > r,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => false,
    }
}
