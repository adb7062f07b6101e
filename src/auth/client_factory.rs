use std::sync::Arc;

use url::Url;

use crate::auth::token_provider::TokenProvider;
use crate::config::RemoteOptions;
use crate::document::SyncDocument;
use crate::error::{SyncError, SyncResult};
use crate::store::remote::RemoteStore;

/// Builds ready-to-use remote store handles on demand. Handles are
/// constructed per operation and never pooled: token expiry mid-operation
/// surfaces as `RemoteAuth` from the underlying call, and the next call
/// through this factory transparently obtains a fresh token.
pub struct RemoteClientFactory {
    tokens: Arc<TokenProvider>,
    endpoint: Url,
    options: RemoteOptions,
}

impl RemoteClientFactory {
    pub fn new(tokens: Arc<TokenProvider>, endpoint: Url, options: RemoteOptions) -> Self {
        Self { tokens, endpoint, options }
    }

    /// Returns a `RemoteStore<T>` bound to `database`/`container`, carrying
    /// a freshly obtained (possibly cache-served) token.
    pub async fn get_container<T: SyncDocument>(
        &self,
        database: &str,
        container: &str,
    ) -> SyncResult<RemoteStore<T>> {
        let token = self.tokens.get_token().await?;
        RemoteStore::new(self.endpoint.clone(), database, container, token, self.options.clone())
    }

    /// Convenience over `get_container` defaulting the container name to
    /// the document kind's own name, the common case where one container
    /// holds exactly one document kind.
    pub async fn get_default_container<T: SyncDocument>(&self, database: &str) -> SyncResult<RemoteStore<T>> {
        self.get_container(database, T::KIND).await
    }
}

pub(crate) fn normalize_endpoint(raw: &str) -> SyncResult<Url> {
    let with_trailing_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_trailing_slash)
        .map_err(|e| SyncError::InvalidArgument(format!("invalid remote endpoint {raw:?}: {e}")))
}
