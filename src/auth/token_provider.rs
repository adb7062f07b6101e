use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
struct CachedToken {
    user_id: String,
    token: String,
    /// `expiryDateTime` minus the safety buffer; this, not the raw server
    /// expiry, is what `is_valid` compares against.
    effective_expiry: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid_for(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.user_id == user_id && now < self.effective_expiry
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(rename = "expiryDateTime")]
    expiry_date_time: DateTime<Utc>,
}

/// Fetches and caches short-lived, user-scoped remote credentials. A
/// `std::sync::RwLock` snapshot serves valid cache hits without contending
/// with in-flight fetches; a `tokio::sync::Mutex` around the fetch path
/// enforces single-flight so concurrent misses collapse into one HTTP
/// request.
pub struct TokenProvider {
    client: Client,
    endpoint: Url,
    safety_buffer: Duration,
    current_user: RwLock<Option<String>>,
    cache: RwLock<Option<CachedToken>>,
    fetch_lock: Mutex<()>,
}

impl TokenProvider {
    pub fn new(endpoint: Url, safety_buffer: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            safety_buffer,
            current_user: RwLock::new(None),
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Moves to *Configured*. Switching users evicts any cached token for
    /// the previous user.
    pub fn set_user(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let mut current = self.current_user.write().expect("token provider lock poisoned");
        let changed = current.as_deref() != Some(user_id.as_str());
        *current = Some(user_id);
        drop(current);
        if changed {
            *self.cache.write().expect("token provider lock poisoned") = None;
        }
    }

    /// Returns the cached token if valid, otherwise fetches a fresh one.
    /// Fails with `InvalidState` if no user has been configured yet.
    pub async fn get_token(&self) -> SyncResult<String> {
        let user_id = self
            .current_user
            .read()
            .expect("token provider lock poisoned")
            .clone()
            .ok_or_else(|| SyncError::InvalidState("token requested before set_user".to_string()))?;

        if let Some(token) = self.cached_token_for(&user_id) {
            return Ok(token);
        }

        // Single-flight: only one task at a time performs the HTTP fetch.
        let _permit = self.fetch_lock.lock().await;

        // Double-checked: another waiter may have refreshed the cache while
        // we waited for the fetch lock.
        if let Some(token) = self.cached_token_for(&user_id) {
            return Ok(token);
        }

        let fetched = self.fetch_token(&user_id).await?;
        let token = fetched.token.clone();
        *self.cache.write().expect("token provider lock poisoned") = Some(fetched);
        Ok(token)
    }

    fn cached_token_for(&self, user_id: &str) -> Option<String> {
        let cache = self.cache.read().expect("token provider lock poisoned");
        let entry = cache.as_ref()?;
        if entry.is_valid_for(user_id, Utc::now()) {
            Some(entry.token.clone())
        } else {
            None
        }
    }

    async fn fetch_token(&self, user_id: &str) -> SyncResult<CachedToken> {
        let resp = self
            .client
            .get(self.endpoint.clone())
            .query(&[("userId", user_id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::RemoteAuth {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: TokenResponse = resp.json().await?;
        let effective_expiry = parsed.expiry_date_time
            - chrono::Duration::from_std(self.safety_buffer)
                .map_err(|e| SyncError::InvalidArgument(format!("safety buffer out of range: {e}")))?;

        tracing::debug!(user_id, expiry = %parsed.expiry_date_time, "fetched remote access token");

        Ok(CachedToken {
            user_id: user_id.to_string(),
            token: parsed.token,
            effective_expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    fn endpoint(server: &MockServer) -> Url {
        Url::parse(&format!("{}/token", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn get_token_before_set_user_fails_with_invalid_state() {
        let provider = TokenProvider::new(Url::parse("http://localhost/token").unwrap(), Duration::from_secs(300));
        let err = provider.get_token().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
    }

    #[tokio::test]
    async fn fetches_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("userId", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc123",
                "expiryDateTime": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(endpoint(&server), Duration::from_secs(300));
        provider.set_user("u1");

        let first = provider.get_token().await.unwrap();
        let second = provider.get_token().await.unwrap();
        assert_eq!(first, "abc123");
        assert_eq!(second, "abc123");
    }

    #[tokio::test]
    async fn near_expiry_token_is_treated_as_cache_miss() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));

        struct Counting {
            calls: Arc<AtomicUsize>,
        }
        impl Respond for Counting {
            fn respond(&self, _req: &wiremock::Request) -> ResponseTemplate {
                self.calls.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "token": "fresh",
                    // Expires in only 60s; with a 300s safety buffer this is
                    // already "expired" the moment it's cached.
                    "expiryDateTime": (Utc::now() + chrono::Duration::seconds(60)).to_rfc3339(),
                }))
            }
        }

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(Counting { calls: calls.clone() })
            .mount(&server)
            .await;

        let provider = TokenProvider::new(endpoint(&server), Duration::from_secs(300));
        provider.set_user("u1");

        provider.get_token().await.unwrap();
        provider.get_token().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2, "a near-expiry cached token must trigger a refetch");
    }

    #[tokio::test]
    async fn switching_user_evicts_previous_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("userId", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "token-u1",
                "expiryDateTime": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("userId", "u2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "token-u2",
                "expiryDateTime": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            })))
            .mount(&server)
            .await;

        let provider = TokenProvider::new(endpoint(&server), Duration::from_secs(300));
        provider.set_user("u1");
        assert_eq!(provider.get_token().await.unwrap(), "token-u1");

        provider.set_user("u2");
        assert_eq!(provider.get_token().await.unwrap(), "token-u2");
    }

    #[tokio::test]
    async fn non_2xx_response_fails_with_remote_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("user not entitled"))
            .mount(&server)
            .await;

        let provider = TokenProvider::new(endpoint(&server), Duration::from_secs(300));
        provider.set_user("u1");

        let err = provider.get_token().await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteAuth { status: Some(403), .. }));
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_to_a_single_fetch() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));

        struct Counting {
            calls: Arc<AtomicUsize>,
        }
        impl Respond for Counting {
            fn respond(&self, _req: &wiremock::Request) -> ResponseTemplate {
                self.calls.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "token": "single-flight",
                    "expiryDateTime": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                }))
            }
        }

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(Counting { calls: calls.clone() })
            .mount(&server)
            .await;

        let provider = Arc::new(TokenProvider::new(endpoint(&server), Duration::from_secs(300)));
        provider.set_user("u1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move { provider.get_token().await.unwrap() }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), "single-flight");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "concurrent cache misses must collapse into one fetch");
    }
}
