use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::{ConnectionMode, RemoteOptions};
use crate::document::{partition_key, SyncDocument};
use crate::error::{SyncError, SyncResult};
use crate::store::{require_non_empty_user_id, DocumentStore};

/// Remote store adapter over a user-partitioned document database reached
/// via HTTPS. One instance is bound to a logical database/container pair
/// and a bearer token supplied by the client factory; pending-change
/// operations use the trait's default no-op bodies since the remote side
/// never tracks pending changes.
pub struct RemoteStore<T: SyncDocument> {
    client: Client,
    base_url: Url,
    database: String,
    container: String,
    token: String,
    options: RemoteOptions,
    _kind: PhantomData<T>,
}

impl<T: SyncDocument> RemoteStore<T> {
    pub fn new(
        base_url: Url,
        database: impl Into<String>,
        container: impl Into<String>,
        token: impl Into<String>,
        options: RemoteOptions,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(SyncError::from)?;
        Ok(Self {
            client,
            base_url,
            database: database.into(),
            container: container.into(),
            token: token.into(),
            options,
            _kind: PhantomData,
        })
    }

    fn doc_url(&self, id: &str) -> SyncResult<Url> {
        let encoded_id = url::form_urlencoded::byte_serialize(id.as_bytes()).collect::<String>();
        self.base_url
            .join(&format!("dbs/{}/colls/{}/docs/{}", self.database, self.container, encoded_id))
            .map_err(|e| SyncError::InvalidArgument(format!("invalid document id {id:?}: {e}")))
    }

    fn collection_url(&self) -> SyncResult<Url> {
        self.base_url
            .join(&format!("dbs/{}/colls/{}/docs", self.database, self.container))
            .map_err(|e| SyncError::Storage(format!("invalid remote endpoint configuration: {e}")))
    }

    /// Value sent as `x-connection-mode` on every request so the remote side
    /// (or an intermediating gateway) can tell a direct client from a
    /// gateway-routed one.
    fn connection_mode_header(&self) -> &'static str {
        match self.options.connection_mode {
            ConnectionMode::Direct => "direct",
            ConnectionMode::Gateway => "gateway",
        }
    }

    /// Inserts/overwrites the `partitionKey` field so the transmitted
    /// payload routes to `user_id:type`.
    fn with_partition_key(&self, document: &T) -> SyncResult<Value> {
        let mut value = serde_json::to_value(document)?;
        let pk = partition_key(document.user_id(), document.effective_type());
        match value.as_object_mut() {
            Some(obj) => {
                obj.insert("partitionKey".to_string(), Value::String(pk));
            }
            None => {
                return Err(SyncError::Storage(
                    "document did not serialize to a JSON object".to_string(),
                ))
            }
        }
        Ok(value)
    }

    async fn put_document(&self, document: &T) -> SyncResult<()> {
        if document.id().is_empty() {
            return Err(SyncError::InvalidArgument("document id must not be empty".to_string()));
        }
        require_non_empty_user_id(document.user_id())?;
        let body = self.with_partition_key(document)?;
        let pk = partition_key(document.user_id(), document.effective_type());
        let url = self.doc_url(document.id())?;
        self.with_retries(|| {
            let url = url.clone();
            let body = body.clone();
            let pk = pk.clone();
            async move {
                let resp = self
                    .client
                    .put(url)
                    .bearer_auth(&self.token)
                    .header("x-partition-key", &pk)
                    .header("x-connection-mode", self.connection_mode_header())
                    .json(&body)
                    .send()
                    .await?;
                classify_write_response(resp).await
            }
        })
        .await
    }

    async fn with_retries<F, Fut>(&self, mut op: F) -> SyncResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SyncResult<()>>,
    {
        let mut attempt = 0;
        let mut wait = Duration::from_millis(200);
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.options.max_retry_attempts && is_retriable(&err) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "retrying remote write after transient failure");
                    tokio::time::sleep(wait.min(self.options.max_retry_wait)).await;
                    wait *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retriable(err: &SyncError) -> bool {
    match err {
        SyncError::RemoteIo(_) => true,
        SyncError::RemoteAuth { status: Some(429), .. } => true,
        _ => false,
    }
}

async fn classify_write_response(resp: reqwest::Response) -> SyncResult<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    classify_error_response(resp, status).await
}

async fn classify_error_response(resp: reqwest::Response, status: StatusCode) -> SyncError {
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return SyncError::RemoteAuth {
            status: Some(status.as_u16()),
            message: body,
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SyncError::RemoteAuth {
            status: Some(429),
            message: body,
        };
    }
    SyncError::RemoteIo(format!("status {status}: {body}"))
}

/// Decodes each value independently, logging and dropping any that fail
/// rather than failing the whole scan over one bad document.
fn decode_lenient<T: SyncDocument>(values: Vec<Value>) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let id_hint = value.get("id").and_then(Value::as_str).unwrap_or("<unknown>").to_string();
        match serde_json::from_value::<T>(value) {
            Ok(doc) => out.push(doc),
            Err(err) => {
                tracing::warn!(id = %id_hint, error = %err, "skipping malformed remote document");
            }
        }
    }
    out
}

#[async_trait]
impl<T: SyncDocument> DocumentStore<T> for RemoteStore<T> {
    async fn get(&self, id: &str, user_id: &str) -> SyncResult<Option<T>> {
        require_non_empty_user_id(user_id)?;
        let pk = partition_key(user_id, T::KIND);
        let resp = self
            .client
            .get(self.doc_url(id)?)
            .bearer_auth(&self.token)
            .header("x-partition-key", &pk)
            .header("x-connection-mode", self.connection_mode_header())
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_error_response(resp, status).await);
        }
        let value: Value = resp.json().await?;
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn get_by_user(&self, user_id: &str) -> SyncResult<Vec<T>> {
        require_non_empty_user_id(user_id)?;
        let pk = partition_key(user_id, T::KIND);
        let resp = self
            .client
            .get(self.collection_url()?)
            .bearer_auth(&self.token)
            .header("x-connection-mode", self.connection_mode_header())
            .query(&[("partitionKey", pk.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_error_response(resp, status).await);
        }
        let values: Vec<Value> = resp.json().await?;
        Ok(decode_lenient(values))
    }

    async fn get_all(&self) -> SyncResult<Vec<T>> {
        let resp = self
            .client
            .get(self.collection_url()?)
            .bearer_auth(&self.token)
            .header("x-connection-mode", self.connection_mode_header())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_error_response(resp, status).await);
        }
        let values: Vec<Value> = resp.json().await?;
        Ok(decode_lenient(values))
    }

    async fn upsert(&self, document: &T) -> SyncResult<()> {
        self.put_document(document).await
    }

    async fn upsert_bulk(&self, documents: &[T]) -> SyncResult<()> {
        // Concurrent per-document upserts, not a batch-transactional write:
        // failures surface as a composite error naming every id that
        // failed, but documents that succeeded stay upserted on the remote.
        let results = futures::future::join_all(
            documents.iter().map(|d| async move { (d.id().to_string(), self.put_document(d).await) }),
        )
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| format!("{id}: {e}")))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::RemoteIo(format!(
                "bulk upsert failed for {} of {} documents: {}",
                failures.len(),
                documents.len(),
                failures.join("; ")
            )))
        }
    }
}
