use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sync_engine::{DocumentStore, SyncError, SyncResult, SyncDocument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(rename = "lastModified")]
    pub last_modified: Option<DateTime<Utc>>,
    pub content: String,
}

impl SyncDocument for Item {
    const KIND: &'static str = "Item";
    fn id(&self) -> &str {
        &self.id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn doc_type(&self) -> &str {
        &self.doc_type
    }
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }
}

pub fn item(id: &str, user: &str, secs: i64, content: &str) -> Item {
    use chrono::TimeZone;
    Item {
        id: id.to_string(),
        user_id: user.to_string(),
        doc_type: "Item".to_string(),
        last_modified: Some(Utc.timestamp_opt(secs, 0).unwrap()),
        content: content.to_string(),
    }
}

/// Minimal in-memory `DocumentStore`, standing in for a remote adapter in
/// tests that exercise the sync engine's reconciliation logic without any
/// network machinery (SPEC_FULL.md §10.4 "in-memory test doubles").
#[derive(Default, Clone)]
pub struct InMemoryStore {
    docs: Arc<Mutex<HashMap<String, Item>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(self, docs: impl IntoIterator<Item = Item>) -> Self {
        {
            let mut guard = self.docs.lock().unwrap();
            for d in docs {
                guard.insert(d.id.clone(), d);
            }
        }
        self
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.docs.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl DocumentStore<Item> for InMemoryStore {
    async fn get(&self, id: &str, user_id: &str) -> SyncResult<Option<Item>> {
        if user_id.is_empty() {
            return Err(SyncError::InvalidArgument("user_id must not be empty".to_string()));
        }
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn get_by_user(&self, user_id: &str) -> SyncResult<Vec<Item>> {
        if user_id.is_empty() {
            return Err(SyncError::InvalidArgument("user_id must not be empty".to_string()));
        }
        Ok(self
            .docs
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> SyncResult<Vec<Item>> {
        Ok(self.docs.lock().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, document: &Item) -> SyncResult<()> {
        if document.id.is_empty() || document.user_id.is_empty() {
            return Err(SyncError::InvalidArgument("id and user_id must not be empty".to_string()));
        }
        self.docs.lock().unwrap().insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn upsert_bulk(&self, documents: &[Item]) -> SyncResult<()> {
        for d in documents {
            self.upsert(d).await?;
        }
        Ok(())
    }
}
