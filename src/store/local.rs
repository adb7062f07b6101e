use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::document::SyncDocument;
use crate::error::{SyncError, SyncResult};
use crate::store::{require_non_empty_user_id, DocumentStore, LocalWrite};

/// Crash-safe embedded store. One instance per document kind `T`, backed by
/// a pooled SQLite connection so every operation gets its own short-lived
/// transaction.
///
/// Schema, per kind:
/// - `{Kind}s(id TEXT PRIMARY KEY, payload TEXT, last_modified TEXT, user_id TEXT)`
/// - `PendingChanges_{Kind}s(id TEXT PRIMARY KEY)`
#[derive(Clone)]
pub struct LocalStore<T: SyncDocument> {
    pool: Arc<Pool<SqliteConnectionManager>>,
    documents_table: String,
    pending_table: String,
    _kind: PhantomData<T>,
}

impl<T: SyncDocument> LocalStore<T> {
    /// Opens (creating if absent) the embedded database at `path` and
    /// ensures this kind's tables exist, migrating a documents table that
    /// predates user scoping by adding the `user_id` column in place.
    pub fn open(path: &str) -> SyncResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| SyncError::Storage(format!("failed to open {path}: {e}")))?;
        Self::from_pool(pool)
    }

    /// In-memory store sharing one connection across the pool; handy for
    /// tests where a file-backed store would be unnecessary overhead.
    pub fn open_in_memory() -> SyncResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| SyncError::Storage(format!("failed to open in-memory store: {e}")))?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> SyncResult<Self> {
        let documents_table = format!("{}s", T::KIND);
        let pending_table = format!("PendingChanges_{}s", T::KIND);
        let store = Self {
            pool: Arc::new(pool),
            documents_table,
            pending_table,
            _kind: PhantomData,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SyncResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{docs}\" (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                last_modified TEXT,
                user_id TEXT
            );
            CREATE INDEX IF NOT EXISTS \"idx_{docs}_user_id\" ON \"{docs}\"(user_id);
            CREATE TABLE IF NOT EXISTS \"{pending}\" (
                id TEXT PRIMARY KEY
            );",
            docs = self.documents_table,
            pending = self.pending_table,
        ))?;

        // Backward compatibility: a documents table that predates user
        // scoping won't have a user_id column at all (CREATE TABLE IF NOT
        // EXISTS above is a no-op against it). Add the column in place.
        let has_user_id: bool = {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", self.documents_table))?;
            let mut rows = stmt.query([])?;
            let mut found = false;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                if name == "user_id" {
                    found = true;
                    break;
                }
            }
            found
        };
        if !has_user_id {
            conn.execute(
                &format!("ALTER TABLE \"{}\" ADD COLUMN user_id TEXT", self.documents_table),
                [],
            )?;
        }
        Ok(())
    }

    async fn with_conn<F, R>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&rusqlite::Connection) -> SyncResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| SyncError::Storage(format!("blocking task panicked: {e}")))?
    }

    fn decode_row(payload: &str) -> SyncResult<T> {
        Ok(serde_json::from_str(payload)?)
    }

    /// `user_id = ?` matching the indexed column, falling back to the
    /// camelCase/PascalCase owner field inside the JSON payload for rows
    /// written before the column existed.
    fn user_scope_clause() -> &'static str {
        "(user_id = ?1 OR (user_id IS NULL AND (
            json_extract(payload, '$.userId') = ?1 OR json_extract(payload, '$.UserId') = ?1
        )))"
    }
}

#[async_trait]
impl<T: SyncDocument> DocumentStore<T> for LocalStore<T> {
    async fn get(&self, id: &str, user_id: &str) -> SyncResult<Option<T>> {
        require_non_empty_user_id(user_id)?;
        let id = id.to_string();
        let user_id = user_id.to_string();
        let docs = self.documents_table.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT payload FROM \"{docs}\" WHERE id = ?2 AND {scope}",
                docs = docs,
                scope = Self::user_scope_clause(),
            );
            let payload: Option<String> = conn
                .query_row(&sql, params![user_id, id], |row| row.get(0))
                .optional()?;
            payload.map(|p| Self::decode_row(&p)).transpose()
        })
        .await
    }

    async fn get_by_user(&self, user_id: &str) -> SyncResult<Vec<T>> {
        require_non_empty_user_id(user_id)?;
        let user_id = user_id.to_string();
        let docs = self.documents_table.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT payload FROM \"{docs}\" WHERE {scope}",
                docs = docs,
                scope = Self::user_scope_clause(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Self::decode_row(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_all(&self) -> SyncResult<Vec<T>> {
        let docs = self.documents_table.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT payload FROM \"{docs}\"");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Self::decode_row(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert(&self, document: &T) -> SyncResult<()> {
        self.upsert_marked(document, true).await
    }

    async fn upsert_bulk(&self, documents: &[T]) -> SyncResult<()> {
        self.upsert_bulk_marked(documents, true).await
    }

    async fn get_pending(&self) -> SyncResult<Vec<T>> {
        let docs = self.documents_table.clone();
        let pending = self.pending_table.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT d.payload FROM \"{docs}\" d JOIN \"{pending}\" p ON d.id = p.id",
                docs = docs,
                pending = pending,
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Self::decode_row(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_pending_for_user(&self, user_id: &str) -> SyncResult<Vec<T>> {
        require_non_empty_user_id(user_id)?;
        let user_id = user_id.to_string();
        let docs = self.documents_table.clone();
        let pending = self.pending_table.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT d.payload FROM \"{docs}\" d JOIN \"{pending}\" p ON d.id = p.id WHERE {scope}",
                docs = docs,
                pending = pending,
                scope = Self::user_scope_clause(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Self::decode_row(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn remove_pending(&self, id: &str) -> SyncResult<()> {
        let id = id.to_string();
        let pending = self.pending_table.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("DELETE FROM \"{pending}\" WHERE id = ?1", pending = pending),
                params![id],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl<T: SyncDocument> LocalWrite<T> for LocalStore<T> {
    async fn upsert_marked(&self, document: &T, mark_pending: bool) -> SyncResult<()> {
        if document.id().is_empty() {
            return Err(SyncError::InvalidArgument("document id must not be empty".to_string()));
        }
        if document.user_id().is_empty() {
            return Err(SyncError::InvalidArgument("document user_id must not be empty".to_string()));
        }
        let payload = serde_json::to_string(document)?;
        let id = document.id().to_string();
        let user_id = document.user_id().to_string();
        let last_modified = document.last_modified().map(|t| t.to_rfc3339());
        let docs = self.documents_table.clone();
        let pending = self.pending_table.clone();
        self.with_conn(move |conn| {
            write_upsert(conn, &docs, &pending, &id, &payload, last_modified.as_deref(), &user_id, mark_pending)
        })
        .await
    }

    async fn upsert_bulk_marked(&self, documents: &[T], mark_pending: bool) -> SyncResult<()> {
        for document in documents {
            if document.id().is_empty() || document.user_id().is_empty() {
                return Err(SyncError::InvalidArgument(
                    "bulk upsert requires every document to have id and user_id".to_string(),
                ));
            }
        }
        let rows = documents
            .iter()
            .map(|d| {
                Ok::<_, SyncError>((
                    d.id().to_string(),
                    serde_json::to_string(d)?,
                    d.last_modified().map(|t| t.to_rfc3339()),
                    d.user_id().to_string(),
                ))
            })
            .collect::<SyncResult<Vec<_>>>()?;
        let docs = self.documents_table.clone();
        let pending = self.pending_table.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for (id, payload, last_modified, user_id) in &rows {
                write_upsert(&tx, &docs, &pending, id, payload, last_modified.as_deref(), user_id, mark_pending)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn write_upsert(
    conn: &rusqlite::Connection,
    docs: &str,
    pending: &str,
    id: &str,
    payload: &str,
    last_modified: Option<&str>,
    user_id: &str,
    mark_pending: bool,
) -> SyncResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO \"{docs}\" (id, payload, last_modified, user_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload,
                                           last_modified = excluded.last_modified,
                                           user_id = excluded.user_id",
            docs = docs,
        ),
        params![id, payload, last_modified, user_id],
    )?;
    if mark_pending {
        conn.execute(
            &format!(
                "INSERT INTO \"{pending}\" (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
                pending = pending,
            ),
            params![id],
        )?;
    }
    Ok(())
}
