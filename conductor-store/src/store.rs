//! Generic SQLite-backed store for any [`Record`] implementor.
//!
//! Single-writer discipline: all access goes through one `Mutex<Connection>`
//! per `Store`, matching the actor-owned-connection pattern used elsewhere
//! in this codebase (state managers serialize access to a single
//! connection rather than pooling). WAL mode is enabled so external readers
//! (the `store` CLI) can inspect the file concurrently.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::record::{Filter, IndexValue, Record, matches_all};

/// A claim record as seen from outside the store.
#[derive(Debug, Clone)]
pub struct ClaimInfo {
    pub id: String,
    pub owner: String,
    pub leased_until: chrono::DateTime<Utc>,
    pub heartbeat_at: chrono::DateTime<Utc>,
    pub revert_count: i64,
}

/// A generic, type-safe persistence layer for one record type `T`.
pub struct Store<T: Record> {
    conn: Mutex<Connection>,
    _marker: PhantomData<T>,
}

impl<T: Record> Store<T> {
    /// Open (creating if necessary) a store backed by the sqlite file at
    /// `path`, ensuring `T`'s tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let store = Self {
            conn: Mutex::new(conn),
            _marker: PhantomData,
        };
        store.ensure_schema()?;
        debug!(table = T::table(), path = %path.display(), "Store::open");
        Ok(store)
    }

    /// Open an in-memory store, primarily for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            _marker: PhantomData,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS {table}_fts USING fts5(id UNINDEXED, body);
             CREATE TABLE IF NOT EXISTS {table}_index (
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (id, field)
             );
             CREATE INDEX IF NOT EXISTS {table}_index_field_value ON {table}_index(field, value);
             CREATE TABLE IF NOT EXISTS {table}_claims (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                leased_until TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL,
                revert_count INTEGER NOT NULL DEFAULT 0
             );"
        ))?;
        Ok(())
    }

    /// Insert or replace a record (full upsert of data, FTS, and index rows).
    pub fn put(&self, record: &T) -> Result<()> {
        let table = T::table();
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let json = serde_json::to_string(record)?;
        let existed: bool = tx
            .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), params![record.id()], |_| Ok(true))
            .optional()?
            .unwrap_or(false);

        if existed {
            tx.execute(
                &format!("UPDATE {table} SET data = ?2, updated_at = ?3 WHERE id = ?1"),
                params![record.id(), json, now],
            )?;
        } else {
            tx.execute(
                &format!("INSERT INTO {table} (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)"),
                params![record.id(), json, now],
            )?;
        }

        tx.execute(&format!("DELETE FROM {table}_fts WHERE id = ?1"), params![record.id()])?;
        let body = record.searchable_text();
        if !body.is_empty() {
            tx.execute(
                &format!("INSERT INTO {table}_fts (id, body) VALUES (?1, ?2)"),
                params![record.id(), body],
            )?;
        }

        tx.execute(&format!("DELETE FROM {table}_index WHERE id = ?1"), params![record.id()])?;
        for field in T::index_fields() {
            if let Some(value) = record.index_value(field) {
                tx.execute(
                    &format!("INSERT INTO {table}_index (id, field, value) VALUES (?1, ?2, ?3)"),
                    params![record.id(), field, value.to_string()],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<T>> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let json: Option<String> = conn
            .query_row(&format!("SELECT data FROM {table} WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, id: &str) -> Result<T> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound {
            table: T::table(),
            id: id.to_string(),
        })
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        conn.execute(&format!("DELETE FROM {table}_fts WHERE id = ?1"), params![id])?;
        conn.execute(&format!("DELETE FROM {table}_index WHERE id = ?1"), params![id])?;
        conn.execute(&format!("DELETE FROM {table}_claims WHERE id = ?1"), params![id])?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<T>> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&format!("SELECT data FROM {table} ORDER BY created_at ASC"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Apply filters by loading full records and evaluating them in Rust.
    ///
    /// Correct for any filter combination; callers with large tables and
    /// selective single-field filters should prefer `query_indexed`.
    pub fn query(&self, filters: &[Filter]) -> Result<Vec<T>> {
        Ok(self.all()?.into_iter().filter(|r| matches_all(r, filters)).collect())
    }

    /// Fast path: a single equality filter resolved via the index table.
    pub fn query_indexed(&self, filter: &Filter) -> Result<Vec<T>> {
        if filter.op != crate::record::FilterOp::Eq {
            return self.query(std::slice::from_ref(filter));
        }
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!(
            "SELECT r.data FROM {table} r JOIN {table}_index i ON i.id = r.id
             WHERE i.field = ?1 AND i.value = ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.field, filter.value.to_string()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// BM25-ranked full text search. Returns `(record, relevance)` pairs,
    /// highest relevance first.
    pub fn search_keywords(&self, query: &str, limit: usize) -> Result<Vec<(T, f64)>> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!(
            "SELECT r.data, bm25({table}_fts) AS rank
             FROM {table}_fts f JOIN {table} r ON r.id = f.id
             WHERE {table}_fts MATCH ?1
             ORDER BY rank ASC
             LIMIT ?2"
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            // A malformed FTS query (e.g. unbalanced quotes) degrades to
            // no results rather than surfacing a syntax error up the stack.
            Err(e) => {
                warn!(error = %e, "search_keywords: failed to prepare FTS query");
                return Ok(Vec::new());
            }
        };
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let rows = match stmt.query_map(params![fts_query, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        }) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "search_keywords: query failed");
                return Ok(Vec::new());
            }
        };
        let mut out = Vec::new();
        for row in rows {
            let (json, bm25) = row?;
            // sqlite's bm25() is a cost (lower = better); flip the sign so
            // callers see a conventional "higher is more relevant" score.
            out.push((serde_json::from_str(&json)?, -bm25));
        }
        Ok(out)
    }

    pub fn delete_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(&format!("SELECT id FROM {table} WHERE created_at < ?1"))?;
            let rows = stmt.query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for id in &ids {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
            conn.execute(&format!("DELETE FROM {table}_fts WHERE id = ?1"), params![id])?;
            conn.execute(&format!("DELETE FROM {table}_index WHERE id = ?1"), params![id])?;
        }
        Ok(ids.len())
    }

    // === Claim / heartbeat / lease (task claiming, §4.1) ===

    /// Atomically claim `id` for `owner`, applying `mutate` to the record
    /// only if the claim succeeds. Returns `false` (no error) if the
    /// record is already leased to someone else and the lease has not
    /// expired -- this is an expected outcome under claim contention, not
    /// a failure.
    pub fn claim<F>(&self, id: &str, owner: &str, lease: chrono::Duration, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut T),
    {
        let table = T::table();
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();

        let json: Option<String> = tx
            .query_row(&format!("SELECT data FROM {table} WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?;
        let Some(json) = json else {
            return Err(StoreError::NotFound {
                table,
                id: id.to_string(),
            });
        };

        let existing: Option<(String, String, i64)> = tx
            .query_row(
                &format!("SELECT owner, leased_until, revert_count FROM {table}_claims WHERE id = ?1"),
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let revert_count = if let Some((_, leased_until, revert_count)) = &existing {
            let leased_until: chrono::DateTime<Utc> =
                chrono::DateTime::parse_from_rfc3339(leased_until).unwrap().with_timezone(&Utc);
            if leased_until > now {
                return Ok(false);
            }
            *revert_count
        } else {
            0
        };

        let mut record: T = serde_json::from_str(&json)?;
        mutate(&mut record);
        let new_json = serde_json::to_string(&record)?;
        tx.execute(
            &format!("UPDATE {table} SET data = ?2, updated_at = ?3 WHERE id = ?1"),
            params![id, new_json, now.to_rfc3339()],
        )?;

        let leased_until = now + lease;
        tx.execute(
            &format!(
                "INSERT INTO {table}_claims (id, owner, leased_until, heartbeat_at, revert_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET owner = ?2, leased_until = ?3, heartbeat_at = ?4"
            ),
            params![id, owner, leased_until.to_rfc3339(), now.to_rfc3339(), revert_count],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Extend a claim's lease. Returns `false` if `owner` does not hold the
    /// current claim.
    pub fn heartbeat(&self, id: &str, owner: &str, lease: chrono::Duration) -> Result<bool> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let current_owner: Option<String> = conn
            .query_row(&format!("SELECT owner FROM {table}_claims WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?;
        if current_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        conn.execute(
            &format!("UPDATE {table}_claims SET leased_until = ?2, heartbeat_at = ?3 WHERE id = ?1"),
            params![id, (now + lease).to_rfc3339(), now.to_rfc3339()],
        )?;
        Ok(true)
    }

    /// Release a claim outright (used on completion/failure).
    pub fn release_claim(&self, id: &str) -> Result<()> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(&format!("DELETE FROM {table}_claims WHERE id = ?1"), params![id])?;
        Ok(())
    }

    pub fn claim_info(&self, id: &str) -> Result<Option<ClaimInfo>> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            &format!("SELECT owner, leased_until, heartbeat_at, revert_count FROM {table}_claims WHERE id = ?1"),
            params![id],
            |row| {
                let owner: String = row.get(0)?;
                let leased_until: String = row.get(1)?;
                let heartbeat_at: String = row.get(2)?;
                let revert_count: i64 = row.get(3)?;
                Ok(ClaimInfo {
                    id: id.to_string(),
                    owner,
                    leased_until: chrono::DateTime::parse_from_rfc3339(&leased_until).unwrap().with_timezone(&Utc),
                    heartbeat_at: chrono::DateTime::parse_from_rfc3339(&heartbeat_at).unwrap().with_timezone(&Utc),
                    revert_count,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// All claims whose lease has expired as of `now`. The caller (Task
    /// Manager's background sweeper) decides whether to revert to pending
    /// or fail outright based on `revert_count`.
    pub fn expired_claims(&self, now: chrono::DateTime<Utc>) -> Result<Vec<ClaimInfo>> {
        let table = T::table();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, owner, leased_until, heartbeat_at, revert_count FROM {table}_claims WHERE leased_until < ?1"
        ))?;
        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            let id: String = row.get(0)?;
            let owner: String = row.get(1)?;
            let leased_until: String = row.get(2)?;
            let heartbeat_at: String = row.get(3)?;
            let revert_count: i64 = row.get(4)?;
            Ok(ClaimInfo {
                id,
                owner,
                leased_until: chrono::DateTime::parse_from_rfc3339(&leased_until).unwrap().with_timezone(&Utc),
                heartbeat_at: chrono::DateTime::parse_from_rfc3339(&heartbeat_at).unwrap().with_timezone(&Utc),
                revert_count,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Clear an expired claim and bump its revert counter; returns the new
    /// count so the caller can compare against its failure threshold.
    pub fn revert_expired_claim(&self, id: &str) -> Result<i64> {
        let table = T::table();
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let prior: i64 = tx
            .query_row(&format!("SELECT revert_count FROM {table}_claims WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?
            .unwrap_or(0);
        tx.execute(&format!("DELETE FROM {table}_claims WHERE id = ?1"), params![id])?;
        tx.commit()?;
        Ok(prior + 1)
    }
}

/// Best-effort conversion of free text into an FTS5 MATCH expression:
/// strip characters FTS5 treats as syntax and OR the remaining terms so a
/// search for any one keyword from a title matches (§8 round-trip law).
fn sanitize_fts_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|t: &String| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    terms.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IndexValue, Record};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: String,
        title: String,
        status: String,
    }

    impl Record for Widget {
        fn table() -> &'static str {
            "widgets"
        }
        fn id(&self) -> &str {
            &self.id
        }
        fn index_fields() -> &'static [&'static str] {
            &["status"]
        }
        fn index_value(&self, field: &str) -> Option<IndexValue> {
            match field {
                "status" => Some(IndexValue::Text(self.status.clone())),
                _ => None,
            }
        }
        fn searchable_text(&self) -> String {
            self.title.clone()
        }
    }

    fn widget(id: &str, title: &str, status: &str) -> Widget {
        Widget {
            id: id.to_string(),
            title: title.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        let w = widget("w1", "Research token bucket algorithms", "pending");
        store.put(&w).unwrap();
        let back = store.get("w1").unwrap().unwrap();
        assert_eq!(back.title, w.title);
        assert_eq!(back.status, w.status);
    }

    #[test]
    fn keyword_search_finds_full_word_from_title() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "Research token bucket algorithms", "pending")).unwrap();
        store.put(&widget("w2", "Migrate authentication to OAuth2", "pending")).unwrap();

        let results = store.search_keywords("bucket", 10).unwrap();
        assert!(results.iter().any(|(r, _)| r.id == "w1"));
        assert!(!results.iter().any(|(r, _)| r.id == "w2"));
    }

    #[test]
    fn query_indexed_filters_by_status() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "a", "pending")).unwrap();
        store.put(&widget("w2", "b", "completed")).unwrap();

        let pending = store
            .query_indexed(&Filter::eq("status", IndexValue::Text("pending".into())))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "w1");
    }

    #[test]
    fn claim_is_exclusive_until_expiry() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "a", "pending")).unwrap();

        let claimed = store
            .claim("w1", "owner-a", chrono::Duration::seconds(60), |w| w.status = "claimed".into())
            .unwrap();
        assert!(claimed);

        // A second claimant is rejected while the lease is active.
        let second = store
            .claim("w1", "owner-b", chrono::Duration::seconds(60), |w| w.status = "claimed".into())
            .unwrap();
        assert!(!second);

        assert_eq!(store.get("w1").unwrap().unwrap().status, "claimed");
    }

    #[test]
    fn expired_claim_is_revertible() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "a", "pending")).unwrap();
        store
            .claim("w1", "owner-a", chrono::Duration::seconds(-1), |w| w.status = "claimed".into())
            .unwrap();

        let expired = store.expired_claims(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);

        let revert_count = store.revert_expired_claim("w1").unwrap();
        assert_eq!(revert_count, 1);
        assert!(store.claim_info("w1").unwrap().is_none());
    }

    #[test]
    fn heartbeat_requires_matching_owner() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "a", "pending")).unwrap();
        store.claim("w1", "owner-a", chrono::Duration::seconds(5), |_| {}).unwrap();

        assert!(!store.heartbeat("w1", "owner-b", chrono::Duration::seconds(5)).unwrap());
        assert!(store.heartbeat("w1", "owner-a", chrono::Duration::seconds(30)).unwrap());
    }

    #[test]
    fn delete_older_than_respects_cutoff() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.put(&widget("w1", "a", "pending")).unwrap();
        let removed = store.delete_older_than(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("w1").unwrap().is_none());
    }
}
