use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quote_deck_core::QuoteRecord;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

/// Durable key holding the JSON-encoded quote array.
pub const QUOTES_KEY: &str = "quotes";
/// Durable key holding the selected category filter (plain string).
pub const LAST_FILTER_KEY: &str = "lastCategoryFilter";
/// Session-scoped key holding the stringified last-viewed index.
pub const LAST_INDEX_KEY: &str = "lastQuoteIndex";

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS durable_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_owner (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  session_id TEXT NOT NULL
);
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// SQLite-backed key-value persistence for the quote list and its two pieces
/// of UI state. `durable_state` rows live indefinitely; `session_state` rows
/// belong to one session id and are purged when the store is attached under
/// a different one.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the backing database and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Claim the session table for `session_id`, purging rows left behind by
    /// any other session. Rows survive re-attachment under the same id, which
    /// is what gives the last-viewed pointer its session lifetime.
    ///
    /// # Errors
    /// Returns an error when the ownership handoff cannot be persisted.
    pub fn attach_session(&mut self, session_id: &str) -> Result<()> {
        let owner: Option<String> = self
            .conn
            .query_row("SELECT session_id FROM session_owner WHERE id = 1", [], |row| row.get(0))
            .optional()
            .context("failed to read session owner")?;

        if owner.as_deref() != Some(session_id) {
            let tx = self.conn.transaction().context("failed to start session transaction")?;
            tx.execute("DELETE FROM session_state", [])
                .context("failed to clear previous session state")?;
            tx.execute(
                "INSERT INTO session_owner(id, session_id) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET session_id = excluded.session_id",
                params![session_id],
            )
            .context("failed to record session owner")?;
            tx.commit().context("failed to commit session handoff")?;
        }

        Ok(())
    }

    /// Read the persisted quote list. A missing key or a payload that does
    /// not parse as a JSON array of records yields `None`; only storage-level
    /// failures surface as errors.
    ///
    /// # Errors
    /// Returns an error when the read itself fails.
    pub fn load_quotes(&self) -> Result<Option<Vec<QuoteRecord>>> {
        let Some(raw) = self.read_durable(QUOTES_KEY)? else {
            return Ok(None);
        };
        Ok(serde_json::from_str::<Vec<QuoteRecord>>(&raw).ok())
    }

    /// Serialize the full sequence and replace any prior value under the
    /// fixed key. No partial-write guarantee beyond SQLite's own.
    ///
    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn save_quotes(&mut self, records: &[QuoteRecord]) -> Result<()> {
        let payload =
            serde_json::to_string(records).context("failed to serialize quote records")?;
        self.write_durable(QUOTES_KEY, &payload)
    }

    /// # Errors
    /// Returns an error when the read itself fails.
    pub fn load_last_filter(&self) -> Result<Option<String>> {
        self.read_durable(LAST_FILTER_KEY)
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn save_last_filter(&mut self, category: &str) -> Result<()> {
        self.write_durable(LAST_FILTER_KEY, category)
    }

    /// Read the session-scoped last-viewed pointer. A missing key or a value
    /// that is not a non-negative integer yields `None`.
    ///
    /// # Errors
    /// Returns an error when the read itself fails.
    pub fn load_last_viewed_index(&self) -> Result<Option<usize>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![LAST_INDEX_KEY],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read session key {LAST_INDEX_KEY}"))?;
        Ok(raw.and_then(|value| value.parse::<usize>().ok()))
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn save_last_viewed_index(&mut self, index: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO session_state(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![LAST_INDEX_KEY, index.to_string()],
            )
            .with_context(|| format!("failed to write session key {LAST_INDEX_KEY}"))?;
        Ok(())
    }

    fn read_durable(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM durable_state WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("failed to read durable key {key}"))
    }

    fn write_durable(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO durable_state(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("failed to write durable key {key}"))?;
        Ok(())
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("quote-deck-store-{}.sqlite3", ulid::Ulid::new()))
    }

    fn open_migrated(path: &Path) -> SqliteStore {
        let mut store = match SqliteStore::open(path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("store should migrate: {err}");
        }
        store
    }

    fn quote(text: &str, category: &str) -> QuoteRecord {
        QuoteRecord::new(text, category)
    }

    #[test]
    fn migrate_reaches_the_latest_version() {
        let path = unique_temp_db_path();
        let store = open_migrated(&path);

        let status = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status should read: {err}"),
        };

        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
    }

    #[test]
    fn quotes_round_trip_element_wise() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        let records = vec![quote("a", "X"), quote("b", "Y"), quote("a", "Y")];

        if let Err(err) = store.save_quotes(&records) {
            panic!("quotes should save: {err}");
        }

        let loaded = match store.load_quotes() {
            Ok(Some(loaded)) => loaded,
            Ok(None) => panic!("saved quotes should load"),
            Err(err) => panic!("quotes should load: {err}"),
        };
        assert_eq!(loaded, records);
    }

    #[test]
    fn missing_quotes_key_reads_as_absent() {
        let path = unique_temp_db_path();
        let store = open_migrated(&path);

        let loaded = match store.load_quotes() {
            Ok(loaded) => loaded,
            Err(err) => panic!("load should not fail on a fresh store: {err}"),
        };
        assert!(loaded.is_none());
    }

    #[test]
    fn malformed_quotes_payload_is_swallowed_as_absent() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        if let Err(err) = store.write_durable(QUOTES_KEY, "{\"not\":\"an array\"}") {
            panic!("raw write should succeed: {err}");
        }

        let loaded = match store.load_quotes() {
            Ok(loaded) => loaded,
            Err(err) => panic!("malformed payload should not surface an error: {err}"),
        };
        assert!(loaded.is_none());
    }

    #[test]
    fn last_filter_round_trips_and_overwrites() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);

        if let Err(err) = store.save_last_filter("Life") {
            panic!("filter should save: {err}");
        }
        if let Err(err) = store.save_last_filter("all") {
            panic!("filter should overwrite: {err}");
        }

        let loaded = match store.load_last_filter() {
            Ok(loaded) => loaded,
            Err(err) => panic!("filter should load: {err}"),
        };
        assert_eq!(loaded.as_deref(), Some("all"));
    }

    #[test]
    fn last_viewed_index_survives_the_same_session() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        if let Err(err) = store.attach_session("session-a") {
            panic!("session should attach: {err}");
        }
        if let Err(err) = store.save_last_viewed_index(3) {
            panic!("index should save: {err}");
        }

        drop(store);
        let mut reopened = open_migrated(&path);
        if let Err(err) = reopened.attach_session("session-a") {
            panic!("session should re-attach: {err}");
        }

        let loaded = match reopened.load_last_viewed_index() {
            Ok(loaded) => loaded,
            Err(err) => panic!("index should load: {err}"),
        };
        assert_eq!(loaded, Some(3));
    }

    #[test]
    fn new_session_purges_the_last_viewed_index() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        if let Err(err) = store.attach_session("session-a") {
            panic!("session should attach: {err}");
        }
        if let Err(err) = store.save_last_viewed_index(1) {
            panic!("index should save: {err}");
        }

        if let Err(err) = store.attach_session("session-b") {
            panic!("new session should attach: {err}");
        }

        let loaded = match store.load_last_viewed_index() {
            Ok(loaded) => loaded,
            Err(err) => panic!("index should load: {err}"),
        };
        assert!(loaded.is_none());
    }

    #[test]
    fn quotes_and_filter_survive_a_session_change() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        if let Err(err) = store.attach_session("session-a") {
            panic!("session should attach: {err}");
        }
        if let Err(err) = store.save_quotes(&[quote("a", "X")]) {
            panic!("quotes should save: {err}");
        }
        if let Err(err) = store.save_last_filter("X") {
            panic!("filter should save: {err}");
        }

        if let Err(err) = store.attach_session("session-b") {
            panic!("new session should attach: {err}");
        }

        let quotes = match store.load_quotes() {
            Ok(Some(quotes)) => quotes,
            Ok(None) => panic!("durable quotes should survive a session change"),
            Err(err) => panic!("quotes should load: {err}"),
        };
        assert_eq!(quotes, vec![quote("a", "X")]);

        let filter = match store.load_last_filter() {
            Ok(filter) => filter,
            Err(err) => panic!("filter should load: {err}"),
        };
        assert_eq!(filter.as_deref(), Some("X"));
    }

    #[test]
    fn non_integer_index_value_is_swallowed_as_absent() {
        let path = unique_temp_db_path();
        let mut store = open_migrated(&path);
        if let Err(err) = store.attach_session("session-a") {
            panic!("session should attach: {err}");
        }
        if let Err(err) = store.conn.execute(
            "INSERT INTO session_state(key, value) VALUES (?1, ?2)",
            params![LAST_INDEX_KEY, "not-a-number"],
        ) {
            panic!("raw write should succeed: {err}");
        }

        let loaded = match store.load_last_viewed_index() {
            Ok(loaded) => loaded,
            Err(err) => panic!("index read should not fail: {err}"),
        };
        assert!(loaded.is_none());
    }
}
