use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quote_deck_core::{QuoteRecord, QuoteStore};
use quote_deck_store_sqlite::SqliteStore;
use serde_json::Value;

/// Fixed category assigned to every record adopted from the remote source.
pub const REMOTE_CATEGORY: &str = "Server";
/// Only the first this-many remote entries are consumed per fetch.
pub const REMOTE_FETCH_LIMIT: usize = 5;
/// The original simulated remote.
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://jsonplaceholder.typicode.com/posts";
/// Recurring sync period.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of one sync cycle. Every variant maps to one fixed user-visible
/// notification message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SyncOutcome {
    Updated,
    UpToDate,
    Failed(String),
}

#[must_use]
pub fn notification_message(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Updated => "Quotes synced with server!",
        SyncOutcome::UpToDate => "Quotes already up to date.",
        SyncOutcome::Failed(_) => "Quote sync failed.",
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), timeout: Duration::from_secs(10) }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_ENDPOINT)
    }
}

/// Map a remote payload to candidate records: the body must be a JSON array;
/// the first [`REMOTE_FETCH_LIMIT`] entries contribute their `title` string
/// as the quote text under the fixed [`REMOTE_CATEGORY`]. Entries without a
/// string `title` are skipped. The mapping is preserved literally from the
/// original simulation, quirks included.
///
/// # Errors
/// Returns [`SyncError::Decode`] when the top level is not an array.
pub fn map_remote_payload(body: &Value) -> Result<Vec<QuoteRecord>, SyncError> {
    let Some(entries) = body.as_array() else {
        return Err(SyncError::Decode("remote payload is not a JSON array".to_string()));
    };

    Ok(entries
        .iter()
        .take(REMOTE_FETCH_LIMIT)
        .filter_map(|entry| entry.get("title").and_then(Value::as_str))
        .map(|title| QuoteRecord::new(title, REMOTE_CATEGORY))
        .collect())
}

/// Remote reconciliation: fetch, additive-only merge, persist-on-change.
pub struct SyncEngine {
    config: RemoteConfig,
    agent: ureq::Agent,
}

impl SyncEngine {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .build();
        Self { config, agent }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// GET the configured endpoint and map the payload.
    ///
    /// # Errors
    /// Returns [`SyncError::Network`] on transport failure or a non-success
    /// status, [`SyncError::Decode`] when the body is not a JSON array.
    pub fn fetch_remote_quotes(&self) -> Result<Vec<QuoteRecord>, SyncError> {
        let response = self
            .agent
            .get(&self.config.endpoint)
            .call()
            .map_err(|err| SyncError::Network(err.to_string()))?;
        let body: Value =
            response.into_json().map_err(|err| SyncError::Decode(err.to_string()))?;
        map_remote_payload(&body)
    }

    /// Best-effort POST of the full local list as a JSON body. The response
    /// is ignored; failures are logged and otherwise indistinguishable from
    /// success to callers.
    pub fn push_local_quotes(&self, records: &[QuoteRecord]) {
        match self.agent.post(&self.config.endpoint).send_json(records) {
            Ok(_) => tracing::debug!(count = records.len(), "pushed local quotes"),
            Err(err) => tracing::warn!("quote push failed: {err}"),
        }
    }

    /// One full cycle: fetch remote candidates, merge them into `store`, and
    /// persist only when the merge changed something; then push the local
    /// list best-effort. A fetch or persist failure leaves the prior
    /// persisted state untouched and never halts future cycles.
    pub fn run_sync_cycle(
        &self,
        store: &mut QuoteStore,
        persistence: &mut SqliteStore,
    ) -> SyncOutcome {
        let remote = match self.fetch_remote_quotes() {
            Ok(remote) => remote,
            Err(err) => {
                tracing::debug!("sync fetch failed: {err}");
                return SyncOutcome::Failed(err.to_string());
            }
        };

        let outcome = apply_remote_quotes(store, persistence, remote);
        self.push_local_quotes(store.records());
        outcome
    }
}

/// Merge already-fetched remote candidates and persist on change. Split out
/// of [`SyncEngine::run_sync_cycle`] so the merge/persist contract is
/// checkable without a live endpoint.
pub fn apply_remote_quotes(
    store: &mut QuoteStore,
    persistence: &mut SqliteStore,
    remote: Vec<QuoteRecord>,
) -> SyncOutcome {
    if !store.merge_external(remote) {
        return SyncOutcome::UpToDate;
    }

    match persistence.save_quotes(store.records()) {
        Ok(()) => {
            tracing::info!(count = store.len(), "adopted remote quotes");
            SyncOutcome::Updated
        }
        Err(err) => SyncOutcome::Failed(format!("failed to persist merged quotes: {err}")),
    }
}

/// Cooperative stop flag shared between the scheduler and its worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Recurring sync driver: one cycle immediately, then one per interval, with
/// no backoff, no jitter, and no retry limit. The original timer ran for the
/// process lifetime with no way to stop it; the explicit token and
/// join-on-stop here are a robustness addition, not a behavior change.
pub struct SyncScheduler {
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Spawn the worker. `cycle` runs once right away and then once per
    /// `interval` until the token is cancelled; its outcome is handed back
    /// for the caller to surface (notifications live with the caller).
    pub fn start<F>(interval: Duration, mut cycle: F) -> Self
    where
        F: FnMut() -> SyncOutcome + Send + 'static,
    {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker = thread::spawn(move || {
            while !worker_token.is_cancelled() {
                let outcome = cycle();
                tracing::debug!(?outcome, "sync cycle finished");

                let mut waited = Duration::ZERO;
                while waited < interval {
                    if worker_token.is_cancelled() {
                        return;
                    }
                    let slice = Duration::from_millis(100).min(interval - waited);
                    thread::sleep(slice);
                    waited += slice;
                }
            }
        });

        Self { token, worker: Some(worker) }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel and join the worker.
    pub fn stop(mut self) {
        self.token.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("quote-deck-sync-{}.sqlite3", ulid::Ulid::new()))
    }

    fn migrated_persistence() -> SqliteStore {
        let mut store = match SqliteStore::open(&unique_temp_db_path()) {
            Ok(store) => store,
            Err(err) => panic!("persistence should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("persistence should migrate: {err}");
        }
        store
    }

    fn quote(text: &str, category: &str) -> QuoteRecord {
        QuoteRecord::new(text, category)
    }

    #[test]
    fn mapping_consumes_the_first_five_titles() {
        let body = serde_json::json!([
            { "id": 1, "title": "one" },
            { "id": 2, "title": "two" },
            { "id": 3, "title": "three" },
            { "id": 4, "title": "four" },
            { "id": 5, "title": "five" },
            { "id": 6, "title": "six" },
        ]);

        let mapped = match map_remote_payload(&body) {
            Ok(mapped) => mapped,
            Err(err) => panic!("payload should map: {err}"),
        };

        assert_eq!(mapped.len(), 5);
        assert_eq!(mapped[0], quote("one", "Server"));
        assert_eq!(mapped[4], quote("five", "Server"));
    }

    #[test]
    fn mapping_assigns_the_fixed_server_category() {
        let body = serde_json::json!([{ "title": "anything", "category": "Ignored" }]);

        let mapped = match map_remote_payload(&body) {
            Ok(mapped) => mapped,
            Err(err) => panic!("payload should map: {err}"),
        };

        assert_eq!(mapped, vec![quote("anything", "Server")]);
    }

    #[test]
    fn mapping_skips_entries_without_a_string_title() {
        let body = serde_json::json!([
            { "title": "kept" },
            { "title": 7 },
            { "body": "no title" },
        ]);

        let mapped = match map_remote_payload(&body) {
            Ok(mapped) => mapped,
            Err(err) => panic!("payload should map: {err}"),
        };

        assert_eq!(mapped, vec![quote("kept", "Server")]);
    }

    #[test]
    fn mapping_rejects_a_non_array_top_level() {
        let body = serde_json::json!({ "not": "an array" });

        let err = match map_remote_payload(&body) {
            Ok(mapped) => panic!("non-array payload should not map: {mapped:?}"),
            Err(err) => err,
        };

        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn apply_remote_adopts_missing_records_and_persists() {
        let mut persistence = migrated_persistence();
        let mut store = QuoteStore::from_records(vec![quote("local", "Life")]);

        let outcome =
            apply_remote_quotes(&mut store, &mut persistence, vec![quote("r1", "Server")]);

        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(store.len(), 2);

        let persisted = match persistence.load_quotes() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => panic!("updated outcome should persist the store"),
            Err(err) => panic!("persisted quotes should load: {err}"),
        };
        assert_eq!(persisted, store.records());
    }

    #[test]
    fn apply_remote_reports_up_to_date_without_persisting() {
        let mut persistence = migrated_persistence();
        let mut store = QuoteStore::from_records(vec![quote("r1", "Server")]);

        let outcome =
            apply_remote_quotes(&mut store, &mut persistence, vec![quote("r1", "Server")]);

        assert_eq!(outcome, SyncOutcome::UpToDate);
        assert_eq!(store.len(), 1);

        let persisted = match persistence.load_quotes() {
            Ok(persisted) => persisted,
            Err(err) => panic!("load should not fail: {err}"),
        };
        assert!(persisted.is_none(), "up-to-date outcome must not issue a persist call");
    }

    #[test]
    fn unreachable_endpoint_reports_failed_and_leaves_store_untouched() {
        let mut persistence = migrated_persistence();
        let mut store = QuoteStore::from_records(vec![quote("local", "Life")]);
        let engine = SyncEngine::new(RemoteConfig {
            endpoint: "http://127.0.0.1:9/posts".to_string(),
            timeout: Duration::from_millis(500),
        });

        let outcome = engine.run_sync_cycle(&mut store, &mut persistence);

        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(store.records(), &[quote("local", "Life")]);
    }

    #[test]
    fn notification_messages_are_fixed() {
        assert_eq!(notification_message(&SyncOutcome::Updated), "Quotes synced with server!");
        assert_eq!(notification_message(&SyncOutcome::UpToDate), "Quotes already up to date.");
        assert_eq!(
            notification_message(&SyncOutcome::Failed("reason".to_string())),
            "Quote sync failed."
        );
    }

    #[test]
    fn scheduler_runs_immediately_and_stops_on_cancel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let scheduler = SyncScheduler::start(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SyncOutcome::UpToDate
        });

        thread::sleep(Duration::from_millis(120));
        scheduler.stop();
        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected an immediate run plus timer ticks, got {after_stop}");

        thread::sleep(Duration::from_millis(60));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop, "cancelled worker must not tick");
    }
}
