use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quote_deck_core::{
    CategoryFilter, FilterEngine, QuoteError, QuoteRecord, QuoteStore, ALL_CATEGORIES,
};
use quote_deck_store_sqlite::SqliteStore;
use quote_deck_sync::{notification_message, RemoteConfig, SyncEngine, SyncOutcome};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddQuoteResult {
    pub record: QuoteRecord,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShownQuote {
    pub text: String,
    pub category: String,
    /// Index into the FULL store, not the filtered view.
    pub index: usize,
    pub rendered: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterResult {
    pub selected: String,
    pub matching: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoriesView {
    pub available: Vec<String>,
    pub selected: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportResult {
    pub path: String,
    pub exported: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped_existing: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: String,
    pub reason: Option<String>,
    pub notification: String,
    pub total: usize,
}

fn rendered(record: &QuoteRecord) -> String {
    format!("\"{}\" ({})", record.text, record.category)
}

fn shown(record: &QuoteRecord, index: usize) -> ShownQuote {
    ShownQuote {
        text: record.text.clone(),
        category: record.category.clone(),
        index,
        rendered: rendered(record),
    }
}

/// Application façade wiring the quote store, the filter state, the
/// persistence adapter, and the sync engine together. One instance owns the
/// canonical in-memory list for its lifetime; every mutation persists before
/// returning.
pub struct QuoteDeckApi {
    store: QuoteStore,
    filter: FilterEngine,
    persistence: SqliteStore,
    last_viewed: Option<usize>,
}

impl QuoteDeckApi {
    /// Open (and migrate) the backing database, claim the session, and
    /// restore state: the persisted quote list (or the built-in seed pair
    /// when nothing usable is stored), the persisted filter selection
    /// verbatim, and the session's last-viewed pointer with stale indexes
    /// dropped.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, migrated, or
    /// read. Malformed persisted payloads are not errors; they fall back to
    /// defaults.
    pub fn open(db_path: &Path, session_id: &str) -> Result<Self> {
        let mut persistence = SqliteStore::open(db_path)?;
        persistence.migrate()?;
        persistence.attach_session(session_id)?;

        let store = match persistence.load_quotes()? {
            Some(records) => QuoteStore::from_records(records),
            None => QuoteStore::seeded(),
        };

        let filter = match persistence.load_last_filter()? {
            Some(raw) => FilterEngine::restored(CategoryFilter::parse(&raw)),
            None => FilterEngine::new(),
        };

        let last_viewed =
            persistence.load_last_viewed_index()?.filter(|index| *index < store.len());

        Ok(Self { store, filter, persistence, last_viewed })
    }

    #[must_use]
    pub fn records(&self) -> &[QuoteRecord] {
        self.store.records()
    }

    /// Trim, validate, append (the direct add path never dedups), persist.
    ///
    /// # Errors
    /// Returns an error when validation fails or the persist fails; the
    /// store is left unchanged on validation failure.
    pub fn add_quote(&mut self, text: &str, category: &str) -> Result<AddQuoteResult> {
        let record = QuoteRecord::new(text.trim(), category.trim());
        record.validate().map_err(|err| anyhow!("cannot add quote: {err}"))?;

        self.store.add(record.clone());
        self.persistence.save_quotes(self.store.records())?;

        Ok(AddQuoteResult { record, total: self.store.len() })
    }

    /// Pick a random record from the current filtered view and remember it
    /// as the last-viewed record (pointer saved against the full store).
    /// `None` means the view is empty ("no quotes available", not an error).
    ///
    /// # Errors
    /// Returns an error when the pointer cannot be persisted.
    pub fn show_random(&mut self) -> Result<Option<ShownQuote>> {
        let candidates: Vec<usize> = self
            .store
            .records()
            .iter()
            .enumerate()
            .filter(|(_, record)| self.filter.matches(record))
            .map(|(index, _)| index)
            .collect();

        let Some(choice) = pick(&candidates) else {
            return Ok(None);
        };

        self.persistence.save_last_viewed_index(choice)?;
        self.last_viewed = Some(choice);

        let record = &self.store.records()[choice];
        Ok(Some(shown(record, choice)))
    }

    /// Re-render the most recently displayed record, if the session still
    /// has a valid pointer.
    #[must_use]
    pub fn show_last(&self) -> Option<ShownQuote> {
        let index = self.last_viewed?;
        let record = self.store.records().get(index)?;
        Some(shown(record, index))
    }

    /// Update the selected category and persist it immediately. `"all"`
    /// always succeeds; a named category must exist in the store at
    /// selection time (the original selector could only offer existing
    /// values).
    ///
    /// # Errors
    /// Returns an error for an unknown named category or a failed persist.
    pub fn set_filter(&mut self, raw: &str) -> Result<FilterResult> {
        let filter = CategoryFilter::parse(raw);
        if let CategoryFilter::Named(category) = &filter {
            if !self.store.categories().iter().any(|known| known == category) {
                return Err(anyhow!("{}", QuoteError::UnknownCategory(category.clone())));
            }
        }

        self.filter.select(filter);
        self.persistence.save_last_filter(self.filter.selected().as_str())?;

        Ok(FilterResult {
            selected: self.filter.selected().as_str().to_string(),
            matching: self.filter.current_view(&self.store).len(),
        })
    }

    /// Selector contents plus the value to restore into it: the stored
    /// selection when it is still offered, else the `"all"` fallback. The
    /// raw filter state itself is left untouched (a stale selection keeps
    /// degrading to an empty view).
    #[must_use]
    pub fn categories_view(&self) -> CategoriesView {
        let available = FilterEngine::available_categories(&self.store);
        let stored = self.filter.selected().as_str();
        let selected = if available.iter().any(|value| value == stored) {
            stored.to_string()
        } else {
            ALL_CATEGORIES.to_string()
        };

        CategoriesView { available, selected }
    }

    #[must_use]
    pub fn current_view(&self) -> Vec<&QuoteRecord> {
        self.filter.current_view(&self.store)
    }

    /// Write all records as a pretty-printed JSON array.
    ///
    /// # Errors
    /// Returns an error when serialization or the file write fails.
    pub fn export_json(&self, path: &Path) -> Result<ExportResult> {
        let payload = serde_json::to_string_pretty(self.store.records())
            .context("failed to serialize quotes for export")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write export file {}", path.display()))?;

        Ok(ExportResult { path: path.display().to_string(), exported: self.store.len() })
    }

    /// Import a JSON file: the top level must be an array of
    /// `{text, category}` records, decoded all-or-nothing, then merged with
    /// the usual dedup rule and persisted when anything was adopted. A file
    /// that fails to parse makes no changes.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not a JSON array of
    /// records, or the persist fails.
    pub fn import_json(&mut self, path: &Path) -> Result<ImportSummary> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read import file {}", path.display()))?;
        let candidates: Vec<QuoteRecord> = serde_json::from_str(&body).map_err(|err| {
            anyhow!("invalid quotes file: expected a JSON array of {{text, category}} records: {err}")
        })?;

        let candidate_count = candidates.len();
        let before = self.store.len();
        let changed = self.store.merge_external(candidates);
        if changed {
            self.persistence.save_quotes(self.store.records())?;
        }

        let imported = self.store.len() - before;
        Ok(ImportSummary {
            imported,
            skipped_existing: candidate_count - imported,
            total: self.store.len(),
        })
    }

    /// Run one sync cycle against `remote` and report the outcome together
    /// with its fixed notification message.
    #[must_use]
    pub fn sync_once(&mut self, remote: &RemoteConfig) -> SyncReport {
        let engine = SyncEngine::new(remote.clone());
        let outcome = engine.run_sync_cycle(&mut self.store, &mut self.persistence);
        self.report(&outcome)
    }

    /// Run one cycle with an already-constructed engine (the watch loop
    /// reuses one engine across ticks).
    #[must_use]
    pub fn sync_with(&mut self, engine: &SyncEngine) -> SyncReport {
        let outcome = engine.run_sync_cycle(&mut self.store, &mut self.persistence);
        self.report(&outcome)
    }

    fn report(&self, outcome: &SyncOutcome) -> SyncReport {
        let (label, reason) = match outcome {
            SyncOutcome::Updated => ("updated", None),
            SyncOutcome::UpToDate => ("up_to_date", None),
            SyncOutcome::Failed(reason) => ("failed", Some(reason.clone())),
        };

        SyncReport {
            outcome: label.to_string(),
            reason,
            notification: notification_message(outcome).to_string(),
            total: self.store.len(),
        }
    }
}

fn pick(candidates: &[usize]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let slot = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[slot])
}
