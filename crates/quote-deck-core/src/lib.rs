use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QuoteError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// One stored quote. Equality is `(text, category)` pair equality; there is
/// no separate identifier, so two records with the same pair are the same
/// record as far as deduplication is concerned.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct QuoteRecord {
    pub text: String,
    pub category: String,
}

impl QuoteRecord {
    #[must_use]
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self { text: text.into(), category: category.into() }
    }

    /// Validate a record on the interactive add path.
    ///
    /// # Errors
    /// Returns [`QuoteError::Validation`] when text or category is blank.
    pub fn validate(&self) -> Result<(), QuoteError> {
        if self.text.trim().is_empty() {
            return Err(QuoteError::Validation("quote text MUST be non-empty".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(QuoteError::Validation("quote category MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Ordered, owned collection of quote records. Insertion order is
/// significant: it drives random-selection enumeration and the
/// first-appearance order of the category list.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct QuoteStore {
    records: Vec<QuoteRecord>,
}

impl QuoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    #[must_use]
    pub fn from_records(records: Vec<QuoteRecord>) -> Self {
        Self { records }
    }

    /// The two built-in records used when nothing has been persisted yet.
    #[must_use]
    pub fn seeded() -> Self {
        Self::from_records(vec![
            QuoteRecord::new(
                "The best way to get started is to quit talking and begin doing.",
                "Motivation",
            ),
            QuoteRecord::new(
                "Life is what happens when you're busy making other plans.",
                "Life",
            ),
        ])
    }

    /// Append unconditionally. The direct add path performs no dedup check;
    /// only the import and merge paths do. Persisting afterwards is the
    /// caller's job.
    pub fn add(&mut self, record: QuoteRecord) {
        self.records.push(record);
    }

    /// Additive-only merge: append each candidate, in the order given, iff no
    /// record already in the store (including candidates appended earlier in
    /// this same call) is equal to it. Local records are never removed or
    /// replaced. Returns whether at least one candidate was appended.
    pub fn merge_external<I>(&mut self, candidates: I) -> bool
    where
        I: IntoIterator<Item = QuoteRecord>,
    {
        let mut changed = false;
        for candidate in candidates {
            if !self.records.contains(&candidate) {
                self.records.push(candidate);
                changed = true;
            }
        }
        changed
    }

    #[must_use]
    pub fn records(&self) -> &[QuoteRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, record: &QuoteRecord) -> bool {
        self.records.contains(record)
    }

    /// Distinct category values in order of first appearance.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for record in &self.records {
            if !seen.iter().any(|category| category == &record.category) {
                seen.push(record.category.clone());
            }
        }
        seen
    }
}

/// The selector sentinel for "no category filter".
pub const ALL_CATEGORIES: &str = "all";

/// Currently selected category filter. The wire/storage form is the plain
/// string `"all"` or a category value.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum CategoryFilter {
    All,
    Named(String),
}

impl CategoryFilter {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == ALL_CATEGORIES {
            Self::All
        } else {
            Self::Named(value.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_CATEGORIES,
            Self::Named(category) => category,
        }
    }
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self::All
    }
}

/// Owns the selected-category state and derives filtered views of a store.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FilterEngine {
    selected: CategoryFilter,
}

impl FilterEngine {
    #[must_use]
    pub fn new() -> Self {
        Self { selected: CategoryFilter::All }
    }

    /// Restore a previously persisted selection verbatim. A stale value (one
    /// naming a category no longer present) is tolerated; it degrades to an
    /// empty view rather than being rewritten.
    #[must_use]
    pub fn restored(selected: CategoryFilter) -> Self {
        Self { selected }
    }

    pub fn select(&mut self, filter: CategoryFilter) {
        self.selected = filter;
    }

    #[must_use]
    pub fn selected(&self) -> &CategoryFilter {
        &self.selected
    }

    #[must_use]
    pub fn matches(&self, record: &QuoteRecord) -> bool {
        match &self.selected {
            CategoryFilter::All => true,
            CategoryFilter::Named(category) => &record.category == category,
        }
    }

    /// All records when `All` is selected, otherwise the order-preserving
    /// subsequence with a matching category. An empty result is a valid
    /// state, not an error.
    #[must_use]
    pub fn current_view<'a>(&self, store: &'a QuoteStore) -> Vec<&'a QuoteRecord> {
        store.records().iter().filter(|record| self.matches(record)).collect()
    }

    /// Selector contents: the `"all"` sentinel followed by the store's
    /// categories in first-appearance order.
    #[must_use]
    pub fn available_categories(store: &QuoteStore) -> Vec<String> {
        let mut values = vec![ALL_CATEGORIES.to_string()];
        values.extend(store.categories());
        values
    }
}
