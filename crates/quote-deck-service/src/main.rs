use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use quote_deck_core::{QuoteRecord, QuoteStore};
use serde::{Deserialize, Serialize};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

/// Self-hostable remote quote source. `GET /v1/quotes` serves post-shaped
/// entries whose `title` field carries the quote text, matching the wire
/// shape the sync engine consumes; `POST /v1/quotes` adopts pushed records
/// additively (clients treat the response as fire-and-forget).
#[derive(Debug, Parser)]
#[command(name = "quote-deck-service")]
#[command(about = "Remote quote source for QuoteDeck")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4015")]
    bind: SocketAddr,
    /// Optional JSON seed file: an array of {text, category} records.
    #[arg(long)]
    quotes: Option<PathBuf>,
}

#[derive(Clone)]
struct ServiceState {
    quotes: Arc<Mutex<QuoteStore>>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct RemoteEntry {
    id: usize,
    title: String,
    category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PushResponse {
    accepted: usize,
    changed: bool,
    total: usize,
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope { service_contract_version: SERVICE_CONTRACT_VERSION, data }
}

fn default_quotes() -> QuoteStore {
    QuoteStore::from_records(vec![
        QuoteRecord::new("Well begun is half done.", "Server"),
        QuoteRecord::new("What we think, we become.", "Server"),
        QuoteRecord::new("Quality is not an act, it is a habit.", "Server"),
    ])
}

fn load_seed_quotes(path: &Path) -> Result<QuoteStore> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let records: Vec<QuoteRecord> = serde_json::from_str(&body)
        .map_err(|err| anyhow!("seed file must be a JSON array of records: {err}"))?;
    Ok(QuoteStore::from_records(records))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/quotes", get(list_quotes).post(push_quotes))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let quotes = match args.quotes.as_ref() {
        Some(path) => load_seed_quotes(path)?,
        None => default_quotes(),
    };
    let state = ServiceState { quotes: Arc::new(Mutex::new(quotes)) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn list_quotes(State(state): State<ServiceState>) -> Json<Vec<RemoteEntry>> {
    let quotes = state.quotes.lock().unwrap_or_else(PoisonError::into_inner);
    let entries = quotes
        .records()
        .iter()
        .enumerate()
        .map(|(index, record)| RemoteEntry {
            id: index + 1,
            title: record.text.clone(),
            category: record.category.clone(),
        })
        .collect();
    Json(entries)
}

async fn push_quotes(
    State(state): State<ServiceState>,
    Json(records): Json<Vec<QuoteRecord>>,
) -> (StatusCode, Json<ServiceEnvelope<PushResponse>>) {
    let accepted = records.len();
    let mut quotes = state.quotes.lock().unwrap_or_else(PoisonError::into_inner);
    let changed = quotes.merge_external(records);
    let response = PushResponse { accepted, changed, total: quotes.len() };
    (StatusCode::CREATED, Json(envelope(response)))
}
