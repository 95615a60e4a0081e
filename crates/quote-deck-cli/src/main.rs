use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quote_deck_api::QuoteDeckApi;
use quote_deck_store_sqlite::SqliteStore;
use quote_deck_sync::{RemoteConfig, SyncEngine, SyncOutcome, SyncScheduler};
use serde_json::Value;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const SESSION_ENV_VAR: &str = "QUOTE_DECK_SESSION";

#[derive(Debug, Parser)]
#[command(name = "qd")]
#[command(about = "QuoteDeck CLI")]
struct Cli {
    #[arg(long, default_value = "./quote_deck.sqlite3")]
    db: PathBuf,

    /// Remote quote endpoint used by sync and watch.
    #[arg(long)]
    remote: Option<String>,

    /// Session id; falls back to QUOTE_DECK_SESSION, else a fresh id per run.
    #[arg(long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Show(ShowArgs),
    Add(AddArgs),
    List,
    Categories,
    Filter {
        #[command(subcommand)]
        command: FilterCommand,
    },
    Export(ExportArgs),
    Import(ImportArgs),
    Sync,
    Watch(WatchArgs),
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Re-render the session's last-viewed quote instead of drawing a new one.
    #[arg(long, default_value_t = false)]
    last: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    category: String,
}

#[derive(Debug, Subcommand)]
enum FilterCommand {
    Show,
    Set { category: String },
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, default_value = "quotes.json")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, default_value_t = 30)]
    interval_secs: u64,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let session_id = resolve_session_id(cli.session.as_deref());
    let remote = resolve_remote(cli.remote.as_deref());

    match cli.command {
        Command::Show(args) => {
            let mut api = open_api(&cli.db, &session_id)?;
            run_show(&args, &mut api)
        }
        Command::Add(args) => {
            let mut api = open_api(&cli.db, &session_id)?;
            let added = api.add_quote(&args.text, &args.category)?;
            emit_json(serde_json::to_value(&added).context("failed to serialize add result")?)
        }
        Command::List => {
            let api = open_api(&cli.db, &session_id)?;
            emit_json(serde_json::json!({
                "records": api.records(),
                "total": api.records().len(),
            }))
        }
        Command::Categories => {
            let api = open_api(&cli.db, &session_id)?;
            let view = api.categories_view();
            emit_json(serde_json::to_value(&view).context("failed to serialize categories")?)
        }
        Command::Filter { command } => {
            let mut api = open_api(&cli.db, &session_id)?;
            run_filter(command, &mut api)
        }
        Command::Export(args) => {
            let api = open_api(&cli.db, &session_id)?;
            let exported = api.export_json(&args.out)?;
            emit_json(serde_json::to_value(&exported).context("failed to serialize export result")?)
        }
        Command::Import(args) => {
            let mut api = open_api(&cli.db, &session_id)?;
            let summary = api.import_json(&args.input)?;
            emit_json(
                serde_json::to_value(&summary).context("failed to serialize import summary")?,
            )
        }
        Command::Sync => {
            let mut api = open_api(&cli.db, &session_id)?;
            let report = api.sync_once(&remote);
            emit_json(serde_json::to_value(&report).context("failed to serialize sync report")?)
        }
        Command::Watch(args) => run_watch(&args, &cli.db, &session_id, remote),
        Command::Db { command } => run_db(command, &cli.db),
    }
}

fn open_api(db: &Path, session_id: &str) -> Result<QuoteDeckApi> {
    QuoteDeckApi::open(db, session_id)
}

fn resolve_session_id(flag: Option<&str>) -> String {
    if let Some(session) = flag {
        return session.to_string();
    }
    match std::env::var(SESSION_ENV_VAR) {
        Ok(session) if !session.trim().is_empty() => session,
        _ => Ulid::new().to_string(),
    }
}

fn resolve_remote(flag: Option<&str>) -> RemoteConfig {
    flag.map_or_else(RemoteConfig::default, RemoteConfig::new)
}

fn run_show(args: &ShowArgs, api: &mut QuoteDeckApi) -> Result<()> {
    let shown = if args.last { api.show_last() } else { api.show_random()? };
    match shown {
        Some(quote) => emit_json(serde_json::json!({ "quote": quote })),
        None => {
            let message = if args.last {
                "no quote viewed yet in this session"
            } else {
                "no quotes available for this filter"
            };
            emit_json(serde_json::json!({ "quote": Value::Null, "message": message }))
        }
    }
}

fn run_filter(command: FilterCommand, api: &mut QuoteDeckApi) -> Result<()> {
    match command {
        FilterCommand::Show => {
            let view = api.categories_view();
            emit_json(serde_json::json!({
                "selected": view.selected,
                "available": view.available,
                "matching": api.current_view().len(),
            }))
        }
        FilterCommand::Set { category } => {
            let result = api.set_filter(&category)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize filter result")?)
        }
    }
}

fn run_watch(args: &WatchArgs, db: &Path, session_id: &str, remote: RemoteConfig) -> Result<()> {
    init_tracing();

    let api = Arc::new(Mutex::new(open_api(db, session_id)?));
    let engine = SyncEngine::new(remote);
    tracing::info!(
        endpoint = engine.endpoint(),
        interval_secs = args.interval_secs,
        "starting sync watch"
    );

    let worker_api = Arc::clone(&api);
    let scheduler = SyncScheduler::start(Duration::from_secs(args.interval_secs), move || {
        let mut api = worker_api.lock().unwrap_or_else(PoisonError::into_inner);
        let report = api.sync_with(&engine);
        println!("{}", report.notification);
        match report.outcome.as_str() {
            "updated" => SyncOutcome::Updated,
            "up_to_date" => SyncOutcome::UpToDate,
            _ => SyncOutcome::Failed(report.reason.unwrap_or_default()),
        }
    });

    // Hold the foreground until stdin closes. Ctrl-c falls through to the
    // default signal handling and ends the process outright, which is how the
    // original's run-forever timer behaved too.
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let _ = line?;
    }

    scheduler.stop();
    emit_json(serde_json::json!({
        "watch": "stopped",
        "interval_secs": args.interval_secs,
    }))
}

fn run_db(command: DbCommand, db: &Path) -> Result<()> {
    let mut store = SqliteStore::open(db)?;
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
            }))
        }
        DbCommand::Migrate => {
            let before = store.schema_status()?;
            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "target_version": after.target_version,
                "up_to_date": after.pending_versions.is_empty(),
            }))
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
