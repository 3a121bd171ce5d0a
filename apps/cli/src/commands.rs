//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, bail};
use indicatif::{ProgressBar, ProgressStyle};
use readdo_core::{
    CompletionModel, Outcome, Pipeline, RetryPolicy, Worker, build_model, shutdown,
};
use readdo_extractor::{ContentExtractor, build_extractor};
use readdo_shared::{
    AppConfig, ArtifactType, CaptureRequest, Item, ItemDetail, ItemFilter, ItemStatus, Priority,
    init_config, load_config, load_config_from,
};
use readdo_storage::Storage;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// readdo: save links with a reason, get back something to do.
#[derive(Parser)]
#[command(
    name = "readdo",
    version,
    about = "Capture URLs with an intent and turn them into prioritized todos.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.readdo/readdo.toml).
    #[arg(long, global = true, env = "READDO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[storage] db_path`.
    #[arg(long, global = true, env = "READDO_DB")]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Save a URL. Saving a URL that is already in the inbox merges into it.
    Capture {
        /// Page to save.
        url: String,

        /// Why you are saving it.
        #[arg(short, long, default_value = "")]
        intent: String,

        /// Title to show until the page is processed.
        #[arg(long)]
        title: Option<String>,

        /// Where the link came from (defaults to "web").
        #[arg(long)]
        source_type: Option<String>,
    },

    /// List items, most urgent first.
    List {
        /// Only these statuses (comma-separated).
        #[arg(short, long, value_delimiter = ',')]
        status: Vec<ItemStatus>,

        /// Only these priorities (comma-separated, e.g. do_first,plan_it).
        #[arg(short, long, value_delimiter = ',')]
        priority: Vec<Priority>,

        /// Substring matched against title, domain and intent.
        #[arg(short, long)]
        query: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show one item with its artifacts and intent history.
    Show {
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Requeue a FAILED item for processing.
    Retry { id: String },

    /// Run a READY or FAILED item through every step again.
    Reprocess { id: String },

    /// Archive READY or FAILED items.
    Archive {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Move archived items back to READY.
    Restore {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete items with their artifacts and intents.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Replace a synthesis or todos artifact with your own JSON.
    Edit {
        id: String,

        /// Artifact to replace: synthesis or todos.
        artifact_type: ArtifactType,

        /// JSON payload.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        payload: Option<String>,

        /// Read the JSON payload from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Process captured items until Ctrl-C.
    Worker,

    /// Process every queued item, then exit.
    Drain,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "readdo=info",
        1 => "readdo=debug",
        _ => "readdo=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init().await;
    }

    let config = load_settings(cli.config.as_deref(), cli.db.as_deref())?;

    match cli.command {
        Command::Config { .. } => cmd_config_show(&config).await,
        Command::Worker => cmd_worker(&config).await,
        Command::Drain => cmd_drain(&config).await,
        command => {
            let storage = open_storage(&config).await?;
            run_catalog(&storage, command).await
        }
    }
}

async fn run_catalog(storage: &Storage, command: Command) -> Result<()> {
    match command {
        Command::Capture {
            url,
            intent,
            title,
            source_type,
        } => {
            let req = CaptureRequest {
                url,
                title,
                domain: None,
                source_type,
                intent_text: intent,
            };
            cmd_capture(storage, &req).await
        }
        Command::List {
            status,
            priority,
            query,
            json,
        } => {
            let filter = ItemFilter {
                statuses: status,
                priorities: priority,
                query,
            };
            cmd_list(storage, &filter, json).await
        }
        Command::Show { id, json } => cmd_show(storage, &id, json).await,
        Command::Retry { id } => cmd_retry(storage, &id).await,
        Command::Reprocess { id } => cmd_reprocess(storage, &id).await,
        Command::Archive { ids } => cmd_set_status(storage, &ids, ItemStatus::Archived).await,
        Command::Restore { ids } => cmd_set_status(storage, &ids, ItemStatus::Ready).await,
        Command::Delete { ids } => cmd_delete(storage, &ids).await,
        Command::Edit {
            id,
            artifact_type,
            payload,
            file,
        } => cmd_edit(storage, &id, artifact_type, payload, file.as_deref()).await,
        Command::Worker | Command::Drain | Command::Config { .. } => {
            bail!("not a catalog command")
        }
    }
}

/// Load config from `--config` (or the default location) and apply `--db`.
fn load_settings(config_path: Option<&Path>, db: Option<&Path>) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.storage.db_path = db.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_db_path()?;
    debug!(path = %path.display(), "opening database");
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", path.display()))?;
    Ok(storage)
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

async fn cmd_capture(storage: &Storage, req: &CaptureRequest) -> Result<()> {
    let outcome = storage.capture(req).await?;
    let item = &outcome.item;

    println!();
    if outcome.merged {
        println!("  Already saved, merged into the existing item.");
    } else {
        println!("  Captured.");
    }
    println!("  ID:     {}", item.id);
    println!("  URL:    {}", item.url);
    println!("  Status: {}", item.status);
    println!("  Saves:  {}", item.save_count);
    println!();
    Ok(())
}

async fn cmd_list(storage: &Storage, filter: &ItemFilter, json: bool) -> Result<()> {
    let items = storage.list_items(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items.");
    } else {
        println!(
            "{:<36}  {:<10}  {:<8}  {:>5}  TITLE",
            "ID", "STATUS", "PRIORITY", "SCORE"
        );
        for item in &items {
            let priority = item.priority.map(Priority::as_str).unwrap_or("-");
            let score = item
                .match_score
                .map(|s| format!("{s:.0}"))
                .unwrap_or_else(|| "-".into());
            println!(
                "{:<36}  {:<10}  {:<8}  {:>5}  {}",
                item.id,
                item.status.as_str(),
                priority,
                score,
                display_title(item)
            );
        }
    }

    let counts = storage.count_by_status().await?;
    println!();
    println!("  Inbox: {}   Archive: {}", counts.inbox, counts.archive);
    Ok(())
}

async fn cmd_show(storage: &Storage, id: &str, json: bool) -> Result<()> {
    let detail = storage.get_item_detail(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    print_detail(&detail)
}

fn print_detail(detail: &ItemDetail) -> Result<()> {
    let item = &detail.item;

    println!();
    println!("  {}", display_title(item));
    println!("  ID:       {}", item.id);
    println!("  URL:      {}", item.url);
    println!("  Domain:   {}", item.domain);
    println!("  Status:   {}", item.status);
    if let (Some(priority), Some(score)) = (item.priority, item.match_score) {
        println!("  Priority: {priority} ({score:.1})");
    }
    println!("  Saves:    {}", item.save_count);
    if let Some(err) = &item.error_info {
        println!(
            "  Failed:   {} at {} (retryable: {})",
            err.failed_step, err.failed_at, err.retryable
        );
        println!("            {}", err.message);
    }

    if !detail.intents.is_empty() {
        println!();
        println!("  Intents:");
        for intent in &detail.intents {
            println!("    - {} ({})", intent.text, intent.created_at.format("%Y-%m-%d %H:%M"));
        }
    }

    for artifact in &detail.artifacts {
        println!();
        println!(
            "  [{}] by {}",
            artifact.artifact_type,
            artifact.created_by.as_str()
        );
        let mut payload: serde_json::Value = serde_json::from_str(&artifact.payload)
            .wrap_err_with(|| format!("stored {} payload is not JSON", artifact.artifact_type))?;
        shorten_text(&mut payload, 400);
        for line in serde_json::to_string_pretty(&payload)?.lines() {
            println!("    {line}");
        }
    }
    println!();
    Ok(())
}

/// Trim the extraction's page text so `show` stays readable.
fn shorten_text(payload: &mut serde_json::Value, max_chars: usize) {
    if let Some(serde_json::Value::String(text)) = payload.get_mut("normalized_text") {
        if text.chars().count() > max_chars {
            let cut: String = text.chars().take(max_chars).collect();
            *text = format!("{cut}...");
        }
    }
}

fn display_title(item: &Item) -> String {
    let title = if item.title.is_empty() {
        &item.url
    } else {
        &item.title
    };
    if title.chars().count() > 60 {
        let cut: String = title.chars().take(59).collect();
        format!("{cut}…")
    } else {
        title.clone()
    }
}

async fn cmd_retry(storage: &Storage, id: &str) -> Result<()> {
    let item = storage.transition_status(id, ItemStatus::Captured).await?;
    println!("Requeued {} ({})", item.id, item.status);
    Ok(())
}

async fn cmd_reprocess(storage: &Storage, id: &str) -> Result<()> {
    let item = storage.reprocess_item(id).await?;
    println!("Queued {} for reprocessing ({})", item.id, item.status);
    Ok(())
}

async fn cmd_set_status(storage: &Storage, ids: &[String], to: ItemStatus) -> Result<()> {
    if let [id] = ids {
        let item = storage.transition_status(id, to).await?;
        println!("{} is now {}", item.id, item.status);
    } else {
        let changed = storage.batch_update_status(ids, to).await?;
        println!("{changed} of {} items moved to {to}", ids.len());
    }
    Ok(())
}

async fn cmd_delete(storage: &Storage, ids: &[String]) -> Result<()> {
    if let [id] = ids {
        storage.delete_item(id).await?;
        println!("Deleted {id}");
    } else {
        let deleted = storage.batch_delete_items(ids).await?;
        println!("Deleted {deleted} of {} items", ids.len());
    }
    Ok(())
}

async fn cmd_edit(
    storage: &Storage,
    id: &str,
    artifact_type: ArtifactType,
    payload: Option<String>,
    file: Option<&Path>,
) -> Result<()> {
    let payload = match (payload, file) {
        (Some(payload), _) => payload,
        (None, Some(path)) => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("either --payload or --file is required"),
    };

    let artifact = storage.edit_artifact(id, artifact_type, &payload).await?;
    println!("Saved your {} for {}", artifact.artifact_type, artifact.item_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Processing commands
// ---------------------------------------------------------------------------

fn build_worker(config: &AppConfig, storage: Arc<Storage>) -> Result<Worker> {
    let extractor: Arc<dyn ContentExtractor> = Arc::from(build_extractor(&config.extractor)?);
    let model: Arc<dyn CompletionModel> = Arc::from(build_model(&config.model)?);

    info!(
        extractor = extractor.name(),
        model = model.model_id(),
        "building pipeline"
    );

    let pipeline = Pipeline::standard(
        extractor,
        model,
        storage.clone(),
        storage.clone(),
        RetryPolicy::from(&config.retry),
    );
    Ok(Worker::new(
        storage,
        Arc::new(pipeline),
        config.worker.poll_interval(),
    ))
}

/// Fire the returned signal on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> readdo_core::Shutdown {
    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                trigger.trigger();
            }
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
        }
    });
    signal
}

async fn cmd_worker(config: &AppConfig) -> Result<()> {
    let storage = Arc::new(open_storage(config).await?);
    let worker = build_worker(config, storage)?;
    let shutdown = shutdown_on_ctrl_c();

    worker.recover().await?;
    println!("Worker running. Press Ctrl-C to stop.");
    worker.run(shutdown).await;
    Ok(())
}

async fn cmd_drain(config: &AppConfig) -> Result<()> {
    let storage = Arc::new(open_storage(config).await?);
    let worker = build_worker(config, storage)?;
    let shutdown = shutdown_on_ctrl_c();

    let requeued = worker.recover().await?;
    let progress = CliProgress::new();
    let mut tally = DrainTally {
        requeued_at_start: requeued,
        ..Default::default()
    };

    while !shutdown.is_triggered() {
        progress.phase(&format!("Processing queue ({} done)", tally.done()));
        let Some(outcome) = worker.run_once(&shutdown).await? else {
            break;
        };
        match &outcome {
            Outcome::Ready { item_id } => {
                tally.ready += 1;
                progress.note(&format!("  ready   {item_id}"));
            }
            Outcome::Failed { item_id, error } => {
                tally.failed += 1;
                progress.note(&format!(
                    "  failed  {item_id} [{}] {}",
                    error.failed_step, error.message
                ));
            }
            Outcome::Requeued { .. } => tally.requeued += 1,
            Outcome::Interrupted { .. } | Outcome::Unrecorded { .. } => {
                tally.unfinished += 1;
            }
        }
    }
    progress.finish();

    println!();
    if shutdown.is_triggered() {
        println!("  Stopped early.");
    } else {
        println!("  Queue drained.");
    }
    if tally.requeued_at_start > 0 {
        println!("  Recovered:  {}", tally.requeued_at_start);
    }
    println!("  Ready:      {}", tally.ready);
    println!("  Failed:     {}", tally.failed);
    println!("  Requeued:   {}", tally.requeued);
    if tally.unfinished > 0 {
        println!("  Unfinished: {} (left PROCESSING until next start)", tally.unfinished);
    }
    println!();
    Ok(())
}

#[derive(Default)]
struct DrainTally {
    requeued_at_start: u64,
    ready: u32,
    failed: u32,
    requeued: u32,
    unfinished: u32,
}

impl DrainTally {
    fn done(&self) -> u32 {
        self.ready + self.failed
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner shown while draining the queue.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    /// Print a line above the spinner.
    fn note(&self, line: &str) {
        self.spinner.println(line);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    println!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_filters() {
        let cli = Cli::try_parse_from([
            "readdo",
            "list",
            "--status",
            "ready,failed",
            "--priority",
            "do_first",
            "-q",
            "rust",
        ])
        .unwrap();

        match cli.command {
            Command::List {
                status,
                priority,
                query,
                json,
            } => {
                assert_eq!(status, vec![ItemStatus::Ready, ItemStatus::Failed]);
                assert_eq!(priority, vec![Priority::DoFirst]);
                assert_eq!(query.as_deref(), Some("rust"));
                assert!(!json);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn edit_requires_a_payload_source() {
        assert!(Cli::try_parse_from(["readdo", "edit", "abc", "todos"]).is_err());
        assert!(
            Cli::try_parse_from(["readdo", "edit", "abc", "todos", "--payload", "{}"]).is_ok()
        );
        assert!(
            Cli::try_parse_from([
                "readdo", "edit", "abc", "todos", "--payload", "{}", "--file", "x.json"
            ])
            .is_err()
        );
    }

    #[test]
    fn reprocess_takes_one_id() {
        let cli = Cli::try_parse_from(["readdo", "reprocess", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Reprocess { id } if id == "abc"));
        assert!(Cli::try_parse_from(["readdo", "reprocess"]).is_err());
    }

    #[test]
    fn unknown_artifact_type_is_rejected() {
        assert!(
            Cli::try_parse_from(["readdo", "edit", "abc", "summary", "--payload", "{}"]).is_err()
        );
    }

    #[test]
    fn db_flag_overrides_config() {
        let dir = std::env::temp_dir();
        let config_path = dir.join(format!("readdo_cli_test_{}.toml", std::process::id()));
        std::fs::write(&config_path, "[storage]\ndb_path = \"/tmp/from-file.db\"\n").unwrap();

        let from_file = load_settings(Some(&config_path), None).unwrap();
        assert_eq!(from_file.storage.db_path, "/tmp/from-file.db");

        let overridden =
            load_settings(Some(&config_path), Some(Path::new("/tmp/override.db"))).unwrap();
        assert_eq!(overridden.storage.db_path, "/tmp/override.db");

        std::fs::remove_file(&config_path).unwrap();
    }

    #[test]
    fn long_titles_are_shortened() {
        let mut item = Item::from_capture(&CaptureRequest::new("https://example.com/a", ""));
        assert_eq!(display_title(&item), "https://example.com/a");

        item.title = "x".repeat(80);
        let shown = display_title(&item);
        assert_eq!(shown.chars().count(), 60);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn extraction_text_is_trimmed_for_display() {
        let mut payload = serde_json::json!({
            "normalized_text": "word ".repeat(200),
            "content_meta": {"word_count": 200}
        });
        shorten_text(&mut payload, 10);
        assert_eq!(payload["normalized_text"], "word word ...");
        assert_eq!(payload["content_meta"]["word_count"], 200);
    }
}
