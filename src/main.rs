//! shadowmsg - local shadow copy of the Messages store with search and
//! replication to remote endpoints.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use shadowmsg_core::config::AppConfig;
use shadowmsg_core::logging::init_logging;
use shadowmsg_core::push::{self, BatchReport, HttpTransport, PushObserver, PushOptions};
use shadowmsg_core::search::{self, SearchOptions};
use shadowmsg_core::source::ChatDbSource;
use shadowmsg_core::sync::{self, CleanupOutcome, SyncOptions, SyncReport};
use shadowmsg_core::{open_store, query, timestamp, ShadowDb};

#[derive(Parser, Debug)]
#[command(name = "shadowmsg")]
#[command(about = "Shadow copy, search and replication for the Messages store")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/shadowmsg/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy new rows from the source store
    Sync {
        /// Soft-delete local messages that no longer exist in the source
        #[arg(long)]
        cleanup: bool,
    },
    /// Search decoded message text
    Search {
        query: String,
        /// Sender identifier, alias or contact name substring
        #[arg(long = "from")]
        sender: Option<String>,
        /// Inclusive lower date bound (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        after: Option<String>,
        /// Exclusive upper date bound (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        before: Option<String>,
        #[arg(long, default_value_t = search::DEFAULT_LIMIT)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Send unsent messages to a configured endpoint
    Push {
        endpoint: String,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Forget what was sent to an endpoint
    Reset { endpoint: String },
    /// Manage sender aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Show store counts and watermarks
    Status,
}

#[derive(Subcommand, Debug)]
enum AliasAction {
    Set { identity: String, alias: String },
    Remove { identity: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    init_logging(&config.log_level);

    let mut store = open_store(&config.store_path)
        .with_context(|| format!("Failed to open store at {}", config.store_path.display()))?;

    match cli.command {
        Commands::Sync { cleanup } => {
            let report = run_sync(&config, &mut store, cleanup)?;
            print_sync_report(&report);
        }
        Commands::Search {
            query,
            sender,
            after,
            before,
            limit,
            offset,
        } => {
            let options = SearchOptions {
                sender,
                after: after.as_deref().map(parse_date).transpose()?,
                before: before.as_deref().map(parse_date).transpose()?,
                since_id: None,
                limit,
                offset,
            };
            if sync::is_stale(&store.conn, config.auto_sync_max_age(), Utc::now())? {
                info!("store is stale, syncing before search");
                run_sync(&config, &mut store, false)?;
            }
            let page = search::search_messages(&store.conn, &query, &options)?;
            for view in &page.rows {
                let when = timestamp::to_iso(view.message.timestamp).unwrap_or_default();
                let who = if view.message.is_from_me {
                    "me".to_string()
                } else {
                    view.sender_name.clone().unwrap_or_else(|| "unknown".to_string())
                };
                let body = view.message.extracted_text.as_deref().unwrap_or("(no content)");
                println!("[{}] #{} {}: {}", when, view.message.id, who, body);
            }
            println!(
                "Showing {} of {} (offset {})",
                page.rows.len(),
                page.total,
                page.offset
            );
        }
        Commands::Push {
            endpoint,
            batch_size,
            dry_run,
        } => {
            let endpoint = config
                .endpoint(&endpoint)
                .with_context(|| format!("Unknown endpoint: {}", endpoint))?;
            let options = PushOptions {
                batch_size: batch_size.unwrap_or(config.push_batch_size),
                dry_run,
            };
            let transport = HttpTransport::new();
            let mut progress = |batch: &BatchReport| {
                println!(
                    "batch {}: {} messages (ids {}..={}), imported {}, skipped {}",
                    batch.index + 1,
                    batch.size,
                    batch.first_id,
                    batch.last_id,
                    batch.imported,
                    batch.skipped
                );
            };
            let observer: &mut dyn PushObserver = &mut progress;
            let report = push::push(&store.conn, endpoint, &transport, options, Some(observer))
                .with_context(|| format!("Push to {} failed", endpoint.name))?;
            println!(
                "{}{} batches, {} messages, {} imported, {} skipped, cursor {}",
                if report.dry_run { "[dry run] " } else { "" },
                report.batches.len(),
                report.total,
                report.imported,
                report.skipped,
                report.last_id
            );
        }
        Commands::Reset { endpoint } => {
            if config.endpoint(&endpoint).is_none() {
                bail!("Unknown endpoint: {}", endpoint);
            }
            push::reset(&store.conn, &endpoint)?;
            println!("Reset push watermark for {}", endpoint);
        }
        Commands::Alias { action } => match action {
            AliasAction::Set { identity, alias } => {
                let saved = query::set_alias(&store.conn, &identity, &alias, &config.default_country_code)?;
                println!("{} -> {}", saved.phone_normalized, saved.alias);
            }
            AliasAction::Remove { identity } => {
                if query::remove_alias(&store.conn, &identity, &config.default_country_code)? {
                    println!("Removed alias for {}", identity);
                } else {
                    println!("No alias for {}", identity);
                }
            }
            AliasAction::List => {
                for alias in query::list_aliases(&store.conn)? {
                    println!("{}\t{}", alias.phone_normalized, alias.alias);
                }
            }
        },
        Commands::Status => {
            let stats = query::store_stats(&store.conn)?;
            println!("store: {}", store.path.display());
            println!(
                "handles {}, messages {} ({} deleted), attachments {}, contacts {}, aliases {}",
                stats.handles,
                stats.messages,
                stats.deleted_messages,
                stats.attachments,
                stats.contacts,
                stats.aliases
            );
            match sync::last_successful_sync(&store.conn)? {
                Some(at) => println!("last sync: {}", at.to_rfc3339()),
                None => println!("last sync: never"),
            }
            for mark in query::list_sync_watermarks(&store.conn)? {
                println!("  sync {}: {}", mark.table_name, mark.last_cursor);
            }
            for mark in query::list_push_watermarks(&store.conn)? {
                println!(
                    "  push {}: cursor {}, total {}",
                    mark.endpoint, mark.last_cursor, mark.total_pushed
                );
            }
        }
    }

    Ok(())
}

fn run_sync(config: &AppConfig, store: &mut ShadowDb, cleanup: bool) -> Result<SyncReport> {
    let mut source = ChatDbSource::open(&config.source_db_path, config.busy_timeout())
        .context("Failed to open source store")?;
    if let Some(root) = &config.contacts_root {
        source = source.with_contacts_root(root);
    }
    let options = SyncOptions {
        cleanup,
        country_code: config.default_country_code.clone(),
    };
    let report = sync::sync_with_progress(&mut store.conn, &source, &options, |msg| info!("{}", msg))
        .context("Sync failed")?;
    Ok(report)
}

fn print_sync_report(report: &SyncReport) {
    println!(
        "Synced {} handles, {} messages, {} attachments, {} links, {} contacts",
        report.handles, report.messages, report.attachments, report.links, report.contacts.imported
    );
    for skipped in &report.contacts.skipped_sources {
        println!("  skipped contact source {}", skipped);
    }
    match &report.cleanup {
        CleanupOutcome::NotRequested => {}
        CleanupOutcome::Completed { soft_deleted } => println!("  cleanup removed {}", soft_deleted),
        CleanupOutcome::Skipped { reason } => println!("  cleanup skipped: {}", reason),
    }
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", value))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid date: {}", value))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
