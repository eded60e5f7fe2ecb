use std::path::Path;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use roster_cli::{Command, Config};
use roster_client::WondeClient;
use roster_core::{
    handle_save_request, load_config, seed_lookups, AppError, DbConfig, FileConfig, HttpConfig,
    InMemoryStore, InvocationResponse, LookupTables, RecordStore, RosterSource, SyncConfig,
    SyncService,
};
use roster_db::PgRecordStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for JSON output)
    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    if let Err(e) = run(config).await {
        match e.downcast_ref::<AppError>() {
            Some(app) => error!("{}", app.user_message()),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let file_config = load_config(config.config.as_deref())?;

    match &config.command {
        Command::Schools => {
            let client = wonde_client(&config, &file_config)?;
            let schools = client.list_schools().await?;
            info!("Found {} schools", schools.len());
            print_json(&schools)?;
        }
        Command::Roster { school_id } => {
            let client = wonde_client(&config, &file_config)?;
            let roster = client.fetch_school_roster(school_id).await;
            for problem in &roster.fetch_errors {
                warn!("Roster incomplete: {}", problem);
            }
            print_json(&roster)?;
        }
        Command::Sync {
            school_id,
            dry_run,
            skip_existing_people,
            lookups,
        } => {
            let client = wonde_client(&config, &file_config)?;
            let mut sync_config = file_config.sync.clone();
            sync_config.skip_existing_people |= *skip_existing_people;

            info!("Fetching school {}...", school_id);
            let school = client.fetch_school(school_id).await?;
            let roster = client.fetch_school_roster(school_id).await;
            for problem in &roster.fetch_errors {
                warn!("Roster incomplete: {}", problem);
            }

            let response = if *dry_run {
                let store = InMemoryStore::new();
                if let Some(path) = lookups {
                    let seed = read_lookups(path)?;
                    seed_lookups(&store, &seed, sync_config.effective_batch_size()).await?;
                }
                let service = SyncService::new(store, sync_config);
                let result = service.sync_school(&school, &roster).await;
                InvocationResponse::from_sync(result, &school.name)
            } else {
                let service = SyncService::new(connect(&config).await?, sync_config);
                let result = service.sync_school(&school, &roster).await;
                InvocationResponse::from_sync(result, &school.name)
            };
            finish(&response)?;
        }
        Command::Apply { request, dry_run } => {
            let body = std::fs::read_to_string(request)
                .with_context(|| format!("Failed to read {}", request.display()))?;
            let response = if *dry_run {
                apply(InMemoryStore::new(), file_config.sync.clone(), &body).await
            } else {
                apply(connect(&config).await?, file_config.sync.clone(), &body).await
            };
            finish(&response)?;
        }
        Command::SeedLookups { file } => {
            let seed = read_lookups(file)?;
            let store = connect(&config).await?;
            let outcomes =
                seed_lookups(&store, &seed, file_config.sync.effective_batch_size()).await?;
            print_json(&outcomes)?;
        }
        Command::Stats => {
            show_stats(&connect(&config).await?).await?;
        }
    }

    Ok(())
}

fn wonde_client(config: &Config, file_config: &FileConfig) -> anyhow::Result<WondeClient> {
    let token = config
        .api_token
        .as_deref()
        .context("WONDE_API_TOKEN is not set")?;
    let region = config.region.or(file_config.region).unwrap_or_default();
    let base_url = file_config.base_url(region);
    info!("Using {} region at {}", region, base_url);
    Ok(WondeClient::new(&base_url, token, HttpConfig::default())?)
}

async fn connect(config: &Config) -> anyhow::Result<PgRecordStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set (use --dry-run to skip the database)")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(DbConfig::default().max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    let store = PgRecordStore::new(pool);
    store.ensure_schema().await?;
    Ok(store)
}

async fn apply<S: RecordStore>(store: S, sync_config: SyncConfig, body: &str) -> InvocationResponse {
    let service = SyncService::new(store, sync_config);
    handle_save_request(&service, body).await
}

fn read_lookups(path: &Path) -> anyhow::Result<LookupTables> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let seed: LookupTables = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid lookup file {}", path.display()))?;
    Ok(seed)
}

/// Prints the invocation response and fails the process on a non-200 status.
fn finish(response: &InvocationResponse) -> anyhow::Result<()> {
    print_json(response)?;
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show record counts per table
async fn show_stats(store: &PgRecordStore) -> anyhow::Result<()> {
    let counts = store.table_counts().await?;

    println!("\nRecord counts\n");
    for (table, count) in counts {
        let kind = if table.is_lookup() { "lookup" } else { "roster" };
        println!("  {:<24} {:<8} {}", table.as_str(), kind, count);
    }
    println!();

    Ok(())
}
