use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hhv_adapters::{FixtureSource, HhClient, VacancySource};
use hhv_storage::VacancyStore;
use hhv_sync::{collect_report, render_report_json, render_report_text, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hhv")]
#[command(about = "Load HH vacancies into Postgres and print reports")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild the tables from a fresh fetch, then print reports.
    Sync(SyncArgs),
    /// Drop and recreate the employer and vacancy tables.
    Migrate,
    /// Print reports from the current tables without fetching.
    Report(ReportArgs),
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Load a captured API response instead of calling the API.
    #[arg(long)]
    fixture: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Overrides HH_SEARCH_KEYWORD.
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;
    let store = VacancyStore::connect(config.database.connect_options(), config.pool)
        .await
        .with_context(|| format!("connecting to postgres at {}", config.database.host))?;

    let outcome = run(cli.command.unwrap_or(Commands::Sync(SyncArgs::default())), config, &store).await;
    store.close().await;
    outcome
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: SyncConfig, store: &VacancyStore) -> Result<()> {
    match command {
        Commands::Sync(args) => {
            let source: Box<dyn VacancySource> = match args.fixture {
                Some(path) => Box::new(FixtureSource::new(path)),
                None => Box::new(HhClient::new(
                    config.vacancies_url.clone(),
                    config.http_client_config(),
                )?),
            };
            let keyword = config.keyword.clone();
            let pipeline = SyncPipeline::new(config, source, store.clone());
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} source={} fetched={} skipped={} employers={} vacancies={}",
                summary.run_id,
                summary.source_id,
                summary.fetched_items,
                summary.skipped_items,
                summary.employers_inserted,
                summary.vacancies_inserted
            );
            print_report(store, &keyword, args.json).await
        }
        Commands::Migrate => {
            store.drop_schema().await.context("dropping schema")?;
            store.create_schema().await.context("creating schema")?;
            tracing::info!("schema rebuilt");
            Ok(())
        }
        Commands::Report(args) => {
            let keyword = args.keyword.unwrap_or(config.keyword);
            print_report(store, &keyword, args.json).await
        }
    }
}

async fn print_report(store: &VacancyStore, keyword: &str, json: bool) -> Result<()> {
    let report = collect_report(store, keyword).await?;
    if json {
        println!("{}", render_report_json(&report)?);
    } else {
        println!("{}", render_report_text(&report));
    }
    Ok(())
}
