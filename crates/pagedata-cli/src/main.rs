use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pagedata_core::SiteConfig;
use pagedata_resolver::{DefaultDataResolver, FixtureSource, FsFixtureSource, HttpFixtureSource};
use pagedata_sync::{FileStatus, SyncConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pagedata")]
#[command(about = "Page data backend: aggregate sync, sync service and default-data resolution")]
struct Cli {
    /// Catalog file with component defaults, endpoints and renames.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild the aggregate database from the fixture directory.
    Sync(SyncArgs),
    /// Run the sync service and mock JSON read API.
    Serve(ServeArgs),
    /// Resolve the data a component would render.
    Resolve(ResolveArgs),
    /// Print the loaded catalog as JSON.
    Catalog,
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    component: String,
    /// Inline JSON content blob; takes precedence over the fixture when it parses.
    #[arg(long)]
    content: Option<String>,
    /// Read fixtures from the data directory instead of the HTTP backend.
    #[arg(long)]
    offline: bool,
    #[arg(long)]
    base_url: Option<String>,
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_truthy("PAGEDATA_LOG_JSON") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = SiteConfig::from_env();
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    let catalog = config
        .load_catalog()
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let mut sync_config = SyncConfig::from_site(&config);
            if let Some(data_dir) = args.data_dir {
                sync_config.data_dir = data_dir;
            }
            if let Some(output) = args.output {
                sync_config.output_path = output;
            }
            let summary = pagedata_sync::run_sync_once(&sync_config, &catalog).await?;
            for outcome in &summary.files {
                match &outcome.status {
                    FileStatus::Merged { endpoint } => println!("ok      {} -> {}", outcome.file, endpoint),
                    FileStatus::Failed { reason } => println!("failed  {}: {}", outcome.file, reason),
                    FileStatus::Skipped { reason } => println!("skipped {}: {}", outcome.file, reason),
                }
            }
            println!(
                "sync complete: run_id={} endpoints={} failed={} output={} sha256={}",
                summary.run_id,
                summary.endpoints_written,
                summary.failed_files(),
                summary.output_path,
                summary.output_sha256
            );
        }
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.port = port;
            }
            if let Some(data_dir) = args.data_dir {
                config.data_dir = data_dir;
            }
            if let Some(db) = args.db {
                config.db_path = db;
            }
            pagedata_web::serve(&config, &catalog).await?;
        }
        Commands::Resolve(args) => {
            if let Some(base_url) = args.base_url {
                config.base_url = base_url;
            }
            let source: Arc<dyn FixtureSource> = if args.offline {
                Arc::new(FsFixtureSource::new(config.data_dir.clone()))
            } else {
                Arc::new(HttpFixtureSource::from_config(&config)?)
            };
            info!(component = %args.component, offline = args.offline, "resolving default data");
            let resolver = DefaultDataResolver::new(catalog.components.clone(), source);
            let resolution = resolver
                .resolve(&args.component, args.content.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Commands::Catalog => {
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
    }

    Ok(())
}
