use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sports_pool::api::{build_router, state::AppState};
use sports_pool::config::AppConfig;
use sports_pool::etl::SystemClock;
use sports_pool::fetch::Fetcher;
use sports_pool::models::{CategoryId, Sport};
use sports_pool::pool::Pool;
use sports_pool::sources::SourceRegistry;
use sports_pool::storage::SqliteStore;

#[derive(Parser)]
#[command(name = "sports-pool")]
#[command(about = "Friends-and-players sports pool with cached daily stats")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the current scores of a sport, refreshing them if stale
    Stats {
        /// Sport slug (mlb, nfl)
        sport: Sport,
    },

    /// Forget cached provider responses and the sport's cached scores
    ClearCache {
        /// Sport slug (mlb, nfl)
        sport: Sport,
    },

    /// Search a category's provider for players or teams
    Search {
        /// Category id
        category: i64,

        /// Season
        year: i32,

        /// Name or part of a name
        query: String,

        /// Only players active in the season
        #[arg(long)]
        active_only: bool,
    },
}

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

fn build_pool(config: &AppConfig) -> Result<Pool> {
    let registry = config.registry()?;
    let fetcher = Arc::new(Fetcher::new(&config.fetch.fetcher_config())?);
    let request_cache = Arc::clone(fetcher.cache());
    let sources = SourceRegistry::providers(fetcher, &config.fetch.providers);
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    Ok(Pool::new(
        Arc::new(store),
        Arc::new(registry),
        Arc::new(sources),
        request_cache,
        Arc::new(SystemClock),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    // Initialize tracing
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting sports-pool v{}", env!("CARGO_PKG_VERSION"));

    let pool = build_pool(&config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let app = build_router(AppState::new(pool));
            let addr = format!("{}:{}", host, port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Stats { sport } => match pool.get_stats(sport).await? {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("No active year for {}", sport.name()),
        },
        Commands::ClearCache { sport } => {
            pool.clear_cache(sport)?;
            println!("Cleared caches for {}", sport.name());
        }
        Commands::Search {
            category,
            year,
            query,
            active_only,
        } => {
            let results = pool
                .search(CategoryId::new(category), year, &query, active_only)
                .await?;
            if results.is_empty() {
                println!("No matches for {:?}", query);
            }
            for result in &results {
                println!("{:>8}  {}  ({})", result.source_id.get(), result.name, result.details);
            }
        }
    }

    Ok(())
}
