use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use be_server::bootstrap::{self, RuntimeConfig};
use be_server::config::{AppConfig, LogFormat};
use be_server::handler::{self, AppState};
use be_server::service::ChatService;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "boteval", about = "human evaluation of chat bots")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Validate configuration file and exit.
    Validate,
    /// Create the schema, system users and topics, then exit.
    InitDb {
        /// Only bootstrap users; leave the topic catalog alone.
        #[arg(long)]
        skip_topics: bool,
    },
    /// Serve the HTTP API (default).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let runtime = match load_runtime(&cli.config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Config invalid: {e:#}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Command::Validate) => {
            println!("Config valid: {}", cli.config.display());
            Ok(())
        }
        Some(Command::InitDb { skip_topics }) => {
            init_tracing(&runtime.log_level, runtime.log_format);
            let service = build_service(runtime)?;
            let inserted = service.init_db(!skip_topics)?;
            println!("Database ready; {inserted} topic(s) inserted.");
            Ok(())
        }
        Some(Command::Serve) | None => {
            init_tracing(&runtime.log_level, runtime.log_format);
            serve(runtime).await
        }
    }
}

fn load_runtime(path: &Path) -> anyhow::Result<RuntimeConfig> {
    let config = AppConfig::from_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    bootstrap::into_runtime(config)
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn build_service(runtime: RuntimeConfig) -> anyhow::Result<ChatService> {
    let store = bootstrap::open_store(&runtime.database)
        .with_context(|| format!("failed to open database {}", runtime.database))?;
    Ok(ChatService::new(runtime.service, store, runtime.bot_agent))
}

async fn serve(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let listen_addr = runtime.listen_addr.clone();
    let service = build_service(runtime)?;
    // users are always bootstrapped; an in-memory database also needs topics
    let inserted = service.init_db(true)?;
    tracing::info!(inserted, bot = service.bot_name(), "chat service ready");

    let app = handler::router(Arc::new(AppState { service }));
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
