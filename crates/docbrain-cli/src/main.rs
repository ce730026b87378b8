use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use docbrain_core::{Brain, DelegateClient};
use docbrain_provider::{create_provider, ProviderConfig, ProviderType};
use docbrain_server::state::AppState;
use docbrain_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "docbrain",
    version,
    about = "query-orchestration engine for document-grounded chat"
)]
struct Cli {
    #[arg(long, default_value = "docbrain.yaml", help = "Path to the settings file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, help = "Override the configured listen port")]
        port: Option<u16>,
    },
    #[command(about = "Validate the settings file")]
    Validate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    listen: String,
    db_path: String,
    log_dir: Option<String>,
    provider: ProviderConfig,
    downstream: DownstreamSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DownstreamSettings {
    base_url: String,
    route: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".into(),
            db_path: "data/docbrain.sqlite".into(),
            log_dir: None,
            provider: ProviderConfig::new("stub", ProviderType::Stub),
            downstream: DownstreamSettings::default(),
        }
    }
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".into(),
            route: "/api/agent/query".into(),
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid settings file {}", path.display()))
}

fn init_tracing(log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "docbrain.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

fn build_state(settings: &Settings) -> Result<AppState> {
    if let Some(parent) = Path::new(&settings.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let store = Arc::new(SqliteStore::open(&settings.db_path)?);
    let provider = create_provider(&settings.provider)?;
    let delegate =
        DelegateClient::with_route(&settings.downstream.base_url, &settings.downstream.route);
    let brain = Arc::new(Brain::new(store, provider, delegate));
    Ok(AppState { brain })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let settings = load_settings(&cli.config)?;
            let _guard = init_tracing(settings.log_dir.as_deref());

            let listen = match port {
                Some(port) => {
                    let host = settings.listen.rsplit_once(':').map(|(h, _)| h).unwrap_or("127.0.0.1");
                    format!("{host}:{port}")
                }
                None => settings.listen.clone(),
            };

            let state = build_state(&settings)?;
            tracing::info!(
                provider = %settings.provider.id,
                downstream = %settings.downstream.base_url,
                "docbrain starting"
            );
            docbrain_server::serve(state, &listen).await
        }
        Commands::Validate => {
            let settings = load_settings(&cli.config)?;
            create_provider(&settings.provider)
                .context("provider configuration is not usable")?;
            println!(
                "ok: listen={} db={} provider={} downstream={}{}",
                settings.listen,
                settings.db_path,
                settings.provider.id,
                settings.downstream.base_url,
                settings.downstream.route,
            );
            Ok(())
        }
    }
}
