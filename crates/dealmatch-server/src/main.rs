//! dealmatch server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered under
//! `DEALMATCH_*` environment variables, opens the SQLite store, and serves
//! the JSON API over HTTP. Without `completion.api_key` the server runs with
//! text completion disabled and every AI path takes its fallback.

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use dealmatch_api::AppState;
use dealmatch_augment::HttpCompleter;
use dealmatch_core::completion::{DisabledCompleter, TextCompleter};
use dealmatch_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::{ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "dealmatch marketplace API server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;
  let api_cfg = server_cfg.api_config()?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create store directory {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  match server_cfg.completer_config() {
    Some(http_cfg) => {
      tracing::info!(model = %http_cfg.model, "text completion enabled");
      let completer = HttpCompleter::new(http_cfg).context("failed to build completion client")?;
      serve(&server_cfg, AppState::new(store, completer, api_cfg)).await
    }
    None => {
      tracing::warn!("no completion.api_key configured; AI output will use fallbacks");
      serve(&server_cfg, AppState::new(store, DisabledCompleter, api_cfg)).await
    }
  }
}

async fn serve<C>(cfg: &ServerConfig, state: AppState<SqliteStore, C>) -> anyhow::Result<()>
where
  C: TextCompleter + 'static,
{
  let app = dealmatch_api::router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
