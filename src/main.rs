mod commands;

use campus_sync::api::HttpTransport;
use campus_sync::config::Config;
use campus_sync::{logging, Gate, LocalStore, OnlineFlag, Session, SyncService};
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "campus-sync")]
#[command(about = "Offline-first attendance and fee-payment sync for the campus API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/campus-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable and queue every write locally
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&Config::data_dir()?.join("logs"))?;

  // Without a token, offline writes still work and syncs report the auth failure
  let session = Session::new(Config::get_api_token().ok());
  let online = OnlineFlag::new(!(args.offline || config.offline));

  let store = Arc::new(LocalStore::open(&config.store_path()?)?);
  let transport = Arc::new(HttpTransport::new(&config.server, session)?);
  let connectivity = Arc::new(online);

  let app = commands::App {
    gate: Gate::new(store.clone(), transport.clone(), connectivity.clone()),
    sync: SyncService::new(store.clone(), transport, connectivity),
    store,
    config,
  };

  app.run(args.command).await
}
