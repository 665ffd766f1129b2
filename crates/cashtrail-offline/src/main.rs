//! CashTrail offline - drives the offline cache outside a browser.
//!
//! Runs the worker's install, activate and fetch handlers against a live
//! origin, with the cache kept on disk so successive runs behave like
//! successive page loads.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cashtrail_offline_core::{
    CacheStorage, Destination, DiskCacheStorage, ExtendableEvent, FetchOutcome, HttpNetwork,
    OfflineCacheManager, Request, Url, WorkerConfig,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod host;

use host::CliHost;

const USAGE: &str = "\
Usage: cashtrail-offline <command>

Commands:
  install                          Precache the manifest and drop old cache versions
  fetch <path-or-url> [--document|--image]
                                   Answer one request the way the worker would
  status                           List cache stores and their entries

Environment:
  CASHTRAIL_CONFIG      Path to a config JSON file
  CASHTRAIL_ORIGIN      Origin to serve when no config file exists
  CASHTRAIL_DEPLOYMENT  'pages' (default, /CashTrail prefix) or 'root'
  CASHTRAIL_CACHE_DIR   Where cache stores are written
  RUST_LOG              Log filter (default: warn)";

type Manager = OfflineCacheManager<DiskCacheStorage, HttpNetwork, CliHost>;

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = load_config()?;
    let storage = Arc::new(DiskCacheStorage::new(cache_dir()?)?);
    info!(cache = %config.cache_name, dir = %storage.cache_dir().display(), "Using cache directory");

    match command.as_str() {
        "install" => {
            let manager = build_manager(config, storage)?;
            install(&manager).await
        }
        "fetch" => {
            let target = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("fetch needs a path or URL\n\n{}", USAGE))?;
            let manager = build_manager(config, storage)?;
            fetch(&manager, target, &args[2..]).await
        }
        "status" => status(&config, &storage).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command '{}'\n\n{}", other, USAGE)),
    }
}

fn load_config() -> Result<WorkerConfig> {
    if let Ok(path) = std::env::var("CASHTRAIL_CONFIG") {
        return WorkerConfig::load(&PathBuf::from(path));
    }

    let path = WorkerConfig::config_path()?;
    if path.exists() {
        return WorkerConfig::load(&path);
    }

    let origin = std::env::var("CASHTRAIL_ORIGIN")
        .context("No config file found and CASHTRAIL_ORIGIN is not set")?;
    let origin = Url::parse(&origin).with_context(|| format!("Invalid CASHTRAIL_ORIGIN: {}", origin))?;

    let config = match std::env::var("CASHTRAIL_DEPLOYMENT").as_deref() {
        Ok("root") => WorkerConfig::cashtrail_root(origin),
        Ok("pages") | Err(_) => WorkerConfig::cashtrail(origin),
        Ok(other) => return Err(anyhow::anyhow!("Unknown CASHTRAIL_DEPLOYMENT '{}'", other)),
    };
    config.validate()?;
    Ok(config)
}

fn cache_dir() -> Result<PathBuf> {
    match std::env::var("CASHTRAIL_CACHE_DIR") {
        Ok(dir) => Ok(PathBuf::from(dir)),
        Err(_) => WorkerConfig::cache_dir(),
    }
}

fn build_manager(config: WorkerConfig, storage: Arc<DiskCacheStorage>) -> Result<Manager> {
    let network = Arc::new(HttpNetwork::new(&config.origin, config.request_timeout())?);
    Ok(OfflineCacheManager::new(config, storage, network, CliHost)?)
}

async fn install(manager: &Manager) -> Result<()> {
    manager.on_install().await.context("Install failed")?;
    let summary = manager.on_activate().await.context("Activation cleanup failed")?;

    println!(
        "Installed {} ({} assets)",
        manager.config().cache_name,
        manager.config().manifest().len()
    );
    for name in &summary.deleted {
        println!("  deleted {}", name);
    }
    for name in &summary.failed {
        println!("  could not delete {}", name);
    }
    Ok(())
}

async fn fetch(manager: &Manager, target: &str, flags: &[String]) -> Result<()> {
    let url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).with_context(|| format!("Invalid URL: {}", target))?
    } else {
        manager.config().resolve(target)?
    };

    let destination = if flags.iter().any(|f| f == "--document") {
        Destination::Document
    } else if flags.iter().any(|f| f == "--image") {
        Destination::Image
    } else {
        Destination::from_path(url.path())
    };
    let request = if destination == Destination::Document {
        Request::navigate(url)
    } else {
        Request::get(url).with_destination(destination)
    };

    let event = ExtendableEvent::new();
    let outcome = manager.on_fetch(&request, &event).await;
    // Let background refreshes land before the process exits
    event.settled().await;

    match outcome? {
        FetchOutcome::Respond { response, source } => {
            println!(
                "{} {} ({:?}, {} bytes)",
                response.status,
                response.status_text,
                source,
                response.body.len()
            );
        }
        FetchOutcome::Passthrough => {
            println!("passthrough: {} is not handled by the worker", request.url);
        }
    }
    Ok(())
}

async fn status(config: &WorkerConfig, storage: &DiskCacheStorage) -> Result<()> {
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No cache stores in {}", storage.cache_dir().display());
        return Ok(());
    }

    for name in names {
        let entries = storage.entries(&name).await?;
        let marker = if name == config.cache_name { " (current)" } else { " (stale)" };
        println!("{}{}: {} entries", name, marker, entries.len());
        for (key, cached) in entries {
            println!(
                "  {:<60} {:>4} {}",
                key.url(),
                cached.response.status,
                cached.age_display()
            );
        }
    }
    Ok(())
}
