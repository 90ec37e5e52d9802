use std::process;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use refget::config::{self, CONFIG, SERVICEVERSION};
use refget::fhcache::FhCache;
use refget::http::Server;
use refget::store::IndexStore;

const PORT: u16 = 8080;

#[tokio::main]
async fn main() {
    let config = &*CONFIG;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter()))
        .init();
    info!("Setting log level to: {}", config.log_filter());
    info!("Logging configured. Refget version {SERVICEVERSION} starting.");

    if !config.indexdbpath.is_file() {
        eprintln!(
            "Error: Index DB file not found: {}. Please set the env variable INDEXDBPATH to the right path.",
            config.indexdbpath.display()
        );
        process::exit(1);
    }
    if !config.seqpath.is_dir() {
        eprintln!(
            "Error: Data file directory not found: {}. Please set the env variable SEQPATH to the right path.",
            config.seqpath.display()
        );
        process::exit(1);
    }

    let store = match IndexStore::open(&config.indexdbpath) {
        Ok(store) => store,
        Err(err) => {
            eprintln!(
                "Error: could not open index DB {}: {err}",
                config.indexdbpath.display()
            );
            process::exit(1);
        }
    };
    info!("Index store loaded with {} keys", store.len());

    let server = Arc::new(Server::new(
        store,
        FhCache::new(config::max_open_filehandles()),
        config.seqpath.clone(),
        &config.mountpath,
        config.alias_authority.clone(),
    ));

    let listener = TcpListener::bind(("0.0.0.0", PORT))
        .await
        .expect("Failed to bind to address");

    info!("Refget server running on http://0.0.0.0:{PORT}");

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install signal handler");

    tokio::select! {
        _ = server.clone().run(listener) => {}
        _ = signal::ctrl_c() => {
            info!("Interrupt received, stopping server...");
        }
        _ = sigterm.recv() => {
            info!("Termination signal received, stopping server...");
        }
    }

    server.close_all();
    info!("Server shutdown complete");
}
