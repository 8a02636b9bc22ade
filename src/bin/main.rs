use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gossip_hub::backend::{LogBackend, MemoryBackend};
use gossip_hub::keys::KeyRegistry;
use gossip_hub::service::{create_server, run_server, Hub, HubConfig, HubMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = HubConfig::parse();

    let keys = KeyRegistry::load(&config.keys_file)
        .with_context(|| format!("loading keys from {}", config.keys_file.display()))?;
    tracing::info!(keys = keys.len(), "loaded source log keys");

    let backend = MemoryBackend::generate();
    backend.create_log(config.log_id);
    let backend: Arc<dyn LogBackend> = Arc::new(backend);

    // One registry for the whole process
    let metrics = Arc::new(HubMetrics::new());
    let hub = Arc::new(Hub::new(
        config.log_id,
        &config.prefix,
        backend,
        Arc::new(keys),
        config.options(),
        &metrics,
    ));

    let app = create_server(vec![(config.prefix.clone(), hub)], metrics);
    run_server(app, &config.listen).await
}
