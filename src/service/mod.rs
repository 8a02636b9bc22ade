use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub mod client;
pub mod hub;
pub mod metrics;
pub mod responses;
pub mod routes;
pub mod server;
pub mod status;
pub mod validation;

pub use client::HubClient;
pub use hub::{Hub, HubOptions, DEFAULT_DEADLINE, DEFAULT_MAX_GET_ENTRIES};
pub use metrics::HubMetrics;
pub use routes::{normalize_prefix, Endpoint};
pub use server::{create_server, hub_router, run_server};
pub use status::{to_http_status, ErrorMapper, HubError};

/// Configuration for the hub server binary
#[derive(Debug, Clone, Parser)]
#[command(name = "gossip-hub", about = "Gossip hub personality over a verifiable log")]
pub struct HubConfig {
    /// Address the HTTP server listens on
    #[arg(long, env = "HUB_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
    /// URL prefix the hub handlers are mounted under
    #[arg(long, env = "HUB_PREFIX", default_value = "")]
    pub prefix: String,
    /// Backend log id served by this hub
    #[arg(long, env = "HUB_LOG_ID", default_value_t = 1)]
    pub log_id: i64,
    /// JSON file listing the accepted source log keys
    #[arg(long, env = "HUB_KEYS_FILE")]
    pub keys_file: PathBuf,
    /// Deadline for each backend call, in milliseconds
    #[arg(long, env = "HUB_DEADLINE_MS", default_value_t = 10_000)]
    pub deadline_ms: u64,
    /// Maximum leaves returned by one get-entries request (0 = default)
    #[arg(long, env = "HUB_MAX_GET_ENTRIES", default_value_t = DEFAULT_MAX_GET_ENTRIES)]
    pub max_get_entries: u64,
}

impl HubConfig {
    /// Instance options derived from the command line
    #[must_use]
    pub fn options(&self) -> HubOptions {
        HubOptions {
            deadline: Duration::from_millis(self.deadline_ms),
            max_get_entries: self.max_get_entries,
            error_mapper: None,
        }
    }
}
