//! Handshake Sweeper Service
//!
//! Flips overdue `pending` handshakes to `expired` on a fixed interval.
//! Claims already apply expiry lazily, so the sweeper is hardening, not a
//! correctness requirement: it keeps dead invitations out of inboxes even
//! when nobody touches them again.
//!
//! # Running
//!
//! ```bash
//! HANDSHAKE_DB_URL=... HANDSHAKE_DB_SERVICE_KEY=... \
//! RUST_LOG=info cargo run -p sweeper
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use handshake_core::expire_overdue;
use handshake_core::store::RecordStore;
use postgrest_store::{Api, PostgrestStore};

// ── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    pub poll_interval_secs: u64,
    /// If true, lists overdue records but does not flip them.
    pub dry_run: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            dry_run: false,
        }
    }
}

fn load_config() -> SweeperConfig {
    let path = std::env::var("SWEEPER_CONFIG").unwrap_or_default();
    if !path.is_empty() {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(config) = serde_json::from_str::<SweeperConfig>(&contents) {
                return config;
            }
        }
        warn!("Failed to load config from {}, using defaults", path);
    }
    SweeperConfig::default()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Main loop ───────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    info!("Handshake sweeper starting...");

    let config = load_config();
    info!(
        "poll={}s, dry_run={}",
        config.poll_interval_secs, config.dry_run
    );

    let api = match Api::from_env() {
        Ok(api) => api,
        Err(e) => {
            error!("Store configuration failed: {}", e);
            std::process::exit(1);
        }
    };
    let store = PostgrestStore::new(api);

    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    let mut iteration = 0u64;

    loop {
        iteration += 1;
        let now = unix_now();

        if config.dry_run {
            match store.list_overdue(now).await {
                Ok(overdue) => {
                    info!("Poll #{}: {} overdue record(s) (dry run)", iteration, overdue.len());
                    for record in &overdue {
                        info!(
                            "  would expire {} (expired {}s ago)",
                            record.id,
                            now - record.expires_at
                        );
                    }
                }
                Err(e) => warn!("Poll #{}: listing overdue records failed: {}", iteration, e),
            }
        } else {
            match expire_overdue(&store, now).await {
                Ok(0) => info!("Poll #{}: nothing overdue", iteration),
                Ok(expired) => info!("Poll #{}: expired {} record(s)", iteration, expired),
                Err(e) => warn!("Poll #{}: sweep failed: {}", iteration, e),
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
