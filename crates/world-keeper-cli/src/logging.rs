//! Logging setup.
//!
//! `RUST_LOG` wins when set. Otherwise the keeper crates log at `info`,
//! and so does the `server` target that carries the game server's own
//! output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "warn,world_keeper=info,world_keeper_core=info,world_keeper_storage=info,world_keeper_process=info,server=info";

pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
