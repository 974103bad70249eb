//! Season snapshot scraper for road cycling: teams, riders, races, stages
//! and their rankings, assembled from a statistics website into one
//! immutable `Snapshot` per run.
//!
//! Site-specific page extraction plugs in through `RecordExtractor`;
//! snapshot sinks plug in through `SnapshotExporter`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod entities;
pub mod errors;
pub mod extract;
pub(crate) mod helpers;
pub mod services;

pub use config::ScrapeConfig;
pub use entities::Snapshot;
pub use errors::{ConfigError, ScrapeError};
pub use extract::RecordExtractor;
pub use services::season::{SeasonScraper, SnapshotExporter};

/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "pcs_scraper=debug";

/// Install the global tracing subscriber. `default_filter` applies when
/// `RUST_LOG` is unset; `None` uses `pcs_scraper=debug`.
pub fn init_tracing(default_filter: Option<&str>) {
    let fallback = default_filter.unwrap_or(DEFAULT_LOG_FILTER).to_string();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
