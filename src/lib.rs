#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod error;
mod hash;
mod io;
pub mod orchestrator;
pub mod pipeline;
#[cfg(any(feature = "live", feature = "server"))]
pub mod server;
pub mod stages;
pub mod tasks;
pub mod watch;

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use crate::config::{BuildConfig, Layout, Mode};
pub use crate::error::*;
pub use crate::orchestrator::{Context, Notifier, Orchestrator, Reload, Task, TaskResult};
pub use crate::pipeline::{Asset, Collect, Pipeline, Source, Transform};

/// Environment variable holding the log filter, e.g. `tsumiki=debug`.
pub const LOG_VAR: &str = "TSUMIKI_LOG";

/// Installs the global subscriber: formatted events plus a progress spinner
/// for every running task span.
///
/// `level` overrides [`LOG_VAR`]; without either, `info` is used. Calling
/// this more than once keeps the first subscriber.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let indicatif = IndicatifLayer::new();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init();
}
