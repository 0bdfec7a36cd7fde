//! Metrics export.
//!
//! Every module records through the `metrics` facade. Unless an exporter is
//! installed here those records go nowhere.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::{debug, info};

use crate::config::Telemetry;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`install`].
pub enum Error {
    /// The exporter could not be built or bound
    #[error("failed to install prometheus exporter: {0}")]
    Prometheus(#[from] BuildError),
}

/// Install the configured exporter, if any.
///
/// Must be called from within a tokio runtime, the exporter's listener runs
/// on it.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed, for instance when
/// its address is already bound or a recorder is already in place.
pub fn install(telemetry: Option<&Telemetry>) -> Result<(), Error> {
    let Some(Telemetry::Prometheus { addr }) = telemetry else {
        debug!("no telemetry configured, metrics are discarded");
        return Ok(());
    };
    PrometheusBuilder::new().with_http_listener(*addr).install()?;
    info!(%addr, "serving prometheus metrics");
    Ok(())
}
