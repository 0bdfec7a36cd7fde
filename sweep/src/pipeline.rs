//! Orchestration of a single run.
//!
//! One producer walks the sweep into the work queue, `workers` uploaders
//! drain it and a stats reporter watches the shared counters from the side.
//! The producer and the uploaders each run on their own blocking thread. The
//! first failure from any of them ends the run: the remaining uploaders are
//! halted and the error is returned without waiting for them.

use std::{convert, time::Duration};

use sweep_payload::Payload;
use tokio::{
    task::{JoinError, JoinSet},
    time::Instant,
};
use tracing::{debug, error, info};

use crate::{
    config::{self, Config},
    counters::Counters,
    signals,
    stats::StatsReporter,
    upload::{self, Uploader},
    work,
};

/// How long the stats reporter is given to flush its final reading.
const STATS_GRACE: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`run`].
pub enum Error {
    /// The configuration is not runnable
    #[error(transparent)]
    Config(#[from] config::Error),
    /// The payload could not be built
    #[error(transparent)]
    Payload(#[from] sweep_payload::Error),
    /// An uploader failed
    #[error(transparent)]
    Upload(#[from] upload::Error),
    /// The producer failed
    #[error(transparent)]
    Work(#[from] work::Error),
    /// A pipeline thread panicked
    #[error("pipeline thread failed: {0}")]
    Join(#[from] JoinError),
}

/// What a completed run accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Rows rendered
    pub rows: u64,
    /// Work items carried
    pub items: u64,
    /// Requests the sink accepted
    pub requests: u64,
    /// Wall time from the first enumerated item to the last response
    pub elapsed: Duration,
}

impl Summary {
    /// Average rows per second over the whole run.
    #[must_use]
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }
}

enum Outcome {
    Enumerated(u64),
    Uploaded(upload::Summary),
}

/// Execute the run described by `config`.
///
/// Must be called from within a multi-threaded tokio runtime.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or if any uploader or
/// the producer fails. Nothing is retried.
pub async fn run(config: &Config) -> Result<Summary, Error> {
    config.validate()?;
    let payload = Payload::new(config.format, config.digits)?;
    let work = config.work();
    let counters = Counters::new(work.total_rows());
    info!(
        items = work.total_items(),
        rows = work.total_rows(),
        workers = config.workers,
        sink = %config.sink,
        "starting sweep"
    );

    let (drained_watcher, drained) = signals::signal();
    let (halt_watcher, halt) = signals::signal();
    let stats = tokio::spawn(
        StatsReporter::new(counters.clone(), config.report_interval(), drained_watcher).spin(),
    );

    let start = Instant::now();
    let client = upload::client(config.workers);
    let (snd, rcv) = work::queue();
    let mut tasks = JoinSet::new();
    // The producer takes a blocking thread before any uploader. Uploaders
    // beyond the size of the blocking pool wait in the pool's queue, and the
    // producer must never wait behind them.
    tasks.spawn_blocking(move || work.spin(snd).map(Outcome::Enumerated).map_err(Error::from));
    for id in 0..config.workers {
        let uploader = Uploader::new(
            id,
            config,
            payload,
            client.clone(),
            rcv.clone(),
            counters.clone(),
            halt_watcher.clone(),
        );
        tasks.spawn_blocking(move || uploader.spin().map(Outcome::Uploaded).map_err(Error::from));
    }
    drop(rcv);
    drop(halt_watcher);

    let mut summary = Summary {
        rows: 0,
        items: 0,
        requests: 0,
        elapsed: Duration::ZERO,
    };
    let mut orphaned = None;
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(Error::from).and_then(convert::identity) {
            Ok(Outcome::Enumerated(items)) => debug!("producer finished after {items} items"),
            Ok(Outcome::Uploaded(uploaded)) => {
                summary.items += uploaded.items;
                summary.requests += uploaded.requests;
            }
            // The producer only fails once every uploader is gone. The
            // uploader that caused it is still to be joined.
            Err(err @ Error::Work(_)) => orphaned = Some(err),
            Err(err) => {
                error!("aborting run: {err}");
                halt.signal();
                stats.abort();
                tasks.detach_all();
                return Err(err);
            }
        }
    }
    if let Some(err) = orphaned {
        error!("aborting run: {err}");
        stats.abort();
        return Err(err);
    }
    summary.elapsed = start.elapsed();
    summary.rows = counters.rows_generated();

    if drained.signal_and_wait(STATS_GRACE).await {
        if let Err(err) = stats.await {
            debug!("stats reporter did not finish cleanly: {err}");
        }
    } else {
        stats.abort();
    }
    Ok(summary)
}
