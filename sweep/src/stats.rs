//! Periodic throughput reporting.
//!
//! The reporter samples the shared row counter on a fixed interval and logs
//! two rates: the average since the run began and the instantaneous rate
//! since the previous sample. It is off the critical path. Uploaders never
//! wait on it, and once they have drained it flushes one last reading and
//! exits.

use std::time::Duration;

use metrics::gauge;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::{counters::Counters, signals::Watcher};

/// One sample of the run's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Rows rendered so far
    pub rows_generated: u64,
    /// Rows the run will render in total
    pub rows_total: u64,
    /// Time since the reporter started
    pub elapsed: Duration,
    /// Rows per second over `elapsed`
    pub average: f64,
    /// Rows per second since the previous reading
    pub instantaneous: f64,
}

fn rate(rows: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

impl Reading {
    fn new(counters: &Counters, elapsed: Duration, previous: Sample) -> Self {
        let rows_generated = counters.rows_generated();
        Self {
            rows_generated,
            rows_total: counters.rows_total(),
            elapsed,
            average: rate(rows_generated, elapsed),
            instantaneous: rate(
                rows_generated.saturating_sub(previous.rows),
                elapsed.saturating_sub(previous.elapsed),
            ),
        }
    }

    fn emit(&self) {
        gauge!("rows_per_second").set(self.instantaneous);
        info!(
            "generated {} out of {} rows after {:.1}s: {:.0} rows/sec average, {:.0} rows/sec now",
            self.rows_generated,
            self.rows_total,
            self.elapsed.as_secs_f64(),
            self.average,
            self.instantaneous,
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    rows: u64,
    elapsed: Duration,
}

#[derive(Debug)]
/// Logs run throughput until the uploaders drain.
pub struct StatsReporter {
    counters: Counters,
    interval: Duration,
    drained: Watcher,
}

impl StatsReporter {
    /// Create a new [`StatsReporter`] that samples every `interval` and stops
    /// once `drained` is signaled.
    #[must_use]
    pub fn new(counters: Counters, interval: Duration, drained: Watcher) -> Self {
        Self {
            counters,
            interval,
            drained,
        }
    }

    /// Run the reporter. Returns the final reading taken once the uploaders
    /// have drained.
    pub async fn spin(self) -> Reading {
        let Self {
            counters,
            interval,
            mut drained,
        } = self;
        let start = Instant::now();
        let mut previous = Sample::default();
        let mut ticker = time::interval_at(start + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = drained.recv() => {
                    let reading = Reading::new(&counters, start.elapsed(), previous);
                    reading.emit();
                    return reading;
                }
                _ = ticker.tick() => {
                    let reading = Reading::new(&counters, start.elapsed(), previous);
                    reading.emit();
                    previous = Sample {
                        rows: reading.rows_generated,
                        elapsed: reading.elapsed,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::signal;

    #[test]
    fn rates_cover_whole_run_and_last_interval() {
        let counters = Counters::new(10_000);
        counters.add_rows(3_000);
        let previous = Sample {
            rows: 1_000,
            elapsed: Duration::from_secs(10),
        };
        let reading = Reading::new(&counters, Duration::from_secs(20), previous);
        assert_eq!(reading.rows_generated, 3_000);
        assert_eq!(reading.rows_total, 10_000);
        assert!((reading.average - 150.0).abs() < f64::EPSILON);
        assert!((reading.instantaneous - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_elapsed_reports_zero_rate() {
        let counters = Counters::new(1_440);
        counters.add_rows(1_440);
        let reading = Reading::new(&counters, Duration::ZERO, Sample::default());
        assert!(reading.average.abs() < f64::EPSILON);
        assert!(reading.instantaneous.abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn final_reading_flushed_on_drain() {
        let (watcher, broadcaster) = signal();
        let counters = Counters::new(2_880);
        let reporter = tokio::spawn(
            StatsReporter::new(counters.clone(), Duration::from_secs(10), watcher).spin(),
        );
        tokio::task::yield_now().await;

        counters.add_rows(1_440);
        time::advance(Duration::from_secs(25)).await;
        counters.add_rows(1_440);
        broadcaster.signal();

        let reading = reporter.await.expect("reporter panicked");
        assert_eq!(reading.rows_generated, 2_880);
        assert_eq!(reading.rows_total, 2_880);
        assert!(reading.elapsed >= Duration::from_secs(25));
        assert!(reading.average > 0.0);
    }
}
