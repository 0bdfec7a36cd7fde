//! Row accounting shared between uploaders and the stats reporter.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use metrics::{counter, gauge};

#[derive(Debug)]
struct Inner {
    rows_generated: AtomicU64,
    rows_total: u64,
}

/// Handle to the run's row counters.
///
/// Clones share the same counters. Uploaders only ever add to
/// `rows_generated`, the reporter only ever loads it, so no lock is
/// involved.
#[derive(Debug, Clone)]
pub struct Counters {
    inner: Arc<Inner>,
}

impl Counters {
    /// Create counters for a run that will produce `rows_total` rows.
    #[must_use]
    pub fn new(rows_total: u64) -> Self {
        gauge!("rows_total").set(rows_total as f64);
        Self {
            inner: Arc::new(Inner {
                rows_generated: AtomicU64::new(0),
                rows_total,
            }),
        }
    }

    /// Record `rows` freshly rendered rows.
    pub fn add_rows(&self, rows: u64) {
        self.inner.rows_generated.fetch_add(rows, Ordering::Relaxed);
        counter!("rows_generated").increment(rows);
    }

    /// Rows rendered so far.
    #[must_use]
    pub fn rows_generated(&self) -> u64 {
        self.inner.rows_generated.load(Ordering::Relaxed)
    }

    /// Rows the run will have rendered once it completes.
    #[must_use]
    pub fn rows_total(&self) -> u64 {
        self.inner.rows_total
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counters = Counters::new(8 * 10_000 * 1440);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        counters.add_rows(1440);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("incrementing thread panicked");
        }
        assert_eq!(counters.rows_generated(), counters.rows_total());
    }
}
