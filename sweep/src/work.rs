//! Enumeration of the sweep and the queue feeding uploaders.
//!
//! The sweep is the grid of calendar days by sensor keys, walked day-major
//! then key-minor. Each cell becomes one [`WorkItem`]: a full day of
//! one-minute rows for one sensor. Items are handed to uploaders through a
//! rendezvous channel. The producer blocks until some uploader is free to
//! take the item, which is the only backpressure between enumeration and
//! upload.

use crossbeam::channel::{self, Receiver, Sender};
use sweep_payload::{ROWS_PER_DAY, Series};
use time::Date;
use tracing::debug;

/// One sensor's day of samples. Consumed exactly once by exactly one
/// uploader.
pub type WorkItem = Series;

/// Receiving half of the work queue, shared by all uploaders.
pub type WorkReceiver = Receiver<WorkItem>;

/// Sending half of the work queue, owned by the producer.
pub type WorkSender = Sender<WorkItem>;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(thiserror::Error, Debug, Clone, Copy)]
/// Errors produced while feeding the work queue.
pub enum Error {
    /// Every uploader went away with work still pending
    #[error("work queue closed with {remaining} items left to enumerate")]
    Disconnected {
        /// Items never handed to an uploader
        remaining: u64,
    },
}

/// Construct the unbuffered work queue.
///
/// A send completes only once an uploader has received the item.
#[must_use]
pub fn queue() -> (WorkSender, WorkReceiver) {
    channel::bounded(0)
}

/// Lazy, single-pass walk over the sweep grid.
#[derive(Debug, Clone)]
#[allow(missing_copy_implementations)]
pub struct WorkEnumerator {
    start_key: i64,
    end_key: i64,
    day_ms: i64,
    key: i64,
    total_items: u64,
    remaining: u64,
}

fn span(start: i128, end: i128) -> u64 {
    u64::try_from(end - start + 1).unwrap_or(0)
}

pub(crate) fn midnight_ms(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp() * 1000
}

impl WorkEnumerator {
    /// Walk every day in `start_date..=end_date` and, within each day, every
    /// key in `start_key..=end_key`. An inverted range yields nothing.
    #[must_use]
    pub fn new(start_date: Date, end_date: Date, start_key: i64, end_key: i64) -> Self {
        let days = span(
            i128::from(start_date.to_julian_day()),
            i128::from(end_date.to_julian_day()),
        );
        let keys = span(i128::from(start_key), i128::from(end_key));
        let total_items = days.saturating_mul(keys);
        Self {
            start_key,
            end_key,
            day_ms: midnight_ms(start_date),
            key: start_key,
            total_items,
            remaining: total_items,
        }
    }

    /// Number of items the full walk yields.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    /// Number of rows the full walk covers.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.total_items
            .saturating_mul(u64::from(ROWS_PER_DAY))
    }

    /// Drive the walk into `queue`, blocking on every item until an uploader
    /// takes it. The queue closes when this function returns.
    ///
    /// # Errors
    ///
    /// Returns an error if every uploader has gone away before the walk is
    /// done.
    #[allow(clippy::needless_pass_by_value)]
    pub fn spin(self, queue: WorkSender) -> Result<u64, Error> {
        let pending = self.remaining;
        let mut sent = 0;
        for item in self {
            if queue.send(item).is_err() {
                return Err(Error::Disconnected {
                    remaining: pending - sent,
                });
            }
            sent += 1;
        }
        debug!("enumerated {sent} work items, closing queue");
        Ok(sent)
    }
}

impl Iterator for WorkEnumerator {
    type Item = WorkItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = Series::day(self.key, self.day_ms);
        self.remaining -= 1;
        if self.key == self.end_key {
            self.key = self.start_key;
            self.day_ms += MILLIS_PER_DAY;
        } else {
            self.key += 1;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use time::macros::date;

    use super::*;

    const JAN_1_2019_MS: i64 = 1_546_300_800_000;

    #[test]
    fn walks_day_major_then_key_minor() {
        let work = WorkEnumerator::new(date!(2019 - 01 - 01), date!(2019 - 01 - 02), 5, 7);
        assert_eq!(work.total_items(), 6);
        assert_eq!(work.total_rows(), 6 * 1440);

        let cells: Vec<(i64, i64)> = work
            .map(|item| {
                assert_eq!(item.rows, 1440);
                (item.start_timestamp_ms, item.sensor_key)
            })
            .collect();
        let day = MILLIS_PER_DAY;
        assert_eq!(
            cells,
            vec![
                (JAN_1_2019_MS, 5),
                (JAN_1_2019_MS, 6),
                (JAN_1_2019_MS, 7),
                (JAN_1_2019_MS + day, 5),
                (JAN_1_2019_MS + day, 6),
                (JAN_1_2019_MS + day, 7),
            ]
        );
    }

    #[test]
    fn single_cell() {
        let mut work = WorkEnumerator::new(date!(2019 - 01 - 01), date!(2019 - 01 - 01), 1, 1);
        assert_eq!(work.size_hint(), (1, Some(1)));
        assert_eq!(work.next(), Some(Series::day(1, JAN_1_2019_MS)));
        assert_eq!(work.next(), None);
        assert_eq!(work.next(), None);
    }

    #[test]
    fn inverted_ranges_yield_nothing() {
        let work = WorkEnumerator::new(date!(2019 - 01 - 02), date!(2019 - 01 - 01), 1, 1);
        assert_eq!(work.total_items(), 0);
        assert_eq!(work.count(), 0);

        let work = WorkEnumerator::new(date!(2019 - 01 - 01), date!(2019 - 01 - 01), 2, 1);
        assert_eq!(work.total_rows(), 0);
        assert_eq!(work.count(), 0);
    }

    #[test]
    fn key_range_reaching_max_does_not_overflow() {
        let work = WorkEnumerator::new(
            date!(2019 - 01 - 01),
            date!(2019 - 01 - 02),
            i64::MAX - 1,
            i64::MAX,
        );
        let keys: Vec<i64> = work.map(|item| item.sensor_key).collect();
        assert_eq!(keys, vec![i64::MAX - 1, i64::MAX, i64::MAX - 1, i64::MAX]);
    }

    #[test]
    fn queue_delivers_each_item_to_exactly_one_consumer() {
        let work = WorkEnumerator::new(date!(2019 - 01 - 01), date!(2019 - 01 - 10), 1, 20);
        let expected = work.total_items();
        let (snd, rcv) = queue();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let rcv = rcv.clone();
                thread::spawn(move || rcv.iter().collect::<Vec<_>>())
            })
            .collect();
        drop(rcv);

        let sent = work.spin(snd).expect("consumers disappeared");
        assert_eq!(sent, expected);

        let mut received: Vec<(i64, i64)> = consumers
            .into_iter()
            .flat_map(|c| c.join().expect("consumer panicked"))
            .map(|item| (item.start_timestamp_ms, item.sensor_key))
            .collect();
        received.sort_unstable();
        let len = received.len();
        received.dedup();
        assert_eq!(received.len(), len);
        assert_eq!(len as u64, expected);
    }

    #[test]
    fn spin_fails_without_consumers() {
        let work = WorkEnumerator::new(date!(2019 - 01 - 01), date!(2019 - 01 - 01), 1, 3);
        let (snd, rcv) = queue();
        drop(rcv);
        assert!(matches!(
            work.spin(snd),
            Err(Error::Disconnected { remaining: 3 })
        ));
    }
}
