//! This module controls configuration parsing from the end user. Every check
//! the pipeline relies on happens here, before any work is enumerated, so a
//! bad configuration never produces a partial run.

use std::{net::SocketAddr, num::NonZeroU32, time::Duration};

use http::Uri;
use serde::{Deserialize, Serialize};
use sweep_payload::Series;
use time::{Date, macros::date};

use crate::work::{self, WorkEnumerator};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// The date range is inverted
    #[error("start_date={start} cannot exceed end_date={end}")]
    DateRange {
        /// First day of the sweep
        start: Date,
        /// Last day of the sweep
        end: Date,
    },
    /// The sensor key range is inverted
    #[error("start_key={start} cannot exceed end_key={end}")]
    KeyRange {
        /// First sensor key
        start: i64,
        /// Last sensor key
        end: i64,
    },
    /// No uploaders configured
    #[error("workers must be at least 1")]
    ZeroWorkers,
    /// More digits requested than the payload supports
    #[error("digits={0} exceeds the maximum of {max}", max = sweep_payload::temperature::MAX_DIGITS)]
    Digits(u8),
    /// Stats would be reported continuously
    #[error("report_interval_seconds must be at least 1")]
    ZeroReportInterval,
    /// The sink is not a plain HTTP URI
    #[error("sink {0} must be an absolute http:// URI")]
    Sink(Uri),
    /// Line protocol cannot timestamp every row of the date range
    #[error(
        "line protocol timestamps for {start}..={end} do not fit in nanoseconds since the epoch"
    )]
    TimestampRange {
        /// First day of the sweep
        start: Date,
        /// Last day of the sweep
        end: Date,
    },
}

fn default_start_date() -> Date {
    date!(2019 - 01 - 01)
}

fn default_end_date() -> Date {
    date!(2019 - 01 - 31)
}

fn default_start_key() -> i64 {
    1
}

fn default_end_key() -> i64 {
    2
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_sink() -> Uri {
    Uri::from_static("http://localhost:8428/api/v1/import")
}

fn default_digits() -> u8 {
    5
}

fn default_report_interval_seconds() -> u64 {
    10
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// First day of the sweep, `YYYY-MM-DD`
    #[serde(default = "default_start_date", with = "calendar_day")]
    pub start_date: Date,
    /// Last day of the sweep, inclusive, `YYYY-MM-DD`
    #[serde(default = "default_end_date", with = "calendar_day")]
    pub end_date: Date,
    /// First sensor key
    #[serde(default = "default_start_key")]
    pub start_key: i64,
    /// Last sensor key, inclusive
    #[serde(default = "default_end_key")]
    pub end_key: i64,
    /// The number of concurrent uploaders
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// The URI of the ingestion sink
    #[serde(default = "default_sink", with = "http_serde::uri")]
    pub sink: Uri,
    /// Whether to gzip request bodies
    #[serde(default)]
    pub compress: bool,
    /// Decimal digits after the point in generated temperatures
    #[serde(default = "default_digits")]
    pub digits: u8,
    /// The wire format to render series in
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub format: sweep_payload::Config,
    /// The maximum number of series streamed in one request. Zero means a
    /// single request per uploader for the whole run.
    #[serde(default)]
    pub max_items_per_request: u32,
    /// The period on which throughput is reported
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: u64,
    /// Seed for the uploaders' random streams. Wall clock derived if unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// The method by which to express telemetry
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            start_key: default_start_key(),
            end_key: default_end_key(),
            workers: default_workers(),
            sink: default_sink(),
            compress: false,
            digits: default_digits(),
            format: sweep_payload::Config::default(),
            max_items_per_request: 0,
            report_interval_seconds: default_report_interval_seconds(),
            seed: None,
            telemetry: None,
        }
    }
}

/// Defines the manner of telemetry export.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Telemetry {
    /// In prometheus mode metrics are served on an HTTP endpoint
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
    },
}

impl Config {
    /// Parse a YAML document into a [`Config`]. Fields absent from the
    /// document take their defaults. The result is not validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid configuration.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), Error> {
        if self.start_date > self.end_date {
            return Err(Error::DateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.start_key > self.end_key {
            return Err(Error::KeyRange {
                start: self.start_key,
                end: self.end_key,
            });
        }
        if self.workers == 0 {
            return Err(Error::ZeroWorkers);
        }
        if self.digits > sweep_payload::temperature::MAX_DIGITS {
            return Err(Error::Digits(self.digits));
        }
        if self.report_interval_seconds == 0 {
            return Err(Error::ZeroReportInterval);
        }
        if self.sink.scheme_str() != Some("http") || self.sink.authority().is_none() {
            return Err(Error::Sink(self.sink.clone()));
        }
        if matches!(self.format, sweep_payload::Config::LineProtocol { .. }) {
            let first = Series::day(self.start_key, work::midnight_ms(self.start_date));
            let last = Series::day(self.end_key, work::midnight_ms(self.end_date));
            if first.timestamp_ns(0).is_none() || last.timestamp_ns(last.rows - 1).is_none() {
                return Err(Error::TimestampRange {
                    start: self.start_date,
                    end: self.end_date,
                });
            }
        }
        Ok(())
    }

    /// The sweep over the configured date and key ranges.
    #[must_use]
    pub fn work(&self) -> WorkEnumerator {
        WorkEnumerator::new(self.start_date, self.end_date, self.start_key, self.end_key)
    }

    /// The period on which throughput is reported.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds)
    }

    /// The per-request series limit, `None` when unlimited.
    #[must_use]
    pub fn request_limit(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.max_items_per_request)
    }
}

mod calendar_day {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::Error as _};
    use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

    const FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub(super) fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = date.format(FORMAT).map_err(S::Error::custom)?;
        serializer.serialize_str(&s)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(D::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Date, time::error::Parse> {
        Date::parse(s, FORMAT)
    }
}

/// Parse a `YYYY-MM-DD` calendar day.
///
/// # Errors
///
/// Returns an error if `s` is not a valid calendar day.
pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    calendar_day::parse(s)
}
