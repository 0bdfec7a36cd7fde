//! The sweep payloads
//!
//! This library renders synthetic minute-resolution temperature series into
//! the wire formats accepted by metrics ingestion backends. Nothing in here
//! performs I/O beyond writing into a caller supplied [`std::io::Write`].

#![deny(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::io::{self, Write};

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use import::Import;
pub use line_protocol::LineProtocol;
pub use temperature::Temperature;

pub mod import;
pub mod line_protocol;
pub mod temperature;

/// The metric name every series is reported under.
pub const METRIC_NAME: &str = "temperature";

/// Distance between two consecutive rows of a series, in milliseconds.
pub const ROW_INTERVAL_MILLIS: i64 = 60 * 1000;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Number of rows covering one calendar day at one-minute resolution.
pub const ROWS_PER_DAY: u32 = 24 * 60;

/// Errors related to rendering
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    /// The exponential distribution could not be constructed
    #[error("Invalid exponential rate: {0}")]
    Exp(#[from] rand_distr::ExpError),
    /// Requested more decimal digits than an f64 carries
    #[error("{0} decimal digits exceed the supported maximum of {max}", max = temperature::MAX_DIGITS)]
    Digits(u8),
    /// A row's timestamp cannot be expressed in nanoseconds since the epoch
    #[error("timestamp {0}ms does not fit in nanoseconds since the epoch")]
    TimestampRange(i64),
}

/// One sensor's samples for one span of time, the unit of work handed to an
/// uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Series {
    /// Identifier of the sensor this series belongs to
    pub sensor_key: i64,
    /// Timestamp of the first row, milliseconds since the epoch
    pub start_timestamp_ms: i64,
    /// Number of one-minute rows in the series
    pub rows: u32,
}

impl Series {
    /// Create a series covering one full day starting at `start_timestamp_ms`.
    #[must_use]
    pub fn day(sensor_key: i64, start_timestamp_ms: i64) -> Self {
        Self {
            sensor_key,
            start_timestamp_ms,
            rows: ROWS_PER_DAY,
        }
    }

    /// Timestamp of `row`, milliseconds since the epoch.
    #[must_use]
    pub fn timestamp_ms(&self, row: u32) -> i64 {
        self.start_timestamp_ms + i64::from(row) * ROW_INTERVAL_MILLIS
    }

    /// Timestamp of `row`, nanoseconds since the epoch. `None` outside of
    /// roughly 1677-09-21 to 2262-04-11, where an i64 cannot hold it.
    #[must_use]
    pub fn timestamp_ns(&self, row: u32) -> Option<i64> {
        self.timestamp_ms(row).checked_mul(NANOS_PER_MILLI)
    }
}

/// To render a series into bytes
pub trait Render {
    /// Write the rows of `series` into `writer`, drawing values from `rng`.
    ///
    /// Implementations MUST consume randomness from `rng` identically no
    /// matter the output format: one baseline draw followed by one draw per
    /// row, in row order.
    ///
    /// # Errors
    ///
    /// Errors come from the underlying writer.
    fn render<W, R>(&self, rng: &mut R, series: &Series, writer: &mut W) -> Result<(), Error>
    where
        R: Rng + ?Sized,
        W: Write;
}

fn default_sensor_tag() -> bool {
    true
}

/// Configuration for `Payload`
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Config {
    /// Newline delimited JSON, one object per series
    #[default]
    Import,
    /// Line protocol, one line per row
    LineProtocol {
        /// Whether to tag each line with the sensor identifier
        #[serde(default = "default_sensor_tag")]
        sensor_tag: bool,
    },
}

/// Unified payload type for all renderers
#[derive(Debug, Clone, Copy)]
pub enum Payload {
    /// See [`Import`]
    Import(Import),
    /// See [`LineProtocol`]
    LineProtocol(LineProtocol),
}

impl Payload {
    /// Build the renderer selected by `config`, formatting values with
    /// `digits` decimal places.
    ///
    /// # Errors
    ///
    /// Fails if `digits` exceeds [`temperature::MAX_DIGITS`].
    pub fn new(config: Config, digits: u8) -> Result<Self, Error> {
        let temperature = Temperature::new(digits)?;
        Ok(match config {
            Config::Import => Self::Import(Import::new(temperature)),
            Config::LineProtocol { sensor_tag } => {
                Self::LineProtocol(LineProtocol::new(temperature, sensor_tag))
            }
        })
    }
}

impl Render for Payload {
    fn render<W, R>(&self, rng: &mut R, series: &Series, writer: &mut W) -> Result<(), Error>
    where
        R: Rng + ?Sized,
        W: Write,
    {
        match self {
            Payload::Import(ser) => ser.render(rng, series, writer),
            Payload::LineProtocol(ser) => ser.render(rng, series, writer),
        }
    }
}
