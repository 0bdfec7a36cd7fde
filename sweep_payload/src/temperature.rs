//! Synthetic temperature readings.
//!
//! Every series draws a baseline once, `68 + Exp(3.0)`, and each reading
//! sits an `Exp(1.5)` distributed offset above it, rounded to the
//! configured number of decimal digits. Randomness comes entirely from the
//! caller's PRNG so a seeded stream reproduces the same readings.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::Error;

/// Largest supported count of decimal digits. An f64 carries roughly 15
/// significant decimal digits, beyond that rounding is noise.
pub const MAX_DIGITS: u8 = 15;

const BASELINE: f64 = 68.0;
const BASELINE_RATE: f64 = 3.0;
const OFFSET_RATE: f64 = 1.5;

/// Generator of temperature readings
#[derive(Debug, Clone, Copy)]
pub struct Temperature {
    digits: u8,
    scale: f64,
    jitter: Exp<f64>,
    offset: Exp<f64>,
}

impl Temperature {
    /// Create a new instance of `Temperature` producing readings with
    /// `digits` decimal places.
    ///
    /// # Errors
    ///
    /// Fails if `digits` exceeds [`MAX_DIGITS`].
    pub fn new(digits: u8) -> Result<Self, Error> {
        if digits > MAX_DIGITS {
            return Err(Error::Digits(digits));
        }
        Ok(Self {
            digits,
            scale: 10f64.powi(i32::from(digits)),
            jitter: Exp::new(BASELINE_RATE)?,
            offset: Exp::new(OFFSET_RATE)?,
        })
    }

    /// Number of decimal places readings are rounded to.
    #[must_use]
    pub fn digits(&self) -> usize {
        usize::from(self.digits)
    }

    /// Draw the baseline for a new series.
    pub fn baseline<R>(&self, rng: &mut R) -> f64
    where
        R: Rng + ?Sized,
    {
        BASELINE + self.jitter.sample(rng)
    }

    /// Draw the next reading of a series with the given `baseline`.
    pub fn reading<R>(&self, rng: &mut R, baseline: f64) -> f64
    where
        R: Rng + ?Sized,
    {
        let t = self.offset.sample(rng) + baseline;
        (t * self.scale).round() / self.scale
    }
}
