//! Influx line protocol payload.
//!
//! One line per row, timestamps in nanoseconds:
//!
//! ```text
//! temperature,sensor_id=789 value=68.34 1234000000
//! ```
//!
//! The sensor tag may be dropped, in which case every series shares the same
//! measurement and only the timestamps tell rows apart.

use std::io::Write;

use rand::Rng;

use crate::{Error, METRIC_NAME, Render, Series, Temperature};

#[derive(Debug, Clone, Copy)]
/// Renders series as line protocol records.
pub struct LineProtocol {
    temperature: Temperature,
    sensor_tag: bool,
}

impl LineProtocol {
    /// Create a new instance of `LineProtocol`
    #[must_use]
    pub fn new(temperature: Temperature, sensor_tag: bool) -> Self {
        Self {
            temperature,
            sensor_tag,
        }
    }
}

impl Render for LineProtocol {
    fn render<W, R>(&self, rng: &mut R, series: &Series, writer: &mut W) -> Result<(), Error>
    where
        R: Rng + ?Sized,
        W: Write,
    {
        let prec = self.temperature.digits();
        let baseline = self.temperature.baseline(rng);

        for row in 0..series.rows {
            let value = self.temperature.reading(rng, baseline);
            let ts = series
                .timestamp_ns(row)
                .ok_or_else(|| Error::TimestampRange(series.timestamp_ms(row)))?;
            if self.sensor_tag {
                writeln!(
                    writer,
                    "{METRIC_NAME},sensor_id={key} value={value:.prec$} {ts}",
                    key = series.sensor_key
                )?;
            } else {
                writeln!(writer, "{METRIC_NAME} value={value:.prec$} {ts}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;

    fn render(seed: u64, series: &Series, digits: u8, sensor_tag: bool) -> String {
        let lp = LineProtocol::new(
            Temperature::new(digits).expect("failed to build temperature"),
            sensor_tag,
        );
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut bytes = Vec::new();
        lp.render(&mut rng, series, &mut bytes)
            .expect("failed to render");
        String::from_utf8(bytes).expect("output is not utf-8")
    }

    #[test]
    fn single_row_is_one_terminated_line() {
        let series = Series {
            sensor_key: 789,
            start_timestamp_ms: 1234,
            rows: 1,
        };
        let out = render(1234, &series, 2, false);
        assert!(out.starts_with("temperature value="), "{out}");
        assert!(out.ends_with(" 1234000000\n"), "{out}");
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn tagged_lines_carry_sensor_id() {
        let series = Series {
            sensor_key: 789,
            start_timestamp_ms: 1234,
            rows: 3,
        };
        let out = render(1234, &series, 2, true);
        let timestamps: Vec<&str> = out
            .lines()
            .map(|line| {
                assert!(line.starts_with("temperature,sensor_id=789 value="), "{line}");
                line.rsplit(' ').next().expect("timestamp missing")
            })
            .collect();
        assert_eq!(
            timestamps,
            vec!["1234000000", "61234000000", "121234000000"]
        );
    }

    #[test]
    fn rows_past_2262_are_rejected() {
        let lp = LineProtocol::new(
            Temperature::new(2).expect("failed to build temperature"),
            true,
        );
        let mut rng = SmallRng::seed_from_u64(1);
        let mut bytes = Vec::new();
        // 2300-01-01
        let series = Series::day(1, 10_413_792_000_000);
        assert!(matches!(
            lp.render(&mut rng, &series, &mut bytes),
            Err(Error::TimestampRange(10_413_792_000_000))
        ));
    }

    // Exactly `rows` lines, each carrying the row's nanosecond timestamp and
    // a value with `digits` decimal places.
    proptest! {
        #[test]
        fn one_line_per_row(seed: u64, rows in 1u32..500, digits in 0u8..8, sensor_tag: bool, start in 0i64..4_102_444_800_000) {
            let series = Series { sensor_key: 42, start_timestamp_ms: start, rows };
            let out = render(seed, &series, digits, sensor_tag);

            prop_assert!(out.ends_with('\n'));
            let lines: Vec<&str> = out.lines().collect();
            prop_assert_eq!(lines.len(), rows as usize);
            for (i, line) in lines.iter().enumerate() {
                let mut parts = line.split(' ');
                let measurement = parts.next().expect("measurement missing");
                let field = parts.next().expect("field missing");
                let ts: i64 = parts.next().expect("timestamp missing").parse().expect("timestamp not an integer");
                prop_assert!(parts.next().is_none());

                prop_assert_eq!(measurement == "temperature,sensor_id=42", sensor_tag);
                prop_assert_eq!(ts, (start + i as i64 * 60_000) * 1_000_000);

                let value = field.strip_prefix("value=").expect("value field missing");
                let decimals = value.split_once('.').map_or(0, |(_, frac)| frac.len());
                prop_assert_eq!(decimals, usize::from(digits));
            }
        }
    }
}
