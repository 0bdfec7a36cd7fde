//! JSON line import payload.
//!
//! One object per series, matching the `/api/v1/import` format of
//! VictoriaMetrics:
//!
//! ```text
//! {"metric":{"__name__":"temperature","sensor_id":"789"},"values":[68.34,69.61],"timestamps":[1234,61234]}
//! ```

use std::io::Write;

use rand::Rng;

use crate::{Error, METRIC_NAME, Render, Series, Temperature};

#[derive(Debug, Clone, Copy)]
/// Renders series as newline delimited JSON import objects.
pub struct Import {
    temperature: Temperature,
}

impl Import {
    /// Create a new instance of `Import`
    #[must_use]
    pub fn new(temperature: Temperature) -> Self {
        Self { temperature }
    }
}

impl Render for Import {
    fn render<W, R>(&self, rng: &mut R, series: &Series, writer: &mut W) -> Result<(), Error>
    where
        R: Rng + ?Sized,
        W: Write,
    {
        let prec = self.temperature.digits();
        let baseline = self.temperature.baseline(rng);

        write!(
            writer,
            r#"{{"metric":{{"__name__":"{METRIC_NAME}","sensor_id":"{key}"}},"values":["#,
            key = series.sensor_key
        )?;
        for row in 0..series.rows {
            if row > 0 {
                writer.write_all(b",")?;
            }
            let value = self.temperature.reading(rng, baseline);
            write!(writer, "{value:.prec$}")?;
        }
        writer.write_all(br#"],"timestamps":["#)?;
        for row in 0..series.rows {
            if row > 0 {
                writer.write_all(b",")?;
            }
            write!(writer, "{}", series.timestamp_ms(row))?;
        }
        writer.write_all(b"]}\n")?;
        Ok(())
    }
}
