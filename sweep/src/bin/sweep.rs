use std::{env, io::Read, net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use http::Uri;
use jemallocator::Jemalloc;
use sweep::{
    config::{self, Config, Telemetry},
    pipeline, telemetry,
};
use time::Date;
use tokio::runtime::Builder;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Blocking threads available beyond those the uploaders hold.
const BLOCKING_HEADROOM: usize = 512;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load sweep config: {0}")]
    Config(#[from] config::Error),
    #[error(transparent)]
    Telemetry(#[from] telemetry::Error),
    #[error(transparent)]
    Pipeline(#[from] pipeline::Error),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// Newline delimited JSON, one object per series
    Import,
    /// Line protocol, one line per row
    LineProtocol,
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    args: SweepArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<String>,
}

#[derive(Args)]
struct SweepArgs {
    /// path on disk to the configuration file, defaults apply if absent
    #[clap(long)]
    config_path: Option<String>,
    /// first day of the sweep, YYYY-MM-DD
    #[clap(long, value_parser = config::parse_date)]
    start_date: Option<Date>,
    /// last day of the sweep, inclusive, YYYY-MM-DD
    #[clap(long, value_parser = config::parse_date)]
    end_date: Option<Date>,
    /// first sensor key
    #[clap(long, allow_negative_numbers = true)]
    start_key: Option<i64>,
    /// last sensor key, inclusive
    #[clap(long, allow_negative_numbers = true)]
    end_key: Option<i64>,
    /// number of concurrent uploaders
    #[clap(long)]
    workers: Option<usize>,
    /// URI of the ingestion sink
    #[clap(long)]
    sink: Option<Uri>,
    /// gzip request bodies
    #[clap(long)]
    compress: bool,
    /// decimal digits after the point in generated temperatures
    #[clap(long)]
    digits: Option<u8>,
    /// wire format to render series in
    #[clap(long, value_enum)]
    format: Option<Format>,
    /// omit the sensor tag from line protocol output
    #[clap(long)]
    no_sensor_tag: bool,
    /// maximum number of series per request, 0 for unlimited
    #[clap(long)]
    max_items_per_request: Option<u32>,
    /// seconds between throughput reports
    #[clap(long)]
    report_interval_seconds: Option<u64>,
    /// seed for the generated values, wall clock derived if absent
    #[clap(long)]
    seed: Option<u64>,
    /// address to bind prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 5)]
    max_shutdown_delay: u16,
}

fn load_config_contents(config_path: Option<&str>) -> Result<Option<String>, Error> {
    if let Ok(env_var_value) = env::var("SWEEP_CONFIG") {
        debug!("Using config from env var 'SWEEP_CONFIG'");
        return Ok(Some(env_var_value));
    }
    let Some(config_path) = config_path else {
        debug!("No configuration given, using defaults");
        return Ok(None);
    };
    debug!("Attempting to open configuration file at: {}", config_path);
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_path)
        .map_err(|err| {
            error!("Could not read config file '{}': {}", config_path, err);
            err
        })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(Some(contents))
}

fn parse_config(contents: Option<&str>) -> Result<Config, Error> {
    let Some(contents) = contents else {
        return Ok(Config::default());
    };
    Config::from_yaml(contents).map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::Config(err)
    })
}

fn validate_config(config_path: Option<&str>) -> Result<Config, Error> {
    let contents = load_config_contents(config_path)?;
    let config = parse_config(contents.as_deref())?;
    config.validate().map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::Config(err)
    })?;
    info!("Configuration file is valid");
    Ok(config)
}

fn get_config(args: &SweepArgs, contents: Option<String>) -> Result<Config, Error> {
    let contents = match contents {
        Some(contents) => Some(contents),
        None => load_config_contents(args.config_path.as_deref())?,
    };
    let mut config = parse_config(contents.as_deref())?;

    if let Some(start_date) = args.start_date {
        config.start_date = start_date;
    }
    if let Some(end_date) = args.end_date {
        config.end_date = end_date;
    }
    if let Some(start_key) = args.start_key {
        config.start_key = start_key;
    }
    if let Some(end_key) = args.end_key {
        config.end_key = end_key;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(sink) = &args.sink {
        config.sink = sink.clone();
    }
    if args.compress {
        config.compress = true;
    }
    if let Some(digits) = args.digits {
        config.digits = digits;
    }
    match args.format {
        Some(Format::Import) => config.format = sweep_payload::Config::Import,
        Some(Format::LineProtocol) => {
            config.format = sweep_payload::Config::LineProtocol {
                sensor_tag: !args.no_sensor_tag,
            };
        }
        None => {
            if let sweep_payload::Config::LineProtocol { sensor_tag } = &mut config.format {
                *sensor_tag &= !args.no_sensor_tag;
            }
        }
    }
    if let Some(max_items_per_request) = args.max_items_per_request {
        config.max_items_per_request = max_items_per_request;
    }
    if let Some(report_interval_seconds) = args.report_interval_seconds {
        config.report_interval_seconds = report_interval_seconds;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(addr) = args.prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus { addr });
    }
    Ok(config)
}

async fn inner_main(config: Config) -> Result<pipeline::Summary, Error> {
    telemetry::install(config.telemetry.as_ref())?;
    Ok(pipeline::run(&config).await?)
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting sweep {version} run.");

    let cli = Cli::parse();
    if let Some(Commands::ConfigCheck(config_check_cmd)) = cli.command {
        match validate_config(config_check_cmd.config_path.as_deref()) {
            Ok(_) => std::process::exit(0),
            Err(_) => std::process::exit(1),
        }
    }

    let config = get_config(&cli.args, None)?;
    let max_shutdown_delay = Duration::from_secs(cli.args.max_shutdown_delay.into());

    // Every uploader parks a blocking thread for the whole run. Name
    // resolution for the sink also needs the blocking pool.
    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .max_blocking_threads(config.workers.saturating_add(BLOCKING_HEADROOM))
        .build()?;
    match runtime.block_on(inner_main(config)) {
        Ok(summary) => {
            info!(
                "Sent {} rows in {} series over {} requests in {:.1}s, {:.0} rows/sec",
                summary.rows,
                summary.items,
                summary.requests,
                summary.elapsed.as_secs_f64(),
                summary.rows_per_second(),
            );
            info!(
                "Shutting down runtime with a {} second delay.",
                max_shutdown_delay.as_secs(),
            );
            runtime.shutdown_timeout(max_shutdown_delay);
            info!("Bye. :)");
            Ok(())
        }
        Err(err) => {
            error!("Run failed: {err}");
            // Uploaders still streaming are abandoned, not drained.
            runtime.shutdown_background();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn flags_override_config_document() {
        let cli = Cli::parse_from([
            "sweep",
            "--start-date",
            "2020-01-01",
            "--end-key",
            "10",
            "--workers",
            "3",
            "--compress",
            "--format",
            "line-protocol",
            "--no-sensor-tag",
            "--seed",
            "42",
            "--prometheus-addr",
            "127.0.0.1:9000",
        ]);
        let contents = "end_date: \"2020-01-31\"\nend_key: 4\ndigits: 2\n";
        let config = get_config(&cli.args, Some(contents.to_string())).expect("invalid config");

        assert_eq!(config.start_date, date!(2020 - 01 - 01));
        assert_eq!(config.end_date, date!(2020 - 01 - 31));
        assert_eq!(config.end_key, 10);
        assert_eq!(config.workers, 3);
        assert!(config.compress);
        assert_eq!(config.digits, 2);
        assert_eq!(
            config.format,
            sweep_payload::Config::LineProtocol { sensor_tag: false }
        );
        assert_eq!(config.seed, Some(42));
        assert!(matches!(config.telemetry, Some(Telemetry::Prometheus { .. })));
        config.validate().expect("config must be valid");
    }

    #[test]
    fn no_sensor_tag_applies_to_configured_line_protocol() {
        let cli = Cli::parse_from(["sweep", "--no-sensor-tag"]);
        let contents = "format:\n  line_protocol: {}\n";
        let config = get_config(&cli.args, Some(contents.to_string())).expect("invalid config");
        assert_eq!(
            config.format,
            sweep_payload::Config::LineProtocol { sensor_tag: false }
        );
    }

    #[test]
    fn empty_document_and_no_flags_is_default() {
        let cli = Cli::parse_from(["sweep"]);
        let config = get_config(&cli.args, Some("{}".to_string())).expect("invalid config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_check_subcommand_parses() {
        let cli = Cli::parse_from(["sweep", "config-check", "--config-path", "/tmp/sweep.yaml"]);
        assert!(matches!(
            cli.command,
            Some(Commands::ConfigCheck(ConfigCheckCommand {
                config_path: Some(ref path)
            })) if path == "/tmp/sweep.yaml"
        ));
    }
}
