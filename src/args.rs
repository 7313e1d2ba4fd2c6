//! Argument parsing for running from the command line

use std::path::{Path, PathBuf};

use clap::Parser;
use das_slurper::Config;
use tracing_appender::rolling::{self, RollingFileAppender};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file, defaults are used if it doesn't exist
    #[clap(short, long, default_value = "das_slurper.toml")]
    pub config: PathBuf,
    /// Producer host
    #[clap(short = 'H', long)]
    pub host: Option<String>,
    /// Producer port
    #[clap(short = 'P', long)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,
    /// Output sampling rate (Hz), 0 for no time resampling
    #[clap(short, long)]
    pub time_sps: Option<u32>,
    /// Output sample distance (m), 0 for no space resampling
    #[clap(short, long)]
    pub distance_step: Option<f64>,
    /// Output directory name, `{yyyymmdd}` is replaced by the packet date
    #[clap(short, long)]
    pub prefix: Option<String>,
    /// Root of the output tree, takes precedence over the configured paths
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Also write logs to this file, rotated daily at UTC midnight with a `.YYYY-MM-DD` suffix
    #[clap(short, long)]
    pub logfile: Option<PathBuf>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    /// Patch the file configuration with whatever was given on the command line
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(host) = &self.host {
            cfg.producer.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.producer.port = port;
        }
        if let Some(sps) = self.time_sps {
            cfg.output.target_sps = sps;
        }
        if let Some(dx) = self.distance_step {
            cfg.output.target_dx = dx;
        }
        if let Some(prefix) = &self.prefix {
            cfg.output.dir_format = prefix.clone();
        }
        if let Some(output) = &self.output {
            cfg.output.base_paths.insert(0, output.clone());
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

/// Daily rolling writer for `--logfile`, the current day's file is `<path>.<YYYY-MM-DD>`
pub fn log_appender(path: &Path) -> anyhow::Result<RollingFileAppender> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(rolling::daily(dir, name))
}
