use std::panic::{self, AssertUnwindSafe};

use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use das_slurper::{monitoring::Alerter, Client, Config, Writer, ZmqTransport};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*};

mod args;

#[cfg(feature = "hdf5")]
fn dataset_writer() -> das_slurper::persist::Hdf5Writer {
    das_slurper::persist::Hdf5Writer
}

#[cfg(not(feature = "hdf5"))]
fn dataset_writer() -> das_slurper::RawWriter {
    das_slurper::RawWriter
}

fn init_tracing(args: &args::Args) -> anyhow::Result<()> {
    let level = args::convert_filter(args.verbose.log_level_filter());
    let file_layer = match &args.logfile {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(args::log_appender(path)?),
        ),
        None => None,
    };
    tracing_subscriber::registry()
        .with(level)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Everything after configuration. Any error out of here stops the process.
fn ingest(cfg: &Config, shutdown: &Receiver<()>) -> anyhow::Result<()> {
    let base = cfg.base_path()?.to_path_buf();
    info!(base = %base.display(), dir_format = %cfg.output.dir_format, "Output tree");
    let transport = ZmqTransport::connect(&cfg.producer.host, cfg.producer.port, cfg.timeout())?;
    let writer = Writer::new(base, cfg.output.dir_format.clone(), dataset_writer());
    let mut client = Client::new(transport, writer, cfg);
    client.run(shutdown)?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

fn main() -> anyhow::Result<()> {
    let args = args::Args::parse();
    init_tracing(&args)?;

    let mut cfg = Config::load_or_default(&args.config)?;
    args.apply(&mut cfg);
    cfg.validate()?;
    info!(
        host = %cfg.producer.host,
        port = cfg.producer.port,
        "Starting das_slurper"
    );

    let alerter = Alerter::from_config(&cfg.alert);

    // Signals only flag the loop, which tears the transport down itself
    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        warn!("Got termination signal");
        let _ = stop_tx.try_send(());
    })?;

    match panic::catch_unwind(AssertUnwindSafe(|| ingest(&cfg, &stop_rx))) {
        Ok(Ok(())) => {
            info!("Stopped cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Unexpected error in client: {:#}", e);
            alerter.send(&format!("das_slurper stopped: {e:#}"));
            Err(e)
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!("Client panicked: {}", msg);
            alerter.send(&format!("das_slurper panicked: {msg}"));
            std::process::exit(101);
        }
    }
}
