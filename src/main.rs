//! remote-walker - Concurrent Recursive Listing Engine
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use remote_walker::config::{CliArgs, RunConfig};
use remote_walker::entry::sort_lines;
use remote_walker::progress::{print_header, print_summary, ProgressReporter};
use remote_walker::push::PushConnector;
use remote_walker::sink::{BatchSink, OutputSink, StreamingSink};
use remote_walker::walker::{Lister, ListingReport};
use remote_walker::LocalEnumerator;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    let destination = config
        .output_path
        .as_ref()
        .map_or_else(|| "stdout".to_string(), |p| p.display().to_string());

    if config.show_progress {
        print_header(&config.request.root, config.request.workers, &destination);
    }

    let enumerator = LocalEnumerator::new().follow_links(config.follow_links);
    let mut lister = Lister::new(Arc::new(enumerator));
    if let Some(broker) = &config.broker {
        if config.request.push.is_some() {
            lister = lister.with_push(push_connector(broker)?);
        }
    }

    // Setup signal handler for graceful shutdown
    let cancel = lister.cancel_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        cancel.cancel();
    })
    .context("Failed to set signal handler")?;

    let progress = config.show_progress.then(|| Arc::new(ProgressReporter::new()));
    if let Some(p) = &progress {
        p.set_status(if config.request.push.is_some() {
            "Collecting push notifications..."
        } else {
            "Listing..."
        });
    }

    let writer = open_output(&config)?;

    let report = if config.collect {
        let sink = Arc::new(BatchSink::new());
        let report = list(&lister, &config, sink.clone(), progress.clone())?;

        let mut lines = sink.take_lines();
        if config.request.sort_by_name {
            sort_lines(&mut lines);
        }
        write_lines(writer, &lines).context("Failed to write listing")?;
        report
    } else {
        let sink = Arc::new(StreamingSink::new(writer));
        list(&lister, &config, sink, progress.clone())?
    };

    if let Some(p) = &progress {
        if report.completed {
            p.finish("Listing completed");
        } else {
            p.finish("Listing interrupted");
        }
    }

    if let Some(path) = &config.report_path {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("Failed to write report")?;
    }

    if config.show_progress {
        print_summary(&report, &destination);
    }

    if !report.completed {
        info!("Listing was interrupted before completion");
    }

    if report.errors > 0 {
        info!(errors = report.errors, "Listing completed with errors");
    }

    Ok(())
}

fn list(
    lister: &Lister,
    config: &RunConfig,
    sink: Arc<dyn OutputSink>,
    progress: Option<Arc<ProgressReporter>>,
) -> Result<ListingReport> {
    let report = match progress {
        Some(reporter) => {
            lister.run_with_progress(&config.request, sink, move |p| reporter.update(&p))
        }
        None => lister.list_to_sink(&config.request, sink),
    };
    report.context("Listing failed")
}

fn open_output(config: &RunConfig) -> Result<Box<dyn Write + Send>> {
    let writer: Box<dyn Write + Send> = match &config.output_path {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output '{}'", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    Ok(writer)
}

fn write_lines(writer: Box<dyn Write + Send>, lines: &[String]) -> io::Result<()> {
    let mut out = BufWriter::new(writer);
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}

#[cfg(feature = "redis")]
fn push_connector(broker: &str) -> Result<Arc<dyn PushConnector>> {
    if broker.starts_with("redis://") || broker.starts_with("rediss://") {
        let connector = remote_walker::push::redis::RedisConnector::open(broker)
            .context("Invalid Redis broker URL")?;
        return Ok(Arc::new(connector));
    }
    bail!("Unsupported push broker '{}'", broker)
}

#[cfg(not(feature = "redis"))]
fn push_connector(broker: &str) -> Result<Arc<dyn PushConnector>> {
    bail!(
        "Unsupported push broker '{}' (built without the 'redis' feature)",
        broker
    )
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("remote_walker=debug,warn")
    } else {
        EnvFilter::new("remote_walker=info,warn")
    };

    // Listing lines own stdout
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
