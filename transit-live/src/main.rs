//! transit-live: CLI for the live transit feed.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use thiserror::Error;

use transit_core::config::{self, Config};
use transit_core::{FeedError, Pipeline, Tracker};
use transit_live::transport::{self, TransportError};
use transit_live::worker::{DecodeWorker, WorkerError, WorkerResponse};
use transit_live::{logging, FeedSession, Ingested, SessionError};

#[derive(Parser)]
#[command(name = "transit-live", version, about = "Live transit feed decoder and tracker")]
struct Cli {
    /// Extra log directives, e.g. `transit_live::worker=debug`
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode encoded message files and print the worker's response
    Decode {
        /// Message files, one encoded message each
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the full response as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Encode a JSON message into the binary wire format
    Encode {
        /// JSON file holding one `{v, ts?, d}` message
        input: PathBuf,

        /// Output path for the encoded message
        output: PathBuf,
    },

    /// Feed message files in order and print the tracked state
    Track {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Stream from the realtime websocket feed
    Listen {
        /// Feed URL (defaults to the configured transport endpoint)
        #[arg(long, env = "TRANSPORT_URL")]
        url: Option<String>,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the effective configuration
    Config {
        /// Write the current configuration to ~/.transit-live/config.yaml
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("{path}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };
    let directives = cli.log_level.as_deref().or(config.log_level.as_deref());
    logging::init(directives);

    let result = match cli.command {
        Commands::Decode { files, json } => cmd_decode(&config, &files, json).await,
        Commands::Encode { input, output } => cmd_encode(&input, &output),
        Commands::Track { files } => cmd_track(&config, &files).await,
        Commands::Listen { url, limit } => cmd_listen(&config, url, limit).await,
        Commands::Config { init } => cmd_config(&config, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn cmd_decode(config: &Config, files: &[PathBuf], json: bool) -> Result<(), CliError> {
    let worker = DecodeWorker::spawn(Pipeline::default(), &config.worker);
    let handle = worker.handle();

    for path in files {
        let response = handle.process(read_file(path)?).await?;
        if json {
            let text = serde_json::to_string_pretty(&response).map_err(|source| CliError::Json {
                path: path.clone(),
                source,
            })?;
            println!("{text}");
            continue;
        }

        let timings = response.timings();
        match &response {
            WorkerResponse::ProcessedMessage { data, .. } => println!(
                "{}: v{} {} ({} entries) in {:.3} ms",
                path.display(),
                data.version,
                data.data.key(),
                data.data.len(),
                timings.total_ms
            ),
            WorkerResponse::Rejected { error, .. } => println!(
                "{}: rejected [{}] {}",
                path.display(),
                error.kind,
                error.message
            ),
        }
    }

    drop(handle);
    worker.shutdown().await;
    Ok(())
}

fn cmd_encode(input: &Path, output: &Path) -> Result<(), CliError> {
    let text = read_file(input)?;
    let value: serde_json::Value = serde_json::from_slice(&text).map_err(|source| CliError::Json {
        path: input.to_path_buf(),
        source,
    })?;

    let mut bytes = Vec::new();
    ciborium::into_writer(&value, &mut bytes).map_err(|e| FeedError::Serialize(e.to_string()))?;

    // Report what a consumer would make of it; the bytes are written either way.
    match Pipeline::default().process(&bytes).result {
        Ok(envelope) => println!(
            "{}: v{} {} ({} entries)",
            output.display(),
            envelope.version,
            envelope.data.key(),
            envelope.data.len()
        ),
        Err(e) => eprintln!("warning: consumers will reject this message: {e}"),
    }

    std::fs::write(output, &bytes).map_err(FeedError::from)?;
    println!("Wrote {} bytes", bytes.len());
    Ok(())
}

async fn cmd_track(config: &Config, files: &[PathBuf]) -> Result<(), CliError> {
    let worker = DecodeWorker::spawn(Pipeline::default(), &config.worker);
    let mut session: FeedSession = FeedSession::new(worker.handle());

    for path in files {
        if let Ingested::Rejected(error) = session.ingest(read_file(path)?).await? {
            println!("{}: rejected [{}] {}", path.display(), error.kind, error.message);
        }
    }

    print_state(session.tracker());
    drop(session);
    worker.shutdown().await;
    Ok(())
}

async fn cmd_listen(config: &Config, url: Option<String>, limit: Option<usize>) -> Result<(), CliError> {
    let url = url.unwrap_or_else(|| config.transport_endpoint());
    let worker = DecodeWorker::spawn(Pipeline::default(), &config.worker);
    let mut session: FeedSession = FeedSession::new(worker.handle());

    let stats = transport::listen(&url, &mut session, limit, |session, ingested| {
        if let Ingested::Applied(events) = ingested {
            for event in events {
                if let Ok(line) = serde_json::to_string(event) {
                    println!("{line}");
                }
            }
        }
        tracing::debug!(vehicles = session.tracker().vehicles.len(), "state updated");
    })
    .await?;

    println!();
    println!(
        "Listen complete: {} messages, {} rejected, {} ignored frames",
        stats.messages, stats.rejected, stats.ignored_frames
    );
    print_state(session.tracker());
    drop(session);
    worker.shutdown().await;
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> Result<(), CliError> {
    if init {
        let path = config::save_config(config)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Setting", "Value"]);
    let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    table.add_row(vec![Cell::new("config file"), Cell::new(config::config_file().display())]);
    table.add_row(vec![Cell::new("site_url"), Cell::new(&config.site_url)]);
    table.add_row(vec![Cell::new("api_url"), Cell::new(&config.api_url)]);
    table.add_row(vec![Cell::new("transport"), Cell::new(config.transport_endpoint())]);
    table.add_row(vec![
        Cell::new("analytics.script_url"),
        Cell::new(optional(&config.analytics.script_url)),
    ]);
    table.add_row(vec![
        Cell::new("analytics.api_url"),
        Cell::new(optional(&config.analytics.api_url)),
    ]);
    table.add_row(vec![Cell::new("worker.queue_depth"), Cell::new(config.worker.queue_depth)]);
    table.add_row(vec![Cell::new("worker.timeout_ms"), Cell::new(config.worker.timeout_ms)]);
    table.add_row(vec![
        Cell::new("worker.max_message_bytes"),
        Cell::new(config.worker.max_message_bytes),
    ]);
    table.add_row(vec![Cell::new("log_level"), Cell::new(optional(&config.log_level))]);
    println!("{table}");
    Ok(())
}

fn print_state<H>(tracker: &Tracker<H>) {
    println!();
    println!(
        "Messages: {} total, {} applied, {} rejected; {} vehicles, {} stops",
        tracker.total_messages,
        tracker.applied_messages,
        tracker.rejected_messages,
        tracker.vehicles.len(),
        tracker.stops.len()
    );
    if let Some(route) = &tracker.route {
        println!("Route: {} stops, {} points", route.stop_ids.len(), route.points.len());
    }
    if let Some(trips) = &tracker.stop_trips {
        println!("Stop trips: {}", trips.len());
    }

    if !tracker.vehicles.is_empty() {
        println!();
        let mut table = Table::new();
        table.set_header(vec!["Id", "Route", "Trip", "Lat", "Lng", "Heading", "Seen"]);
        for tracked in tracker.vehicles_sorted() {
            let v = &tracked.entity;
            table.add_row(vec![
                Cell::new(&v.id),
                Cell::new(&v.route_id),
                Cell::new(&v.trip_id),
                Cell::new(format!("{:.5}", v.lat)),
                Cell::new(format!("{:.5}", v.lng)),
                Cell::new(
                    v.move_angle
                        .map(|a| format!("{:.1}°", a.to_degrees()))
                        .unwrap_or("-".into()),
                ),
                Cell::new(tracked.last_seen),
            ]);
        }
        println!("{table}");
    }

    if !tracker.stops.is_empty() {
        println!();
        let mut table = Table::new();
        table.set_header(vec!["Id", "Name", "Lat", "Lng"]);
        for tracked in tracker.stops_sorted() {
            let s = &tracked.entity;
            table.add_row(vec![
                Cell::new(&s.id),
                Cell::new(&s.name),
                Cell::new(format!("{:.5}", s.lat)),
                Cell::new(format!("{:.5}", s.lng)),
            ]);
        }
        println!("{table}");
    }
}
