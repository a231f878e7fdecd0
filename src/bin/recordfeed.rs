//! recordfeed CLI - normalize raw records into the length-encoded analysis stream
//!
//! Progress goes to stderr; the record stream goes to stdout unless `--output` is given.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use recordfeed::{
    CountingStatusReporter, DataCounts, IngestionSession, JobConfig, NdjsonPersister, NoopPersister,
    RecordPersister, Reporters, SessionOptions, UsageTotals,
};

#[derive(Parser)]
#[command(name = "recordfeed")]
#[command(version, about = "Normalize raw records into a length-encoded analysis stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read records, transform them and write the record stream
    Write {
        /// Path to the job configuration (YAML)
        #[arg(short, long, default_value = "job.yaml")]
        config: PathBuf,

        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file for the record stream (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also persist accepted records as NDJSON
        #[arg(short, long)]
        persist: Option<PathBuf>,

        /// Latest record time (ms) accepted by an earlier run
        #[arg(short, long)]
        latest_record_time_ms: Option<i64>,

        /// Send a flush after the input is written
        #[arg(short, long)]
        flush: bool,
    },

    /// Validate a job configuration and print the output header
    Validate {
        /// Path to the job configuration (YAML)
        #[arg(short, long, default_value = "job.yaml")]
        config: PathBuf,
    },

    /// Write a single control message
    Control {
        /// Path to the job configuration (YAML)
        #[arg(short, long, default_value = "job.yaml")]
        config: PathBuf,

        /// Output file for the record stream (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(value_enum)]
        message: ControlMessage,

        /// Range start, for interim and reset
        #[arg(long)]
        start: Option<String>,

        /// Range end, for interim and reset
        #[arg(long)]
        end: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ControlMessage {
    Flush,
    Interim,
    Reset,
}

fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Write { config, input, output, persist, latest_record_time_ms, flush } => {
            write_records(config, input, output, persist, latest_record_time_ms, flush)
        }
        Commands::Validate { config } => validate_config(config),
        Commands::Control { config, output, message, start, end } => {
            write_control(config, output, message, start, end)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(path: &PathBuf) -> Result<JobConfig, String> {
    JobConfig::load_from_file(path).map_err(|e| format!("Failed to load {}: {}", path.display(), e))
}

fn open_output(output: Option<PathBuf>) -> Result<Box<dyn Write>, String> {
    match output {
        Some(path) => {
            let file = File::create(&path)
                .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Run one ingestion session over `input`
fn write_records(
    config: PathBuf,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    persist: Option<PathBuf>,
    latest_record_time_ms: Option<i64>,
    flush: bool,
) -> Result<(), String> {
    let job = load_config(&config)?;

    let reader: Box<dyn Read> = match &input {
        Some(path) => Box::new(
            File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?,
        ),
        None => Box::new(io::stdin()),
    };

    let mut status = CountingStatusReporter::resume(DataCounts {
        latest_record_time_ms,
        ..Default::default()
    });
    let mut usage = UsageTotals::default();
    let mut persister: Box<dyn RecordPersister> = match &persist {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
            Box::new(NdjsonPersister::new(BufWriter::new(file)))
        }
        None => Box::new(NoopPersister),
    };

    let reporters = Reporters {
        status: &mut status,
        usage: &mut usage,
        persister: persister.as_mut(),
    };
    let mut session = IngestionSession::new(job, SessionOptions::default(), open_output(output)?, reporters)
        .map_err(|e| e.to_string())?;

    let counts = session.write(reader).map_err(|e| e.to_string())?;
    if flush {
        let flush_id = session.flush().map_err(|e| e.to_string())?;
        eprintln!("  ✓ Sent flush {}", flush_id);
    }

    let summary = serde_json::to_string_pretty(&counts).map_err(|e| e.to_string())?;
    eprintln!("{}", summary);
    Ok(())
}

fn validate_config(config: PathBuf) -> Result<(), String> {
    eprintln!("🔍 Validating {}...", config.display());

    let job = load_config(&config)?;
    eprintln!("  ✓ {} detector(s), {} transform(s)", job.analysis_config.detectors.len(), job.transforms.len());

    let mut status = CountingStatusReporter::new();
    let mut usage = UsageTotals::default();
    let mut persister = NoopPersister;
    let reporters = Reporters {
        status: &mut status,
        usage: &mut usage,
        persister: &mut persister,
    };
    let session = IngestionSession::new(job, SessionOptions::default(), io::sink(), reporters)
        .map_err(|e| e.to_string())?;

    eprintln!("  ✓ Output header: {}", session.output_header().join(", "));
    eprintln!("  ✓ Expected input fields: {}", session.required_input_fields().join(", "));
    Ok(())
}

fn write_control(
    config: PathBuf,
    output: Option<PathBuf>,
    message: ControlMessage,
    start: Option<String>,
    end: Option<String>,
) -> Result<(), String> {
    let job = load_config(&config)?;

    let mut status = CountingStatusReporter::new();
    let mut usage = UsageTotals::default();
    let mut persister = NoopPersister;
    let reporters = Reporters {
        status: &mut status,
        usage: &mut usage,
        persister: &mut persister,
    };
    let mut session = IngestionSession::new(job, SessionOptions::default(), open_output(output)?, reporters)
        .map_err(|e| e.to_string())?;

    let sent = match message {
        ControlMessage::Flush => session.flush().map(|id| format!("flush {}", id)),
        ControlMessage::Interim => match (start.as_deref(), end.as_deref()) {
            (Some(start), Some(end)) => session.interim(Some((start, end))).map(|_| "interim".to_string()),
            (None, None) => session.interim(None).map(|_| "interim".to_string()),
            _ => return Err("Interim needs both --start and --end, or neither".to_string()),
        },
        ControlMessage::Reset => match (start.as_deref(), end.as_deref()) {
            (Some(start), Some(end)) => session.reset_buckets(start, end).map(|_| "reset".to_string()),
            _ => return Err("Reset needs --start and --end".to_string()),
        },
    }
    .map_err(|e| e.to_string())?;

    let mut output = session.into_output();
    output.flush().map_err(|e| e.to_string())?;

    eprintln!("  ✓ Sent {}", sent);
    Ok(())
}
