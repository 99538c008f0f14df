//! flowscan: replay traffic through the flow engine and classify every flow.

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flowscan::config::Config;
use flowscan::processor::{ChannelSink, LogSink, ScanEvent, ScanSink};
use flowscan::source::PcapReplay;
use flowscan::{load_classifier, start_system, stop_system};

#[derive(Parser, Debug)]
#[command(name = "flowscan")]
#[command(version)]
#[command(about = "Reconstruct network flows, extract features and score them with an ONNX model")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a pcap file through the engine.
    Run {
        /// Capture file to replay.
        #[arg(short, long)]
        pcap: PathBuf,

        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local interface address (required here or in the config).
        #[arg(short, long)]
        local_address: Option<Ipv4Addr>,

        /// ONNX model (overrides config).
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Alert threshold (overrides config).
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Print scan events as JSON lines on stdout.
        #[arg(long)]
        json: bool,

        /// Enable debug logging.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the feature columns a configuration resolves to.
    Columns {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a default configuration file.
    DefaultConfig,
}

fn init_logging(level: &str, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { pcap, config, local_address, model, threshold, json, verbose } => {
            let mut cfg = match &config {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };
            if let Some(addr) = local_address { cfg.engine.local_address = addr; }
            if let Some(path) = model { cfg.model.path = Some(path); }
            if let Some(t) = threshold { cfg.scan.attack_threshold = t; }

            init_logging(&cfg.logging.level, verbose)?;
            run_replay(&cfg, pcap, json)
        }

        Commands::Columns { config } => {
            let cfg = match &config {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };
            let layout = cfg.feature_layout()?;
            for (i, col) in layout.columns().iter().enumerate() {
                println!("{:>3}  {:<32} {:?} {:?}", i, col.name, col.statistic, col.direction);
            }
            Ok(())
        }

        Commands::DefaultConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn run_replay(cfg: &Config, pcap: PathBuf, json: bool) -> Result<()> {
    cfg.validate()?;
    let layout = cfg.feature_layout()?;
    let predictor = load_classifier(cfg, &layout)?;
    let replay = PcapReplay::open(&pcap)?;

    let (sink, printer): (Box<dyn ScanSink>, _) = if json {
        // Thread to print scan events
        let (event_tx, event_rx) = unbounded::<ScanEvent>();
        let printer = std::thread::spawn(move || {
            let stdout = std::io::stdout();
            while let Ok(event) = event_rx.recv() {
                let mut out = stdout.lock();
                match serde_json::to_string(&event) {
                    Ok(line) => { let _ = writeln!(out, "{line}"); }
                    Err(e) => error!("Failed to encode scan event: {e}"),
                }
            }
        });
        (Box::new(ChannelSink::new(event_tx)), Some(printer))
    } else {
        (Box::new(LogSink), None)
    };

    let processor = start_system(cfg, layout, replay.link_layer(), predictor, sink)?;
    let frames = processor.get_sender().context("Processor has no frame channel")?;

    let replayed = replay.for_each_frame(|frame| {
        let _ = frames.send(frame);
    })?;
    drop(frames);
    info!(frames = replayed, pcap = %pcap.display(), "replay finished");

    stop_system(processor)?;
    if let Some(h) = printer { let _ = h.join(); }
    Ok(())
}
