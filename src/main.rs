//! CLI entry point for the TEM device simulator.
//!
//! # Usage
//!
//! Start the simulator on the default port (8888):
//! ```bash
//! tem-sim serve
//! ```
//!
//! Override the port and make the noise reproducible:
//! ```bash
//! tem-sim serve --port 9000 --seed 42
//! ```
//!
//! Inspect captured records (one JSON record per line):
//! ```bash
//! tem-sim decode capture.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tem_sim::config::{SimConfig, DEFAULT_CONFIG_PATH};
use tem_sim::logging::{self, LoggingConfig, OutputFormat};
use tem_sim::record::{summarize, MeasurementRecord};
use tem_sim::server::SimulatorServer;
use tracing::info;

#[derive(Parser)]
#[command(name = "tem-sim")]
#[command(about = "Transient-electromagnetic instrument simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulated instrument
    Serve {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// TCP port
        #[arg(long)]
        port: Option<u16>,

        /// Fixed noise seed
        #[arg(long)]
        seed: Option<u64>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,

        /// Log format (pretty, compact, json)
        #[arg(long, default_value = "compact")]
        log_format: OutputFormat,
    },

    /// Summarize the waveforms of recorded START_COLLECT output
    Decode {
        /// File with one JSON record per line
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            seed,
            log_level,
            log_format,
        } => {
            let mut config = SimConfig::load_from(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if seed.is_some() {
                config.collect.noise_seed = seed;
            }
            if let Some(level) = log_level {
                config.application.log_level = level;
            }
            config.validate()?;
            serve(config, log_format).await
        }
        Commands::Decode { input } => decode(input).await,
    }
}

async fn serve(config: SimConfig, log_format: OutputFormat) -> Result<()> {
    let logging_config = LoggingConfig::from_sim_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(log_format);
    logging::init(logging_config).map_err(anyhow::Error::msg)?;

    info!("{} starting", config.application.name);
    let server = SimulatorServer::bind(&config)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address()))?;

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Simulator stopped");
    Ok(())
}

async fn decode(input: PathBuf) -> Result<()> {
    let text = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    for (line_no, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let record: MeasurementRecord = serde_json::from_str(line)
            .with_context(|| format!("line {} is not a measurement record", line_no + 1))?;
        println!(
            "ID {} point {} start {} RecvFs {} SendCurrent {} StackCount {}",
            record.id,
            record.point_id,
            record.start_time,
            record.recv_fs,
            record.send_current,
            record.stack_count
        );
        let summary = summarize(&record)
            .with_context(|| format!("decoding waveforms of record {}", record.id))?;
        for s in summary {
            println!(
                "  {:<14} {:>4} samples  min {:>9.3}  max {:>9.3}",
                s.field, s.samples, s.min, s.max
            );
        }
    }
    Ok(())
}
