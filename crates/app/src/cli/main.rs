//! TinyHAL configuration CLI
//!
//! Validates and inspects audio configuration documents against an
//! in-memory mixer, so documents can be checked on a build machine without
//! the target sound card.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tinyhal_core::domain::{CmOptions, ConfigMgr, Model};
use tinyhal_infra::{MemOpener, MixerSpec};

#[derive(Parser)]
#[command(name = "tinyhal")]
#[command(about = "Inspect and validate TinyHAL audio configurations", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the proc filesystem root used for card-by-name lookup
    #[arg(long)]
    proc_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a document and report what it defines
    Check {
        /// Path to the root XML document
        config: PathBuf,
    },
    /// Parse a document and print a JSON summary of the model
    Dump {
        /// Path to the root XML document
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct Summary {
    devices: Vec<DeviceSummary>,
    streams: Vec<StreamSummary>,
}

#[derive(Serialize)]
struct DeviceSummary {
    name: String,
    type_bits: u32,
    paths: Vec<PathSummary>,
}

#[derive(Serialize)]
struct PathSummary {
    name: String,
    controls: usize,
}

#[derive(Serialize)]
struct StreamSummary {
    name: Option<String>,
    #[serde(rename = "type")]
    stream_type: String,
    card: u32,
    device: u32,
    rate: u32,
    period_size: u32,
    period_count: u32,
    instances: u32,
    usecases: Vec<String>,
    has_volume: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Command::Check { config } => {
            let mgr = load(&config, cli.proc_root)?;
            let (devices, streams, paths) = mgr
                .inspect(|model| {
                    let paths: usize = model.devices.iter().map(|d| d.paths.len()).sum();
                    (model.devices.len(), model.streams.len(), paths)
                })
                .context("inspecting model")?;
            println!(
                "{}: OK ({} devices, {} paths, {} streams)",
                config.display(),
                devices,
                paths,
                streams
            );
            println!(
                "  output devices: {:#010x}",
                mgr.supported_output_devices().bits()
            );
            println!(
                "  input devices:  {:#010x}",
                mgr.supported_input_devices().bits()
            );
        }
        Command::Dump { config } => {
            let mgr = load(&config, cli.proc_root)?;
            let summary = mgr.inspect(summarize).context("inspecting model")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Load a document against a mixer that accepts any card and defines no
/// controls; every control write stays deferred, which is exactly what a
/// hardware-free validation run wants.
fn load(config: &PathBuf, proc_root: Option<PathBuf>) -> anyhow::Result<ConfigMgr> {
    let mut options = CmOptions::with_config(config.clone());
    if let Some(proc_root) = proc_root {
        options.proc_root = proc_root;
    }
    let opener = MemOpener::new().with_fallback(MixerSpec::new());
    ConfigMgr::load(&options, &opener)
        .with_context(|| format!("loading {}", config.display()))
}

fn summarize(model: &Model) -> Summary {
    Summary {
        devices: model
            .devices
            .iter()
            .map(|device| DeviceSummary {
                name: device.name.clone(),
                type_bits: device.kind.bits(),
                paths: device
                    .paths
                    .iter()
                    .map(|path| PathSummary {
                        name: model.pool.name(path.id).unwrap_or("?").to_string(),
                        controls: path.ctls.len(),
                    })
                    .collect(),
            })
            .collect(),
        streams: model
            .streams
            .iter()
            .map(|stream| StreamSummary {
                name: stream.name.clone(),
                stream_type: stream.info.stream_type.as_str().to_string(),
                card: stream.info.card,
                device: stream.info.device,
                rate: stream.info.rate,
                period_size: stream.info.period_size,
                period_count: stream.info.period_count,
                instances: stream.max_refs,
                usecases: stream.usecases.iter().map(|u| u.name.clone()).collect(),
                has_volume: stream.left_vol.is_some() || stream.right_vol.is_some(),
            })
            .collect(),
    }
}
