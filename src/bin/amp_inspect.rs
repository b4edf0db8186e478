// src/bin/amp_inspect.rs
//! Command-line inspector for amplifier configuration and acquisition
//!
//! Runs against the in-process simulated server with one unit of each family.

use amp_core::device::ChannelConfig;
use amp_core::discovery::{self, DeviceRegistry};
use amp_core::hal::simulator::SimulatedBackend;
use amp_core::{AmpConfig, ConfigLoader, DeviceSelector, FieldValue, Session};
use clap::{Parser, Subcommand};
use ndarray::{ArrayView2, Axis};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "amp-inspect")]
#[command(about = "Inspect and exercise amplifier configuration and streaming")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to the search list)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices visible to the server
    Discover,

    /// Print the configuration of the selected device
    Show {
        /// Selector: empty, U/H/N, a serial or a comma-separated serial list
        #[arg(short, long, default_value = "")]
        device: String,

        /// Dump as JSON instead of field listing
        #[arg(long)]
        json: bool,
    },

    /// Set fields (`Name=value`, `chN.Name=value`), push and print the result
    Set {
        #[arg(short, long, default_value = "")]
        device: String,

        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Resolve channel references to sample-vector positions
    Index {
        #[arg(short, long, default_value = "")]
        device: String,

        /// References such as `4`, `Counter`, `4UB-2008.07.01`
        references: Vec<String>,
    },

    /// Enable channels and acquire blocks
    Acquire {
        #[arg(short, long, default_value = "")]
        device: String,

        /// 1-based channel numbers to acquire
        #[arg(short, long, value_delimiter = ',', default_value = "1,2")]
        channels: Vec<u16>,

        /// Scans per block (defaults to the sampling rate)
        #[arg(short, long)]
        scans: Option<usize>,

        /// Blocks to acquire
        #[arg(short, long, default_value_t = 3)]
        blocks: usize,
    },

    /// Measure electrode impedances in kOhm
    Impedance {
        #[arg(short, long, default_value = "")]
        device: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::new().load()?,
    };
    amp_core::logging::init(&config.logging);

    let backend = Arc::new(SimulatedBackend::demo());
    let registry = DeviceRegistry::global();

    match cli.command {
        Commands::Discover => {
            for d in discovery::discover(backend.as_ref(), &config.server.address())? {
                let family = d.family.map_or_else(|| "unsupported".to_string(), |f| f.to_string());
                println!("{:<16} {:<10} {}", d.serial, family, if d.in_use { "in use" } else { "free" });
            }
        }
        Commands::Show { device, json } => {
            let session = open(&backend, &registry, &device, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(session.configs())?);
            } else {
                print_session(&session)?;
            }
        }
        Commands::Set { device, assignments } => {
            let mut session = open(&backend, &registry, &device, &config)?;
            for assignment in &assignments {
                apply(&mut session, assignment)?;
            }
            session.push()?;
            session.fetch()?;
            print_session(&session)?;
        }
        Commands::Index { device, references } => {
            let session = open(&backend, &registry, &device, &config)?;
            let references = if references.is_empty() { vec![String::new()] } else { references };
            for reference in references {
                println!("{:<24} {}", format!("'{}'", reference), session.index_after(&reference)?);
            }
        }
        Commands::Acquire { device, channels, scans, blocks } => {
            let mut session = open(&backend, &registry, &device, &config)?;
            for config in session.configs_mut() {
                for ch in config.channels_mut() {
                    ch.acquire = channels.contains(&ch.number);
                }
            }
            session.number_of_scans_calc()?;
            session.push()?;

            let scans = scans
                .or_else(|| session.configs().first().map(|c| c.sampling_rate() as usize))
                .unwrap_or(256);
            info!(scans, blocks, "acquiring");

            let mut seen = 0;
            let mut consumer = |block: ArrayView2<'_, f32>| {
                seen += 1;
                let means = block.mean_axis(Axis(0)).map(|m| m.to_vec()).unwrap_or_default();
                println!("block {:>3}: {:?} means {:?}", seen, block.dim(), means);
                seen < blocks
            };
            let (_, stats) = session.get_data_with_stats(scans, Some(&mut consumer))?;
            println!("{} blocks, max {} consecutive empty reads", stats.blocks_delivered, stats.max_empty_reads);
        }
        Commands::Impedance { device } => {
            let session = open(&backend, &registry, &device, &config)?;
            for (serial, ohms) in session.serials().iter().zip(session.impedance(None)?) {
                let kohm: Vec<String> = ohms
                    .iter()
                    .map(|z| if z.is_finite() { format!("{:.1}", z / 1000.0) } else { "-".to_string() })
                    .collect();
                println!("{:<16} {}", serial, kohm.join(" "));
            }
        }
    }

    registry.close_all();
    Ok(())
}

fn open(
    backend: &Arc<SimulatedBackend>,
    registry: &Arc<DeviceRegistry>,
    selector: &str,
    config: &AmpConfig,
) -> amp_core::Result<Session> {
    let selector: DeviceSelector = selector.parse()?;
    Session::connect(backend.clone(), registry.clone(), &selector, &[], config)
}

fn print_session(session: &Session) -> amp_core::Result<()> {
    for (config, info) in session.configs().iter().zip(session.device_information()?) {
        println!("{}", info);
        println!("  {}", config);
        for name in config.field_names().iter().map(|n| n.to_string()).chain(config.nested_field_names()) {
            println!("  {:<36} {}", name, config.get(&name)?);
        }
        let family = config.family();
        for ch in config.channels().iter().filter(|c| c.acquire) {
            let fields: amp_core::Result<Vec<String>> = ChannelConfig::field_names(family)
                .iter()
                .skip(1)
                .map(|n| ch.get(family, n).map(|v| format!("{}={}", n, v)))
                .collect();
            println!("  ch{:<3} {}", ch.number, fields?.join(" "));
        }
    }
    println!("channels: {}, electrodes: {}", session.channel_count()?, session.electrode_count());
    Ok(())
}

fn apply(session: &mut Session, assignment: &str) -> amp_core::Result<()> {
    let (target, literal) = assignment
        .split_once('=')
        .ok_or_else(|| amp_core::AmpError::invalid_request(format!("expected Name=value, got '{}'", assignment)))?;
    let value = parse_value(literal);

    if let Some((channel, field)) = target.strip_prefix("ch").and_then(|rest| rest.split_once('.')) {
        let number: u16 = channel
            .parse()
            .map_err(|_| amp_core::AmpError::invalid_request(format!("bad channel '{}'", channel)))?;
        for config in session.configs_mut() {
            let family = config.family();
            if let Some(ch) = config.channel_mut(number) {
                ch.set(family, field, value.clone())?;
            }
        }
        return Ok(());
    }
    session.set(target, value)
}

fn parse_value(literal: &str) -> FieldValue {
    let literal = literal.trim();
    if let Ok(b) = literal.parse::<bool>() {
        return FieldValue::Bool(b);
    }
    if let Ok(i) = literal.parse::<i64>() {
        return FieldValue::Int(i);
    }
    if let Ok(f) = literal.parse::<f64>() {
        return FieldValue::Float(f);
    }
    if let Some(inner) = literal.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let flags: Option<Vec<bool>> = inner
            .split(',')
            .map(|f| match f.trim() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            })
            .collect();
        if let Some(flags) = flags {
            return FieldValue::Flags(flags);
        }
    }
    FieldValue::Text(literal.to_string())
}
