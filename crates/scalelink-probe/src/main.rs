//! scale-probe: commissioning tool for serial scales

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use scalelink_core::probe::probe_port;
use scalelink_core::simulator::SimulatedConnector;
use scalelink_core::trace::ChunkDump;
use scalelink_core::transport::{list_ports, SerialTransport, Transport};
use scalelink_core::{ScaleConfig, ScaleEngine, StableWeight, TransportError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "scale-probe", version)]
#[command(about = "Inspect and test serial weighing scales")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file and SCALE_PORT
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overriding the config file and SCALE_BAUD_RATE
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports {
        #[arg(long)]
        json: bool,
    },
    /// Dump every received chunk as hex and text
    Trace {
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Check whether a scale answers on the port
    Test {
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
        #[arg(long)]
        json: bool,
    },
    /// Print stable weights until interrupted
    Watch {
        /// Use the built-in simulated scale instead of a device
        #[arg(long)]
        simulate: bool,
        /// Send the configured tare command after connecting
        #[arg(long)]
        tare: bool,
        #[arg(long)]
        json: bool,
    },
}

fn init_logger(verbose: bool) {
    let default = if verbose {
        "scalelink_core=debug,scale_probe=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

/// Config file (or defaults), then environment, then command line
fn load_config(cli: &Cli) -> Result<ScaleConfig> {
    let mut config = match &cli.config {
        Some(path) => ScaleConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ScaleConfig::default(),
    };
    config.apply_env().context("reading environment overrides")?;
    config
        .apply_overrides(cli.port.clone(), cli.baud.map(|b| b.to_string()))
        .context("applying command line overrides")?;
    config.validate().context("invalid configuration")?;
    tracing::debug!(
        port = %config.serial.port,
        baud = config.serial.baud_rate,
        layout = ?config.format.layout,
        "configuration loaded"
    );
    Ok(config)
}

fn run_ports(json: bool) -> Result<()> {
    let ports = list_ports();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let description = match (&port.manufacturer, &port.product) {
            (Some(m), Some(p)) => format!("{m} {p}"),
            (Some(m), None) => m.clone(),
            (None, Some(p)) => p.clone(),
            (None, None) => String::new(),
        };
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => {
                println!("{:<16} {vid:04x}:{pid:04x} {description}", port.name)
            }
            _ => println!("{:<16} {description}", port.name),
        }
    }
    Ok(())
}

fn run_trace(config: &ScaleConfig, seconds: u64) -> Result<()> {
    let mut transport = SerialTransport::open(&config.serial)
        .with_context(|| format!("opening {}", config.serial.port))?;
    println!(
        "Reading raw data from {} @ {} baud for {seconds}s...\n",
        config.serial.port, config.serial.baud_rate
    );

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut chunks = 0usize;
    while let Some(remaining) = deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
    {
        match transport.read(remaining.min(config.serial.read_timeout())) {
            Ok(chunk) => {
                chunks += 1;
                println!("{}\n---", ChunkDump::new(&chunk));
            }
            Err(TransportError::Timeout) => {}
            Err(e) => {
                transport.close();
                return Err(e).context("reading from port");
            }
        }
    }
    transport.close();
    println!("\nDone, {chunks} chunk(s) received");
    Ok(())
}

fn run_test(config: &ScaleConfig, timeout: u64, json: bool) -> Result<()> {
    let result = probe_port(config, Duration::from_secs(timeout));
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.message());
        if let Some(raw) = &result.raw {
            println!("Raw frame: {raw:?}");
        }
    }
    if !result.success {
        bail!("no scale detected on {}", result.port);
    }
    Ok(())
}

fn format_weight(weight: &StableWeight) -> String {
    let time = weight.reading.timestamp.with_timezone(&Local);
    let marker = if weight.heartbeat { " (heartbeat)" } else { "" };
    format!(
        "{} #{:<5} {}{marker}",
        time.format("%H:%M:%S%.3f"),
        weight.sequence,
        weight.reading
    )
}

async fn run_watch(config: ScaleConfig, simulate: bool, tare: bool, json: bool) -> Result<()> {
    let engine = ScaleEngine::new();
    let mut weights = engine.subscribe();
    let mut health = engine.health_receiver();

    let started = if simulate {
        let connector = SimulatedConnector::new(&config);
        engine.start_with(config, Box::new(connector))
    } else {
        engine.start(config)
    };
    started.context("starting scale engine")?;

    if tare {
        engine.tare().context("sending tare command")?;
    }

    let health_task = tokio::spawn(async move {
        let mut last_state = None;
        while health.changed().await.is_ok() {
            let snapshot = health.borrow_and_update().clone();
            if last_state == Some(snapshot.state) {
                continue;
            }
            last_state = Some(snapshot.state);
            match &snapshot.last_error {
                Some(error) => eprintln!("link {} ({error})", snapshot.state),
                None => eprintln!("link {}", snapshot.state),
            }
        }
    });

    loop {
        tokio::select! {
            next = weights.next() => {
                let Some(weight) = next else { break };
                if json {
                    println!("{}", serde_json::to_string(&weight)?);
                } else {
                    println!("{}", format_weight(&weight));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping...");
                break;
            }
        }
    }

    engine.stop();
    health_task.abort();
    tracing::debug!("watch finished");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match &cli.command {
        Command::Ports { json } => run_ports(*json),
        Command::Trace { seconds } => run_trace(&load_config(&cli)?, *seconds),
        Command::Test { timeout, json } => {
            let config = load_config(&cli)?;
            let timeout = *timeout;
            let json = *json;
            tokio::task::spawn_blocking(move || run_test(&config, timeout, json)).await?
        }
        Command::Watch {
            simulate,
            tare,
            json,
        } => run_watch(load_config(&cli)?, *simulate, *tare, *json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_watch_with_overrides() {
        let cli = Cli::try_parse_from([
            "scale-probe",
            "watch",
            "--simulate",
            "--port",
            "/dev/ttyUSB1",
            "-b",
            "4800",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(cli.baud, Some(4800));
        assert!(matches!(
            cli.command,
            Command::Watch {
                simulate: true,
                tare: false,
                json: false
            }
        ));
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["scale-probe", "trace"]).unwrap();
        assert!(matches!(cli.command, Command::Trace { seconds: 5 }));
        let cli = Cli::try_parse_from(["scale-probe", "test", "-t", "2"]).unwrap();
        assert!(matches!(cli.command, Command::Test { timeout: 2, json: false }));
    }

    #[test]
    fn test_missing_subcommand_rejected() {
        assert!(Cli::try_parse_from(["scale-probe"]).is_err());
    }

    #[test]
    fn test_command_line_overrides_config() {
        let cli = Cli::try_parse_from(["scale-probe", "-p", "COM4", "-b", "19200", "test"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.serial.port, "COM4");
        assert_eq!(config.serial.baud_rate, 19200);
    }
}
