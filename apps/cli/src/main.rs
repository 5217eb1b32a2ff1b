use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use meta_core::{
    ImeiRecord, ImeiRepair, SerialChannel, Session, SessionConfig, TracingObserver,
    UnverifiedStorage, list_ports, read_device_report, repair_imei,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "MediaTek meta-mode tool (Pure Rust)", long_about = None)]
struct Args {
    /// TOML session configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port the device enumerates on
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports present on this host
    Ports,
    /// Enter meta mode and report whether the device acknowledged it
    Connect,
    /// Read chipset, software version and identifiers
    Info,
    /// Rewrite the IMEI record
    Imei {
        /// IMEI for SIM slot 1 (15 digits)
        #[arg(long)]
        imei1: String,

        /// IMEI for SIM slot 2 (15 digits)
        #[arg(long)]
        imei2: Option<String>,

        /// NVRAM logical ID of the IMEI record
        #[arg(long)]
        lid: Option<u8>,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }

    match args.command {
        Command::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                warn!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        Command::Connect => {
            let session = connect(&config)?;
            info!(established = session.is_established(), "Meta mode entered");
            println!("Meta mode established");
        }
        Command::Info => {
            let mut session = connect(&config)?;
            let report = read_device_report(&mut session, &mut UnverifiedStorage)?;
            println!("{}", report);
        }
        Command::Imei { imei1, imei2, lid } => {
            // Validate before touching the device.
            let primary = ImeiRecord::parse(&imei1)?;
            let secondary = imei2.as_deref().map(ImeiRecord::parse).transpose()?;
            if let Some(lid) = lid {
                config.imei_lid = lid;
            }

            let mut session = connect(&config)?;
            let request = ImeiRepair::from_config(&config, primary, secondary);
            let report = repair_imei(&mut session, &request)?;
            if let Some(Err(e)) = report.secondary {
                bail!("IMEI 1 written, IMEI 2 failed: {}", e);
            }
            println!("IMEI written. Reboot the phone to apply.");
        }
    }

    Ok(())
}

fn connect(config: &SessionConfig) -> Result<Session<SerialChannel, TracingObserver>> {
    let Some(port) = config.port.as_deref() else {
        bail!("No serial port given (use --port or set `port` in the config file)");
    };

    info!(port, baud = config.baud_rate, "Waiting for device in preloader...");
    let channel = SerialChannel::open(port, config.baud_rate)?;
    let session = config.connect(channel, Arc::new(TracingObserver))?;
    Ok(session)
}
