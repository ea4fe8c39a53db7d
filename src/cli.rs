use crate::config::GatewayConfig;
use crate::runtime_config::RuntimeConfig;
use crate::server::{GatewayServer, SHUTDOWN_DEADLINE};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry API gateway", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway
    Serve {
        /// Path to the YAML configuration; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override HttpServer.address:port from the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Load and validate a configuration file, then exit
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::from_file(path),
        None => Ok(GatewayConfig::default()),
    }
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Serve { config, addr } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(addr) = addr {
                let (address, port) = addr
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--addr must be host:port"))?;
                config.http_server.address = address.to_string();
                config.http_server.port = port.parse()?;
            }

            RuntimeConfig::from_env().apply();

            let mut gateway = GatewayServer::new(config);
            gateway.init()?;
            gateway.start()?;

            // Block until SIGINT, then drain within the deadline.
            let (interrupt_tx, interrupt_rx) = mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = interrupt_tx.send(());
            })?;
            let _ = interrupt_rx.recv();
            info!("Interrupt received, shutting down");
            gateway.shutdown(SHUTDOWN_DEADLINE);
            Ok(())
        }
        Commands::Check { config } => {
            let config = GatewayConfig::from_file(config)?;
            println!(
                "ok: listen={} version-header={} registry-proto={} active={:?}",
                config.http_server.bind_address(),
                config.http_server.version_header,
                config.endpoint_registry.registry_proto,
                config.endpoint_registry.registry_active,
            );
            Ok(())
        }
    }
}
