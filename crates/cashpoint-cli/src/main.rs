mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cashpoint_core::{Denomination, Dialect};
use cashpoint_device::mock::{MockAcceptor, MockDispenser};
use cashpoint_device::{BillAcceptor, BillDispenser, Outcome};
use cashpoint_protocol::{AcceptorStatus, DispenserStatus};

use crate::config::Config;

/// Drive the bill acceptor or bill dispenser from the command line.
#[derive(Parser, Debug)]
#[command(name = "cashpoint", version)]
struct Cli {
    /// Serial port; overrides the config file.
    #[arg(long, global = true)]
    port: Option<String>,

    /// Config file with `[acceptor]` and `[dispenser]` sections.
    #[arg(long, global = true, default_value = "cashpoint.toml")]
    config: PathBuf,

    /// Talk to the built-in simulator instead of a serial port.
    #[arg(long, global = true)]
    simulate: bool,

    /// Dispenser command dialect with DIP SW3 off.
    #[arg(long, global = true, conflicts_with = "new_dialect")]
    old_dialect: bool,

    /// Dispenser command dialect with DIP SW3 on.
    #[arg(long, global = true)]
    new_dialect: bool,

    /// Log filter, e.g. `debug` or `cashpoint_device=trace`. Defaults to `RUST_LOG`, then `info`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    device: Device,
}

#[derive(Subcommand, Debug)]
enum Device {
    /// Bill acceptor commands.
    #[command(subcommand)]
    Acceptor(AcceptorCmd),
    /// Bill dispenser commands.
    #[command(subcommand)]
    Dispenser(DispenserCmd),
}

#[derive(Subcommand, Debug)]
enum AcceptorCmd {
    /// Show the device state.
    Status,
    /// Arm bill intake.
    Enable,
    /// Disarm bill intake.
    Disable,
    /// Show the bill currently in the acceptor.
    Bill,
    /// Stack the bill in escrow.
    Stack,
    /// Return the bill in escrow.
    Return,
    /// Reset the device and wait for it to settle.
    Reset,
    /// Show the config byte, optionally switching Event TX.
    Config {
        #[arg(long)]
        event_tx: Option<bool>,
    },
    /// Accept bills and print each one until Ctrl-C.
    Watch,
}

#[derive(Subcommand, Debug)]
enum DispenserCmd {
    /// Show the device status.
    Status,
    /// Dispense bills (1-250).
    Dispense { count: u32 },
    /// Show the lifetime dispensed counter.
    Total,
    /// Clear the lifetime dispensed counter.
    ClearTotal,
    /// Reset the device.
    Reset,
    /// Show the last error code.
    Error,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut config = Config::load(&cli.config)?;
    if let Some(port) = &cli.port {
        config.acceptor.serial.path = port.clone();
        config.dispenser.serial.path = port.clone();
    }
    if cli.old_dialect {
        config.dispenser.dialect = Dialect::Old;
    } else if cli.new_dialect {
        config.dispenser.dialect = Dialect::New;
    }
    if cli.simulate {
        config.acceptor.init_delay = Duration::ZERO;
        config.dispenser.init_delay = Duration::ZERO;
    }

    match cli.device {
        Device::Acceptor(cmd) => run_acceptor(config, cli.simulate, cmd).await,
        Device::Dispenser(cmd) => run_dispenser(config, cli.simulate, cmd).await,
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_acceptor(config: Config, simulate: bool, cmd: AcceptorCmd) -> Result<()> {
    let mut acceptor = BillAcceptor::new(config.acceptor);
    let simulator = if simulate {
        let (transport, handle) = MockAcceptor::start();
        acceptor.connect_with(transport).await?;
        Some(handle)
    } else {
        acceptor.connect().await?;
        None
    };

    match cmd {
        AcceptorCmd::Status => {
            let code = expect("status", acceptor.get_status().await)?;
            println!("{}", AcceptorStatus::status_string(code));
            if code == AcceptorStatus::ErrorWait.code() {
                let error = expect("error code", acceptor.get_error_code().await)?;
                println!("error {}: {}", error, AcceptorStatus::error_string(error));
            }
        }
        AcceptorCmd::Enable => expect("enable", acceptor.enable_acceptance().await)?,
        AcceptorCmd::Disable => expect("disable", acceptor.disable_acceptance().await)?,
        AcceptorCmd::Bill => {
            let code = expect("bill data", acceptor.get_bill_data().await)?;
            match Denomination::from_bill_code(code) {
                Ok(denomination) => println!("{denomination}"),
                Err(e) => println!("{e}"),
            }
        }
        AcceptorCmd::Stack => expect("stack", acceptor.stack_bill().await)?,
        AcceptorCmd::Return => expect("return", acceptor.return_bill().await)?,
        AcceptorCmd::Reset => expect("reset", acceptor.initialize_device().await)?,
        AcceptorCmd::Config { event_tx } => {
            let mut current = expect("get config", acceptor.get_config().await)?;
            if let Some(on) = event_tx {
                current = current.with_event_tx(on);
                expect("set config", acceptor.set_config(current).await)?;
            }
            println!("{current}");
        }
        AcceptorCmd::Watch => {
            acceptor.set_bill_counting_callback(|amount| println!("bill stacked: {amount} KRW"));
            acceptor.set_event_callback(|code| {
                println!("event: {}", AcceptorStatus::status_string(code));
            });
            expect("enable", acceptor.enable_acceptance().await)?;

            if let Some(handle) = simulator.clone() {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    handle.insert_bill(Denomination::Won10000).await;
                });
            }

            info!("Waiting for bills, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            if !acceptor.disable_acceptance().await.is_ok() {
                warn!("Failed to disable intake on exit");
            }
        }
    }

    acceptor.disconnect().await;
    Ok(())
}

async fn run_dispenser(config: Config, simulate: bool, cmd: DispenserCmd) -> Result<()> {
    let dialect = config.dispenser.dialect;
    let mut dispenser = BillDispenser::new(config.dispenser);
    if simulate {
        let (transport, _handle) = MockDispenser::start(dialect);
        dispenser.connect_with(transport).await?;
    } else {
        dispenser.connect().await?;
    }

    match cmd {
        DispenserCmd::Status => {
            let status = expect("status", dispenser.get_status().await)?;
            println!("{status}");
        }
        DispenserCmd::Dispense { count } => {
            expect("dispense", dispenser.dispense_bills(count).await?)?;
            println!("dispensed {count}");
        }
        DispenserCmd::Total => {
            let total = expect("total count", dispenser.get_total_dispensed_count().await)?;
            println!("{total}");
        }
        DispenserCmd::ClearTotal => {
            expect("clear total", dispenser.clear_total_dispensed_count().await)?;
        }
        DispenserCmd::Reset => expect("reset", dispenser.reset().await)?,
        DispenserCmd::Error => {
            let code = expect("error code", dispenser.get_error_code().await)?;
            println!("0x{code:02x}: {}", DispenserStatus::error_description(code));
        }
    }

    dispenser.disconnect().await;
    Ok(())
}

fn expect<T>(what: &str, outcome: Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Ok(value) => Ok(value),
        Outcome::Timeout => bail!("{what}: no response"),
        Outcome::DeviceError(code) => bail!("{what}: device rejected the command (0x{code:02x})"),
        Outcome::TransportClosed => bail!("{what}: connection closed"),
    }
}
