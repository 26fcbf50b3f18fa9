//! Serial protocol engine for the bill acceptor and bill dispenser.
//!
//! Both peripherals speak the same 5-byte framed protocol over RS-232
//! (`0x24 CMD1 CMD2 DATA CHK`). This crate runs one session per device:
//!
//! - [`Transport`] owns the serial port (or any async byte stream) and frames
//!   packets with [`cashpoint_protocol::PacketCodec`].
//! - [`ProtocolEngine`] runs the reader task, matches replies to requests by
//!   signature through the [`correlator::Correlator`], retries on silence, and
//!   acknowledges unsolicited events before handing them to an [`EventHandler`].
//! - [`BillAcceptor`] and [`BillDispenser`] are the device façades: named
//!   commands, the acceptor's bill workflow, and the diagnostic logs.
//!
//! # Accepting bills
//!
//! ```no_run
//! use cashpoint_device::{AcceptorSettings, BillAcceptor, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut acceptor = BillAcceptor::new(AcceptorSettings::new("/dev/ttyUSB0"));
//!     acceptor.set_bill_counting_callback(|amount| println!("accepted {amount} KRW"));
//!     acceptor.connect().await?;
//!
//!     if !acceptor.enable_acceptance().await.is_ok() {
//!         eprintln!("acceptor did not arm");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Dispensing
//!
//! ```no_run
//! use cashpoint_core::Dialect;
//! use cashpoint_device::{BillDispenser, DispenserSettings, Outcome, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = DispenserSettings::new("/dev/ttyUSB1").dialect(Dialect::New);
//!     let mut dispenser = BillDispenser::new(settings);
//!     dispenser.connect().await?;
//!
//!     match dispenser.dispense_bills(3).await? {
//!         Outcome::Ok(()) => println!("paid out"),
//!         other => eprintln!("dispense failed: {other:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Outcomes and errors
//!
//! Device commands return an [`Outcome`]: the device answered as expected,
//! said no, stayed silent, or the session is gone. [`DeviceError`] is kept
//! for failures of the session itself, such as a port that cannot be opened.
//!
//! # Simulators
//!
//! The [`mock`] module runs simulated devices over an in-memory pipe, so the
//! whole stack can be exercised without hardware.

pub mod acceptor;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod dispenser;
pub mod engine;
pub mod error;
pub mod log;
pub mod mock;
pub mod outcome;
pub mod transport;

// Re-export commonly used types for convenience
pub use acceptor::{AcceptanceError, AcceptorClient, AcceptorSnapshot, BillAcceptor};
pub use config::{AcceptorSettings, DispenserSettings, EngineConfig, SerialSettings};
pub use dispatcher::EventRecord;
pub use dispenser::{BillDispenser, DispenserClient, DispenserSnapshot};
pub use engine::{EngineOptions, EventHandler, PacketObserver, ProtocolEngine, Reply};
pub use error::{DeviceError, Result};
pub use log::{CommandLogEntry, ConnectionLogEntry, DiagnosticLog};
pub use outcome::Outcome;
pub use transport::Transport;
