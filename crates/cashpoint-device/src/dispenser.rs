//! Bill dispenser façade.
//!
//! The dispenser has no push events; its state is polled with status
//! queries. Every status packet the reader sees, answered or not, updates
//! the snapshot.
//!
//! Command letters follow the configured [`Dialect`]. The dialect is fixed
//! for the lifetime of a session; a change made while connected is kept in
//! the settings and applied by the next connect.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};

use cashpoint_core::{Dialect, DispenseCount};
use cashpoint_protocol::{DISPENSER_PROFILE, DispenserCommand, DispenserStatus, Packet};

use crate::config::DispenserSettings;
use crate::engine::{EngineOptions, ProtocolEngine, Reply};
use crate::error::{DeviceError, Result};
use crate::log::{CommandLogEntry, ConnectionLogEntry, DiagnosticLog};
use crate::outcome::Outcome;
use crate::transport::Transport;

/// Point-in-time view of the dispenser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispenserSnapshot {
    pub connected: bool,
    pub status: Option<DispenserStatus>,
    /// Bills reported by the last completion status.
    pub dispensed: Option<u8>,
    /// Lifetime counter from the last total count query.
    pub total: Option<u32>,
    pub last_error: Option<u8>,
    pub dialect: Dialect,
}

/// Combine the two replies of the total count query.
///
/// The first reply carries the upper 16 bits in its last two bytes, the
/// follow-on carries the lower 16 bits.
///
/// ```
/// use cashpoint_device::dispenser::total_count;
/// use cashpoint_protocol::Packet;
///
/// let high = Packet::new(0x00, 0x00, 0x01);
/// let low = Packet::new(b'g', 0x00, 0x2C);
/// assert_eq!(total_count(&high, &low), 65_536 + 44);
/// ```
#[must_use]
pub fn total_count(high: &Packet, low: &Packet) -> u32 {
    u32::from_be_bytes([high.cmd2(), high.data(), low.cmd2(), low.data()])
}

#[derive(Debug, Default)]
struct State {
    status: Option<DispenserStatus>,
    dispensed: Option<u8>,
    total: Option<u32>,
    last_error: Option<u8>,
}

#[derive(Debug)]
struct Shared {
    dialect: Mutex<Dialect>,
    state: Mutex<State>,
}

impl Shared {
    fn dialect(&self) -> Dialect {
        *lock(&self.dialect)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Passive status tracking for every inbound packet.
    fn observe(&self, packet: &Packet) {
        let Some(status) = DispenserStatus::decode(packet) else {
            return;
        };

        let mut state = self.state();
        match status {
            DispenserStatus::Error(code) => state.last_error = Some(code),
            other => {
                if let Some(count) = other.dispensed() {
                    state.dispensed = Some(count);
                }
                state.status = Some(other);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running dispenser session.
#[derive(Clone)]
pub struct DispenserClient {
    engine: ProtocolEngine,
    shared: Arc<Shared>,
}

impl DispenserClient {
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.dialect()
    }

    pub async fn reset(&self) -> Outcome<()> {
        self.command(DispenserCommand::Reset).await
    }

    /// Inhibit dispensing.
    pub async fn disable(&self) -> Outcome<()> {
        self.command(DispenserCommand::Disable).await
    }

    /// Lift the dispensing inhibit.
    pub async fn enable(&self) -> Outcome<()> {
        self.command(DispenserCommand::Enable).await
    }

    /// Dispense `count` bills. Completes when the device confirms the count.
    pub async fn dispense(&self, count: DispenseCount) -> Outcome<()> {
        info!(count = count.as_u8(), "Dispensing bills");
        self.command(DispenserCommand::Dispense(count)).await
    }

    pub async fn clear_dispensed_count(&self) -> Outcome<()> {
        self.command(DispenserCommand::ClearDispensedCount).await
    }

    /// Lifetime dispensed counter, read from a two-packet reply.
    pub async fn get_total_count(&self) -> Outcome<u32> {
        let outcome = self.request(DispenserCommand::GetTotalCount).await;
        let Outcome::Ok(Reply {
            packet: high,
            follow_on: Some(low),
        }) = outcome
        else {
            return match outcome {
                Outcome::Ok(_) => Outcome::Timeout,
                other => other.map(|_| 0),
            };
        };

        let total = total_count(&high, &low);
        debug!(total, "Total dispensed count");
        self.shared.state().total = Some(total);
        Outcome::Ok(total)
    }

    pub async fn clear_total_count(&self) -> Outcome<()> {
        let outcome = self.command(DispenserCommand::ClearTotalCount).await;
        if outcome.is_ok() {
            self.shared.state().total = Some(0);
        }
        outcome
    }

    /// Poll the device status.
    ///
    /// A status reply that does not decode is logged and reported as a timeout.
    pub async fn get_status(&self) -> Outcome<DispenserStatus> {
        self.request(DispenserCommand::GetStatus)
            .await
            .and_then(|reply| match DispenserStatus::decode(&reply.packet) {
                Some(status) => Outcome::Ok(status),
                None => {
                    warn!(rx = %reply.packet, "Undecodable dispenser status");
                    Outcome::Timeout
                }
            })
    }

    /// Raw error code; see [`DispenserStatus::error_description`].
    pub async fn get_error_code(&self) -> Outcome<u8> {
        self.request(DispenserCommand::GetErrorCode)
            .await
            .map(|reply| reply.packet.data())
    }

    pub async fn check_connection(&self) -> bool {
        self.request(DispenserCommand::CheckConnection)
            .await
            .is_ok()
    }

    async fn request(&self, command: DispenserCommand) -> Outcome<Reply> {
        let spec = command.spec(self.shared.dialect());
        self.engine.request(&spec).await
    }

    async fn command(&self, command: DispenserCommand) -> Outcome<()> {
        self.request(command).await.discard()
    }
}

impl std::fmt::Debug for DispenserClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispenserClient")
            .field("engine", &self.engine)
            .field("dialect", &self.dialect())
            .finish()
    }
}

struct Session {
    client: DispenserClient,
    _cancel_on_drop: DropGuard,
}

/// Bill dispenser with at most one open session.
pub struct BillDispenser {
    settings: DispenserSettings,
    shared: Arc<Shared>,
    log: Arc<DiagnosticLog>,
    session: Option<Session>,
}

impl BillDispenser {
    pub fn new(settings: DispenserSettings) -> Self {
        let log = Arc::new(DiagnosticLog::new(settings.engine.log_capacity));
        let shared = Arc::new(Shared {
            dialect: Mutex::new(settings.dialect),
            state: Mutex::new(State::default()),
        });
        Self {
            settings,
            shared,
            log,
            session: None,
        }
    }

    pub fn settings(&self) -> &DispenserSettings {
        &self.settings
    }

    /// Open the configured serial port and bring the session up.
    ///
    /// # Errors
    /// `PortUnavailable` if the port cannot be opened, `CommunicationFailed`
    /// if the dispenser does not answer, `AlreadyConnected` for a live session.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(DeviceError::already_connected(self.settings.serial.path.clone()));
        }
        self.log
            .record_connection("CONNECT_START", self.settings.serial.path.clone());
        let transport = match Transport::open(&self.settings.serial) {
            Ok(transport) => transport,
            Err(e) => {
                self.log.record_connection("CONNECT_ERROR", e.to_string());
                return Err(e);
            }
        };
        self.connect_with(transport).await
    }

    /// Bring a session up on an already open transport.
    ///
    /// # Errors
    /// See [`BillDispenser::connect`].
    pub async fn connect_with(&mut self, transport: Transport) -> Result<()> {
        if self.is_connected() {
            return Err(DeviceError::already_connected(transport.name()));
        }
        self.session = None;
        *self.shared.state() = State::default();
        *lock(&self.shared.dialect) = self.settings.dialect;

        let observer = {
            let shared = Arc::clone(&self.shared);
            Arc::new(move |packet: &Packet| shared.observe(packet))
        };
        let options = EngineOptions::new(self.settings.engine.clone())
            .log(Arc::clone(&self.log))
            .observer(observer);
        let engine = ProtocolEngine::start(transport, DISPENSER_PROFILE, options);
        let cancel_on_drop = engine.cancellation_token().drop_guard();
        let client = DispenserClient {
            engine: engine.clone(),
            shared: Arc::clone(&self.shared),
        };

        tokio::time::sleep(self.settings.init_delay).await;

        if self.settings.connect_check && !client.check_connection().await {
            self.log
                .record_connection("COMM_TEST", "no answer to connection probe");
            engine.close().await;
            return Err(DeviceError::communication_failed(format!(
                "bill dispenser on {} did not answer",
                engine.name()
            )));
        }

        match client.get_status().await {
            Outcome::Ok(status) => {
                self.log.record_connection("STATUS_CHECK", status.to_string());
            }
            other => warn!("Initial status check failed: {:?}", other),
        }
        info!(
            port = %engine.name(),
            dialect = %client.dialect(),
            "Bill dispenser connected"
        );

        self.session = Some(Session {
            client,
            _cancel_on_drop: cancel_on_drop,
        });
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.client.engine.close().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.client.is_connected())
    }

    pub fn client(&self) -> Option<&DispenserClient> {
        self.session.as_ref().map(|session| &session.client)
    }

    /// Select the command dialect: `true` for the old dialect (DIP SW3 off).
    pub fn set_protocol_version(&mut self, is_old: bool) {
        self.set_dialect(Dialect::from_is_old(is_old));
    }

    /// Select the command dialect.
    ///
    /// Without a session the dialect applies to the next connect. A live
    /// session keeps its dialect; the new one takes effect on reconnect.
    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.settings.dialect = dialect;
        if self.is_connected() {
            info!(
                active = %self.dialect(),
                "Dispenser dialect {} deferred until reconnect", dialect
            );
            self.log
                .record_connection("PROTOCOL_SET", format!("{dialect} (on reconnect)"));
        } else {
            *lock(&self.shared.dialect) = dialect;
            info!("Dispenser dialect set to {}", dialect);
            self.log.record_connection("PROTOCOL_SET", dialect.to_string());
        }
    }

    /// Dialect of the current session, or of the next one when disconnected.
    pub fn dialect(&self) -> Dialect {
        self.shared.dialect()
    }

    pub fn status_snapshot(&self) -> DispenserSnapshot {
        let state = self.shared.state();
        DispenserSnapshot {
            connected: self.is_connected(),
            status: state.status,
            dispensed: state.dispensed,
            total: state.total,
            last_error: state.last_error,
            dialect: self.shared.dialect(),
        }
    }

    pub fn command_log(&self) -> Vec<CommandLogEntry> {
        self.log.commands()
    }

    pub fn connection_log(&self) -> Vec<ConnectionLogEntry> {
        self.log.connections()
    }

    pub fn clear_command_log(&self) {
        self.log.clear_commands();
    }

    pub fn clear_connection_log(&self) {
        self.log.clear_connections();
    }

    /// Dispense `count` bills, 1 to 250.
    ///
    /// # Errors
    /// `Protocol(InvalidDispenseCount)` for a count out of range; nothing is
    /// sent in that case.
    pub async fn dispense_bills(&self, count: u32) -> Result<Outcome<()>> {
        let count = match DispenseCount::new(count) {
            Ok(count) => count,
            Err(e) => {
                warn!("Dispense rejected: {}", e);
                self.log
                    .record_command("Dispense Bills", &[], &[], Some(e.to_string()));
                return Err(e.into());
            }
        };

        Ok(match self.client() {
            Some(client) => client.dispense(count).await,
            None => Outcome::TransportClosed,
        })
    }

    pub async fn check_connection(&self) -> bool {
        match self.client() {
            Some(client) => client.check_connection().await,
            None => false,
        }
    }

    pub async fn reset(&self) -> Outcome<()> {
        match self.client() {
            Some(client) => client.reset().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn disable(&self) -> Outcome<()> {
        match self.client() {
            Some(client) => client.disable().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn enable(&self) -> Outcome<()> {
        match self.client() {
            Some(client) => client.enable().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn clear_dispensed_count(&self) -> Outcome<()> {
        match self.client() {
            Some(client) => client.clear_dispensed_count().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn get_total_dispensed_count(&self) -> Outcome<u32> {
        match self.client() {
            Some(client) => client.get_total_count().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn clear_total_dispensed_count(&self) -> Outcome<()> {
        match self.client() {
            Some(client) => client.clear_total_count().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn get_status(&self) -> Outcome<DispenserStatus> {
        match self.client() {
            Some(client) => client.get_status().await,
            None => Outcome::TransportClosed,
        }
    }

    pub async fn get_error_code(&self) -> Outcome<u8> {
        match self.client() {
            Some(client) => client.get_error_code().await,
            None => Outcome::TransportClosed,
        }
    }
}

impl std::fmt::Debug for BillDispenser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillDispenser")
            .field("port", &self.settings.serial.path)
            .field("connected", &self.is_connected())
            .field("dialect", &self.dialect())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0u32)]
    #[case(251)]
    #[case(1_000)]
    #[tokio::test]
    async fn test_out_of_range_count_is_rejected(#[case] count: u32) {
        let dispenser = BillDispenser::new(DispenserSettings::default());
        let result = dispenser.dispense_bills(count).await;

        assert!(matches!(
            result,
            Err(DeviceError::Protocol(cashpoint_core::Error::InvalidDispenseCount(n))) if n == count
        ));
        assert_eq!(dispenser.command_log().len(), 1);
    }

    #[tokio::test]
    async fn test_valid_count_without_session_is_closed() {
        let dispenser = BillDispenser::new(DispenserSettings::default());
        assert_eq!(
            dispenser.dispense_bills(250).await.unwrap(),
            Outcome::TransportClosed
        );
    }

    #[test]
    fn test_total_count_combines_halves() {
        let high = Packet::new(b't', 0x12, 0x34);
        let low = Packet::new(b'g', 0x56, 0x78);
        assert_eq!(total_count(&high, &low), 0x1234_5678);
    }

    #[test]
    fn test_observer_tracks_status_and_errors() {
        let dispenser = BillDispenser::new(DispenserSettings::default());
        let shared = &dispenser.shared;

        shared.observe(&Packet::new(b's', b'o', b'n'));
        assert_eq!(dispenser.status_snapshot().status, Some(DispenserStatus::Dispensing));

        shared.observe(&Packet::new(b'S', b'O', 5));
        shared.observe(&Packet::new(b's', b'e', 0x82));
        shared.observe(&Packet::new(b'd', b'a', 5));

        let snapshot = dispenser.status_snapshot();
        assert_eq!(snapshot.status, Some(DispenserStatus::Completed(5)));
        assert_eq!(snapshot.dispensed, Some(5));
        assert_eq!(snapshot.last_error, Some(0x82));
    }

    #[test]
    fn test_protocol_version_switch_without_session() {
        let mut dispenser = BillDispenser::new(DispenserSettings::default());
        assert_eq!(dispenser.dialect(), Dialect::Old);

        dispenser.set_protocol_version(false);
        assert_eq!(dispenser.dialect(), Dialect::New);
        assert_eq!(dispenser.settings().dialect, Dialect::New);
        assert_eq!(dispenser.status_snapshot().dialect, Dialect::New);
        let entry = &dispenser.connection_log()[0];
        assert_eq!(entry.event, "PROTOCOL_SET");
        assert_eq!(entry.details, "new (DIP SW3 on)");
    }
}
