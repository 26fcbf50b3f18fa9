//! Bill acceptor façade.
//!
//! [`BillAcceptor`] owns one session with the acceptor at a time. Commands
//! are also available on [`AcceptorClient`], a cheap clonable handle to the
//! running session that can be moved into other tasks.
//!
//! With Event TX enabled the acceptor pushes its state as `E S` events; a
//! stacked bill is then reported through the bill counting callback and
//! intake is re-armed without any call from the application:
//!
//! ```text
//! E S 0x0B ─> ack ─> wait ─> G B ? ─> callback(amount) ─> wait ─> S A 0x0D
//!                                                                    │ no reply
//!                                                       G A ? ─> armed? else S A 0x0D
//! ```

mod state_machine;

pub use state_machine::{AcceptorStateMachine, EventAction, is_expected_transition};

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info, warn};

use cashpoint_core::Denomination;
use cashpoint_core::constants::{EVENT_LIVENESS_FALLBACK_MS, EVENT_LIVENESS_MS};
use cashpoint_protocol::{ACCEPTOR_PROFILE, AcceptorCommand, AcceptorConfig, AcceptorStatus, Packet};

use crate::config::AcceptorSettings;
use crate::dispatcher::EventRecord;
use crate::engine::{EngineOptions, EventHandler, ProtocolEngine};
use crate::error::{DeviceError, Result};
use crate::log::{CommandLogEntry, ConnectionLogEntry, DiagnosticLog};
use crate::outcome::Outcome;
use crate::transport::Transport;

/// Status polls while waiting for a polled bill to reach the cashbox.
const STACK_POLL_ATTEMPTS: u32 = 20;

/// Called once per stacked bill with its face value in won.
pub type BillCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Called with the code of every dispatched event.
pub type EventCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Point-in-time view of the acceptor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcceptorSnapshot {
    pub connected: bool,
    pub accepting: bool,
    /// Last status code seen in a status reply or event.
    pub status: Option<u8>,
    /// Face value of the last stacked bill.
    pub last_bill: Option<u32>,
}

/// Why a polled acceptance did not produce a bill.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcceptanceError {
    #[error("Failed to enable bill intake")]
    EnableFailed,

    #[error("Status query failed")]
    StatusUnavailable,

    #[error("Bill data query failed")]
    BillDataUnavailable,

    #[error("Unrecognized bill code {0}")]
    UnknownBill(u8),

    #[error("Failed to stack bill")]
    StackFailed,

    #[error("Timed out waiting for the bill to stack")]
    StackTimeout,

    #[error("Device error: {description}")]
    Device { code: Option<u8>, description: String },

    #[error("No bill inserted before the timeout")]
    Timeout,
}

#[derive(Debug, Default)]
struct State {
    accepting: bool,
    status: Option<u8>,
    last_bill: Option<u32>,
}

/// State shared between the façade, its clients and the event handler.
#[derive(Default)]
struct Shared {
    bill_callback: Mutex<Option<BillCallback>>,
    event_callback: Mutex<Option<EventCallback>>,
    state: Mutex<State>,
    machine: Mutex<AcceptorStateMachine>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn set_accepting(&self, accepting: bool) {
        self.state().accepting = accepting;
    }

    fn set_status(&self, code: u8) {
        self.state().status = Some(code);
    }

    fn fire_bill(&self, amount: u32) {
        let callback = lock(&self.bill_callback).clone();
        match callback {
            Some(callback) => callback(amount),
            None => debug!(amount, "No bill counting callback set"),
        }
    }

    fn fire_event(&self, code: u8) {
        let callback = lock(&self.event_callback).clone();
        if let Some(callback) = callback {
            callback(code);
        }
    }

    fn reset(&self) {
        *self.state() = State::default();
        lock(&self.machine).reset();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running acceptor session.
#[derive(Clone)]
pub struct AcceptorClient {
    engine: ProtocolEngine,
    shared: Arc<Shared>,
    settings: Arc<AcceptorSettings>,
}

impl AcceptorClient {
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Current device state code (`G A ?`).
    pub async fn get_status(&self) -> Outcome<u8> {
        let outcome = self.data_of(AcceptorCommand::GetStatus).await;
        if let Outcome::Ok(code) = outcome {
            self.shared.set_status(code);
        }
        outcome
    }

    /// Bill code of the bill in the acceptor (`G B ?`).
    pub async fn get_bill_data(&self) -> Outcome<u8> {
        self.data_of(AcceptorCommand::GetBillData).await
    }

    pub async fn get_config(&self) -> Outcome<AcceptorConfig> {
        self.data_of(AcceptorCommand::GetConfig)
            .await
            .map(AcceptorConfig::from_byte)
    }

    pub async fn set_config(&self, config: AcceptorConfig) -> Outcome<()> {
        self.command(AcceptorCommand::SetConfig(config.as_byte())).await
    }

    /// Raw error code; see [`AcceptorStatus::error_string`].
    pub async fn get_error_code(&self) -> Outcome<u8> {
        self.data_of(AcceptorCommand::GetErrorCode).await
    }

    /// Firmware version as `(major, minor)`.
    pub async fn get_version(&self) -> Outcome<(u8, u8)> {
        self.engine
            .request(&AcceptorCommand::GetVersion.spec())
            .await
            .map(|reply| (reply.packet.cmd2(), reply.packet.data()))
    }

    /// Arm bill intake.
    pub async fn enable_acceptance(&self) -> Outcome<()> {
        let outcome = self.command(AcceptorCommand::EnableAcceptance).await;
        if outcome.is_ok() {
            self.shared.set_accepting(true);
        }
        outcome
    }

    /// Disarm bill intake. A nack means intake was already off and counts as success.
    pub async fn disable_acceptance(&self) -> Outcome<()> {
        match self.command(AcceptorCommand::DisableAcceptance).await {
            Outcome::Ok(()) => {}
            Outcome::DeviceError(code) => {
                debug!(code, "Disable rejected, intake already off");
            }
            other => return other,
        }
        self.shared.set_accepting(false);
        Outcome::Ok(())
    }

    /// Commit the bill in escrow to the cashbox.
    pub async fn stack_bill(&self) -> Outcome<()> {
        self.command(AcceptorCommand::StackBill).await
    }

    /// Hand the bill in escrow back to the customer.
    pub async fn return_bill(&self) -> Outcome<()> {
        self.command(AcceptorCommand::ReturnBill).await
    }

    pub async fn reset_device(&self) -> Outcome<()> {
        let outcome = self.command(AcceptorCommand::Reset).await;
        if outcome.is_ok() {
            self.shared.set_accepting(false);
        }
        outcome
    }

    /// Reset, then wait for the device to come back up.
    pub async fn initialize_device(&self) -> Outcome<()> {
        let outcome = self.reset_device().await;
        if outcome.is_ok() {
            info!(
                "Reset accepted, waiting {}ms for the acceptor to settle",
                self.settings.initialize_settle.as_millis()
            );
            tokio::time::sleep(self.settings.initialize_settle).await;
        }
        outcome
    }

    /// Whether the acceptor is reachable.
    ///
    /// A recent event proves the link without sending anything. If the probe
    /// gets no answer, a somewhat older event still counts.
    pub async fn check_connection(&self) -> bool {
        let dispatcher = self.engine.dispatcher();
        if dispatcher.event_within(Duration::from_millis(EVENT_LIVENESS_MS)) {
            debug!("Connection confirmed by recent event");
            return true;
        }

        let spec = AcceptorCommand::CheckConnection.spec();
        if self.engine.request(&spec).await.is_ok() {
            return true;
        }

        if dispatcher.event_within(Duration::from_millis(EVENT_LIVENESS_FALLBACK_MS)) {
            debug!("Probe unanswered, connection confirmed by events");
            self.engine.log().record_command(
                "Check Connection (Event Based)",
                spec.request.as_bytes(),
                &[],
                Some("confirmed by recent events".to_string()),
            );
            return true;
        }
        false
    }

    /// Take one bill by polling status, for devices without Event TX.
    ///
    /// Intake is disabled again if no bill arrives before `timeout`.
    ///
    /// # Errors
    /// Returns the [`AcceptanceError`] step that failed.
    pub async fn accept_bill_polled(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Denomination, AcceptanceError> {
        if !self.enable_acceptance().await.is_ok() {
            return Err(AcceptanceError::EnableFailed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let Outcome::Ok(code) = self.get_status().await else {
                return Err(AcceptanceError::StatusUnavailable);
            };

            match AcceptorStatus::from_code(code) {
                Ok(AcceptorStatus::RecognitionEnd) => return self.stack_polled().await,
                Ok(AcceptorStatus::ErrorWait) => {
                    let code = self.get_error_code().await.ok();
                    let description = code.map_or_else(
                        || "unknown error".to_string(),
                        AcceptorStatus::error_string,
                    );
                    return Err(AcceptanceError::Device { code, description });
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.settings.status_poll_interval).await;
        }

        if !self.disable_acceptance().await.is_ok() {
            warn!("Failed to disable intake after polled acceptance timeout");
        }
        Err(AcceptanceError::Timeout)
    }

    async fn stack_polled(&self) -> std::result::Result<Denomination, AcceptanceError> {
        let Outcome::Ok(code) = self.get_bill_data().await else {
            return Err(AcceptanceError::BillDataUnavailable);
        };
        let denomination =
            Denomination::from_bill_code(code).map_err(|_| AcceptanceError::UnknownBill(code))?;

        if !self.stack_bill().await.is_ok() {
            if !self.return_bill().await.is_ok() {
                warn!("Failed to return bill after stack failure");
            }
            return Err(AcceptanceError::StackFailed);
        }

        for _ in 0..STACK_POLL_ATTEMPTS {
            if self.get_status().await == Outcome::Ok(AcceptorStatus::StackEnd.code()) {
                self.shared.state().last_bill = Some(denomination.amount());
                return Ok(denomination);
            }
            tokio::time::sleep(self.settings.status_poll_interval).await;
        }
        Err(AcceptanceError::StackTimeout)
    }

    async fn preview_bill(self) {
        tokio::time::sleep(self.settings.recognition_poll_delay).await;
        match self.get_bill_data().await {
            Outcome::Ok(code) => debug!(
                code,
                "Bill under recognition: {}",
                Denomination::from_bill_code(code)
                    .map_or_else(|e| e.to_string(), |d| d.to_string())
            ),
            other => debug!("Bill preview unavailable: {:?}", other),
        }
    }

    async fn complete_stack(self) {
        tokio::time::sleep(self.settings.stack_read_delay).await;

        match self.get_bill_data().await {
            Outcome::Ok(code) => match Denomination::from_bill_code(code) {
                Ok(denomination) => {
                    let amount = denomination.amount();
                    info!(amount, "Bill stacked: {}", denomination);
                    self.shared.state().last_bill = Some(amount);
                    self.engine
                        .log()
                        .record_connection("BILL_STACKED", denomination.to_string());
                    self.shared.fire_bill(amount);
                }
                Err(e) => error!("Stacked bill not recognized: {}", e),
            },
            other => warn!("Bill data unavailable after stack: {:?}", other),
        }

        tokio::time::sleep(self.settings.rearm_delay).await;
        self.rearm().await;
    }

    /// Re-enable intake after a stacked bill.
    ///
    /// Many units re-arm on their own and ignore the enable, so a missing
    /// reply is checked against the reported status before enabling again.
    async fn rearm(&self) {
        if self.enable_acceptance().await.is_ok() {
            debug!("Intake re-armed");
            return;
        }

        let status = self.get_status().await;
        let armed = status
            .ok()
            .and_then(|code| AcceptorStatus::from_code(code).ok())
            .is_some_and(AcceptorStatus::is_armed);
        if armed {
            debug!("Acceptor re-armed itself");
            self.shared.set_accepting(true);
            return;
        }

        info!("Acceptor not armed, enabling intake manually");
        if !self.enable_acceptance().await.is_ok() {
            warn!("Manual re-enable failed");
        }
    }

    async fn report_error(self) {
        match self.get_error_code().await {
            Outcome::Ok(code) => {
                let description = AcceptorStatus::error_string(code);
                error!(code, "Acceptor error: {}", description);
                self.engine.log().record_connection("DEVICE_ERROR", description);
            }
            other => error!("Acceptor in error state, error code unavailable: {:?}", other),
        }
    }

    async fn command(&self, command: AcceptorCommand) -> Outcome<()> {
        self.engine.request(&command.spec()).await.discard()
    }

    async fn data_of(&self, command: AcceptorCommand) -> Outcome<u8> {
        self.engine
            .request(&command.spec())
            .await
            .map(|reply| reply.packet.data())
    }
}

impl std::fmt::Debug for AcceptorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorClient")
            .field("engine", &self.engine)
            .finish()
    }
}

/// Event handler installed on the acceptor engine.
struct AcceptorEvents {
    shared: Arc<Shared>,
    settings: Arc<AcceptorSettings>,
}

impl EventHandler for AcceptorEvents {
    fn on_event(&self, engine: &ProtocolEngine, event: Packet) {
        let code = event.data();
        let name = AcceptorStatus::status_string(code);
        info!(code, "Acceptor event: {}", name);
        engine
            .log()
            .record_connection("EVENT_RECEIVED", format!("0x{code:02x} ({name})"));

        self.shared.set_status(code);
        let action = lock(&self.shared.machine).advance(code);
        self.shared.fire_event(code);

        let client = AcceptorClient {
            engine: engine.clone(),
            shared: Arc::clone(&self.shared),
            settings: Arc::clone(&self.settings),
        };
        match action {
            EventAction::None => {}
            EventAction::PollBillData => engine.spawn(client.preview_bill()),
            EventAction::CompleteStack => engine.spawn(client.complete_stack()),
            EventAction::ReportError => engine.spawn(client.report_error()),
        }
    }
}

struct Session {
    client: AcceptorClient,
    _cancel_on_drop: DropGuard,
}

/// Bill acceptor with at most one open session.
///
/// Diagnostics logs and callbacks survive reconnects.
pub struct BillAcceptor {
    settings: AcceptorSettings,
    shared: Arc<Shared>,
    log: Arc<DiagnosticLog>,
    session: Option<Session>,
}

impl BillAcceptor {
    pub fn new(settings: AcceptorSettings) -> Self {
        let log = Arc::new(DiagnosticLog::new(settings.engine.log_capacity));
        Self {
            settings,
            shared: Arc::new(Shared::default()),
            log,
            session: None,
        }
    }

    pub fn settings(&self) -> &AcceptorSettings {
        &self.settings
    }

    /// Open the configured serial port and bring the session up.
    ///
    /// # Errors
    /// `PortUnavailable` if the port cannot be opened, `CommunicationFailed`
    /// if the acceptor does not answer, `AlreadyConnected` for a live session.
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
    /// See [`BillAcceptor::connect`].
    pub async fn connect_with(&mut self, transport: Transport) -> Result<()> {
        if self.is_connected() {
            return Err(DeviceError::already_connected(transport.name()));
        }
        self.session = None;
        self.shared.reset();

        let settings = Arc::new(self.settings.clone());
        let handler = Arc::new(AcceptorEvents {
            shared: Arc::clone(&self.shared),
            settings: Arc::clone(&settings),
        });
        let options = EngineOptions::new(settings.engine.clone())
            .log(Arc::clone(&self.log))
            .handler(handler);
        let engine = ProtocolEngine::start(transport, ACCEPTOR_PROFILE, options);
        let cancel_on_drop = engine.cancellation_token().drop_guard();
        let client = AcceptorClient {
            engine: engine.clone(),
            shared: Arc::clone(&self.shared),
            settings: Arc::clone(&settings),
        };

        tokio::time::sleep(settings.init_delay).await;

        if settings.connect_check && !client.check_connection().await {
            self.log
                .record_connection("COMM_TEST", "no answer to connection probe");
            engine.close().await;
            return Err(DeviceError::communication_failed(format!(
                "bill acceptor on {} did not answer",
                engine.name()
            )));
        }

        match client.get_config().await {
            Outcome::Ok(config) => {
                info!("Acceptor config {}", config);
                self.log.record_connection(
                    "CONFIG_CHECK",
                    format!(
                        "Event TX {}",
                        if config.event_tx() { "enabled" } else { "disabled" }
                    ),
                );
            }
            other => warn!("Config check failed: {:?}", other),
        }

        engine.dispatcher().set_processing(true);
        self.log.record_connection("EVENT_PROCESSING", "enabled");
        info!(port = %engine.name(), "Bill acceptor connected");

        self.session = Some(Session {
            client,
            _cancel_on_drop: cancel_on_drop,
        });
        Ok(())
    }

    /// Close the session. Pending commands complete with `TransportClosed`.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.client.engine.close().await;
        }
        self.shared.set_accepting(false);
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.client.is_connected())
    }

    /// Handle to the running session, if any.
    pub fn client(&self) -> Option<&AcceptorClient> {
        self.session.as_ref().map(|session| &session.client)
    }

    /// Register the callback invoked once per stacked bill.
    pub fn set_bill_counting_callback(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        *lock(&self.shared.bill_callback) = Some(Arc::new(callback));
    }

    /// Register the callback invoked for every dispatched event code.
    pub fn set_event_callback(&self, callback: impl Fn(u8) + Send + Sync + 'static) {
        *lock(&self.shared.event_callback) = Some(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        *lock(&self.shared.bill_callback) = None;
        *lock(&self.shared.event_callback) = None;
    }

    /// Enable or disable event dispatch. Events are acknowledged either way.
    pub fn set_event_processing(&self, enabled: bool) {
        if let Some(client) = self.client() {
            client.engine.dispatcher().set_processing(enabled);
        }
        self.log.record_connection(
            "EVENT_PROCESSING",
            if enabled { "enabled" } else { "disabled" },
        );
    }

    pub fn last_event(&self) -> Option<EventRecord> {
        self.client().and_then(|client| client.engine.last_event())
    }

    pub fn status_snapshot(&self) -> AcceptorSnapshot {
        let state = self.shared.state();
        AcceptorSnapshot {
            connected: self.is_connected(),
            accepting: state.accepting,
            status: state.status,
            last_bill: state.last_bill,
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

    pub async fn check_connection(&self) -> bool {
        match self.client() {
            Some(client) => client.check_connection().await,
            None => false,
        }
    }

    pub async fn get_status(&self) -> Outcome<u8> {
        self.with_client(AcceptorClient::get_status).await
    }

    pub async fn get_bill_data(&self) -> Outcome<u8> {
        self.with_client(AcceptorClient::get_bill_data).await
    }

    pub async fn get_config(&self) -> Outcome<AcceptorConfig> {
        self.with_client(AcceptorClient::get_config).await
    }

    pub async fn set_config(&self, config: AcceptorConfig) -> Outcome<()> {
        self.with_client(|client| client.set_config(config)).await
    }

    pub async fn get_error_code(&self) -> Outcome<u8> {
        self.with_client(AcceptorClient::get_error_code).await
    }

    pub async fn get_version(&self) -> Outcome<(u8, u8)> {
        self.with_client(AcceptorClient::get_version).await
    }

    pub async fn enable_acceptance(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::enable_acceptance).await
    }

    pub async fn disable_acceptance(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::disable_acceptance).await
    }

    pub async fn stack_bill(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::stack_bill).await
    }

    pub async fn return_bill(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::return_bill).await
    }

    pub async fn reset_device(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::reset_device).await
    }

    pub async fn initialize_device(&self) -> Outcome<()> {
        self.with_client(AcceptorClient::initialize_device).await
    }

    /// See [`AcceptorClient::accept_bill_polled`].
    ///
    /// # Errors
    /// `EnableFailed` when not connected.
    pub async fn accept_bill_polled(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Denomination, AcceptanceError> {
        match self.client() {
            Some(client) => client.accept_bill_polled(timeout).await,
            None => Err(AcceptanceError::EnableFailed),
        }
    }

    async fn with_client<'a, T, F, Fut>(&'a self, command: F) -> Outcome<T>
    where
        F: FnOnce(&'a AcceptorClient) -> Fut,
        Fut: Future<Output = Outcome<T>> + 'a,
    {
        match self.client() {
            Some(client) => command(client).await,
            None => Outcome::TransportClosed,
        }
    }
}

impl std::fmt::Debug for BillAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillAcceptor")
            .field("port", &self.settings.serial.path)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_without_session_report_closed() {
        let acceptor = BillAcceptor::new(AcceptorSettings::default());

        assert!(!acceptor.is_connected());
        assert_eq!(acceptor.get_status().await, Outcome::TransportClosed);
        assert_eq!(acceptor.enable_acceptance().await, Outcome::TransportClosed);
        assert!(!acceptor.check_connection().await);
        assert_eq!(
            acceptor.accept_bill_polled(Duration::from_secs(1)).await,
            Err(AcceptanceError::EnableFailed)
        );
    }

    #[test]
    fn test_snapshot_defaults() {
        let acceptor = BillAcceptor::new(AcceptorSettings::default());
        let snapshot = acceptor.status_snapshot();
        assert_eq!(
            snapshot,
            AcceptorSnapshot {
                connected: false,
                accepting: false,
                status: None,
                last_bill: None,
            }
        );
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_is_logged() {
        let mut acceptor = BillAcceptor::new(AcceptorSettings::new("/dev/cashpoint-missing"));
        let result = acceptor.connect().await;

        assert!(matches!(result, Err(DeviceError::PortUnavailable { .. })));
        let events: Vec<String> = acceptor
            .connection_log()
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(events, vec!["CONNECT_START", "CONNECT_ERROR"]);
    }
}
