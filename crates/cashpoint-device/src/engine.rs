//! Generic protocol engine: one running session with one peripheral.
//!
//! The engine is parameterized by a [`PeripheralProfile`] (which packets are
//! events and how they are acknowledged) and driven with [`CommandSpec`]s from
//! a command table. Both façades run the same engine.
//!
//! # Tasks
//!
//! ```text
//!              ┌──────────── reader task ────────────┐
//! serial ─────>│ FramedRead<PacketCodec> -> classify  │
//!              └──────┬───────────────────────┬───────┘
//!                     │ Event                 │ Response
//!                     v                       v
//!              event task                Correlator ──> waiting request
//!              dedup -> ack -> settle
//!              -> EventHandler
//!
//! request() ─> wait busy window ─> Correlator::send_and_await ─> writer
//! ```
//!
//! The reader task never blocks on a command or a handler, so an event is
//! acknowledged even while a request is waiting for its reply.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use cashpoint_protocol::{CommandSpec, Packet, PacketClass, PeripheralProfile, hex};

use crate::config::EngineConfig;
use crate::correlator::{Correlation, Correlator, RetryPolicy};
use crate::dispatcher::{EventDispatcher, EventRecord};
use crate::error::{DeviceError, Result};
use crate::log::DiagnosticLog;
use crate::outcome::Outcome;
use crate::transport::{PacketReader, PacketWriter, Transport};

/// Receives events that passed dedup and were acknowledged.
///
/// Called on the event task; long work must be moved to
/// [`ProtocolEngine::spawn`] so the next event is not delayed.
pub trait EventHandler: Send + Sync + 'static {
    fn on_event(&self, engine: &ProtocolEngine, event: Packet);
}

/// Sees every inbound packet before it is routed.
pub type PacketObserver = Arc<dyn Fn(&Packet) + Send + Sync>;

/// A positive reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub packet: Packet,
    /// Second packet of a two-packet reply.
    pub follow_on: Option<Packet>,
}

/// Options for [`ProtocolEngine::start`].
#[derive(Default)]
pub struct EngineOptions {
    pub config: EngineConfig,
    pub log: Option<Arc<DiagnosticLog>>,
    pub handler: Option<Arc<dyn EventHandler>>,
    pub observer: Option<PacketObserver>,
}

impl EngineOptions {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Share a diagnostics log that outlives this session.
    pub fn log(mut self, log: Arc<DiagnosticLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn observer(mut self, observer: PacketObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Handle to a running session. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct ProtocolEngine {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    profile: PeripheralProfile,
    config: EngineConfig,
    writer: Mutex<Option<PacketWriter>>,
    correlator: Correlator,
    dispatcher: EventDispatcher,
    log: Arc<DiagnosticLog>,
    cancel: CancellationToken,
    connected: AtomicBool,
}

impl ProtocolEngine {
    /// Start the reader and event tasks on an open transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Transport, profile: PeripheralProfile, options: EngineOptions) -> Self {
        let EngineOptions {
            config,
            log,
            handler,
            observer,
        } = options;

        let (name, reader, writer) = transport.into_parts();
        let log = log.unwrap_or_else(|| Arc::new(DiagnosticLog::new(config.log_capacity)));
        let (event_tx, event_rx) = mpsc::channel(config.event_queue.max(1));

        let engine = Self {
            inner: Arc::new(Inner {
                name,
                profile,
                dispatcher: EventDispatcher::new(&config),
                config,
                writer: Mutex::new(Some(writer)),
                correlator: Correlator::new(),
                log,
                cancel: CancellationToken::new(),
                connected: AtomicBool::new(true),
            }),
        };

        info!(
            peripheral = profile.name,
            port = %engine.inner.name,
            "Session started"
        );
        engine
            .inner
            .log
            .record_connection("CONNECTED", engine.inner.name.clone());

        tokio::spawn(engine.clone().read_loop(reader, event_tx, observer));
        tokio::spawn(engine.clone().event_loop(event_rx, handler));

        engine
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn profile(&self) -> &PeripheralProfile {
        &self.inner.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &Arc<DiagnosticLog> {
        &self.inner.log
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn last_event(&self) -> Option<EventRecord> {
        self.inner.dispatcher.last_event()
    }

    /// Token cancelled when the session closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Run one command exchange.
    ///
    /// A reply that arrived through a fallback route (e.g. `N G` for a
    /// command waiting on `O K`) is a device nack. A reply whose data byte
    /// does not match the command's ack is logged and reported as a timeout.
    pub async fn request(&self, spec: &CommandSpec) -> Outcome<Reply> {
        if !self.is_connected() {
            return Outcome::TransportClosed;
        }

        if !self.inner.dispatcher.wait_until_idle().await {
            debug!(command = spec.name, "Event busy window still open, sending anyway");
        }

        let policy = RetryPolicy {
            timeout: spec.timeout.unwrap_or(self.inner.config.response_timeout),
            max_attempts: self.inner.config.max_attempts,
            backoff: self.inner.config.retry_backoff,
        };
        let request = spec.request;
        let tx = request.as_bytes();

        trace!(command = spec.name, tx = %request, "Sending command");
        let result = self
            .inner
            .correlator
            .send_and_await(spec.expect, spec.follow_on, policy, move || {
                self.write(request)
            })
            .await;

        let log = &self.inner.log;
        match result {
            Correlation::Replied { reply, follow_on } => {
                let mut rx = reply.as_bytes().to_vec();
                if let Some(second) = follow_on {
                    rx.extend_from_slice(second.as_bytes());
                }

                if !spec.expect.matches(&reply) {
                    debug!(command = spec.name, rx = %reply, "Device rejected command");
                    log.record_command(
                        spec.name,
                        tx,
                        &rx,
                        Some(format!("nack 0x{:02x}", reply.data())),
                    );
                    return Outcome::DeviceError(reply.data());
                }

                if !spec.is_positive(&reply) {
                    warn!(
                        command = spec.name,
                        tx = %request,
                        rx = %reply,
                        "Protocol mismatch: unexpected reply data"
                    );
                    log.record_command(
                        spec.name,
                        tx,
                        &rx,
                        Some(format!("protocol mismatch: {}", hex(&rx))),
                    );
                    return Outcome::Timeout;
                }

                debug!(command = spec.name, rx = %reply, "Command completed");
                log.record_command(spec.name, tx, &rx, None);
                Outcome::Ok(Reply {
                    packet: reply,
                    follow_on,
                })
            }
            Correlation::TimedOut => {
                warn!(
                    command = spec.name,
                    attempts = policy.max_attempts,
                    "No response from {}",
                    self.inner.profile.name
                );
                log.record_command(spec.name, tx, &[], Some("timeout".to_string()));
                Outcome::Timeout
            }
            Correlation::Closed => {
                log.record_command(spec.name, tx, &[], Some("transport closed".to_string()));
                Outcome::TransportClosed
            }
        }
    }

    /// Write one packet without waiting for a reply.
    ///
    /// # Errors
    /// `NotConnected` after close, `Protocol` if the write fails.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.write(packet).await
    }

    /// Run a task that is aborted when the session closes.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// End the session: reject pending requests, stop both tasks, release the port.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(
            peripheral = self.inner.profile.name,
            port = %self.inner.name,
            "Closing session"
        );
        self.inner.cancel.cancel();
        self.inner.correlator.close();
        self.inner.dispatcher.reset();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            debug!("Error while closing writer: {}", e);
        }

        self.inner
            .log
            .record_connection("DISCONNECTED", self.inner.name.clone());
    }

    async fn write(&self, packet: Packet) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(DeviceError::not_connected(self.inner.name.clone()));
        };
        writer.send(packet).await?;
        Ok(())
    }

    async fn read_loop(
        self,
        mut reader: PacketReader,
        events: mpsc::Sender<Packet>,
        observer: Option<PacketObserver>,
    ) {
        let cancel = self.inner.cancel.clone();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(packet)) => {
                    trace!(rx = %packet, "Packet received");
                    if let Some(observer) = &observer {
                        observer(&packet);
                    }
                    self.route(packet, &events);
                }
                Some(Err(e)) => {
                    warn!(port = %self.inner.name, "Read failed: {}", e);
                    break;
                }
                None => {
                    warn!(port = %self.inner.name, "Stream closed by peer");
                    break;
                }
            }
        }

        let stats = reader.decoder().stats();
        debug!(
            packets = stats.packets,
            skipped = stats.skipped_bytes,
            rejected = stats.rejected_candidates,
            "Reader stopped"
        );
        // Dropping the reader discards any partial packet.
        drop(reader);
        self.close().await;
    }

    fn route(&self, packet: Packet, events: &mpsc::Sender<Packet>) {
        match self.inner.profile.classify(&packet) {
            PacketClass::Event => match events.try_send(packet) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(rx = %dropped, "Event queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
            PacketClass::Response => {
                let fallback = self.inner.profile.fallback_for(&packet);
                if !self.inner.correlator.resolve(packet, fallback) {
                    debug!(rx = %packet, "Unsolicited packet ignored");
                }
            }
        }
    }

    async fn event_loop(
        self,
        mut events: mpsc::Receiver<Packet>,
        handler: Option<Arc<dyn EventHandler>>,
    ) {
        let cancel = self.inner.cancel.clone();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event, handler.as_deref()).await;
        }
    }

    async fn handle_event(&self, event: Packet, handler: Option<&dyn EventHandler>) {
        let dispatcher = &self.inner.dispatcher;
        if !dispatcher.admit(event) {
            return;
        }
        debug!(
            peripheral = self.inner.profile.name,
            code = event.data(),
            "Event 0x{:02x}",
            event.data()
        );

        if let Some(ack) = self.inner.profile.ack_for(&event) {
            dispatcher.set_busy(true);
            match self.write(ack).await {
                Ok(()) => {
                    self.inner
                        .log
                        .record_command("Event Ack", ack.as_bytes(), event.as_bytes(), None);
                }
                Err(e) => {
                    warn!(tx = %ack, "Event acknowledgment failed: {}", e);
                    self.inner.log.record_command(
                        "Event Ack",
                        ack.as_bytes(),
                        event.as_bytes(),
                        Some(e.to_string()),
                    );
                }
            }
            tokio::time::sleep(self.inner.config.event_settle).await;
            dispatcher.set_busy(false);
        }

        if !dispatcher.is_processing() {
            trace!(code = event.data(), "Event processing disabled");
            return;
        }
        if let Some(handler) = handler {
            handler.on_event(self, event);
        }
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("name", &self.inner.name)
            .field("peripheral", &self.inner.profile.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use cashpoint_protocol::{ACCEPTOR_PROFILE, AcceptorCommand, DISPENSER_PROFILE, Signature};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn start(profile: PeripheralProfile, options: EngineOptions) -> (ProtocolEngine, DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        let engine = ProtocolEngine::start(Transport::from_stream("duplex", host), profile, options);
        (engine, device)
    }

    async fn read_packet(device: &mut DuplexStream) -> Packet {
        let mut wire = [0u8; 5];
        device.read_exact(&mut wire).await.unwrap();
        Packet::try_from(&wire[..]).unwrap()
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<u8>>);

    impl EventHandler for Recorder {
        fn on_event(&self, _engine: &ProtocolEngine, event: Packet) {
            self.0.lock().unwrap().push(event.data());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_gets_reply() {
        let (engine, mut device) = start(ACCEPTOR_PROFILE, EngineOptions::default());

        let responder = tokio::spawn(async move {
            let request = read_packet(&mut device).await;
            assert_eq!(request, Packet::new(b'G', b'B', b'?'));
            device
                .write_all(Packet::new(b'g', b'b', 10).as_bytes())
                .await
                .unwrap();
            device
        });

        let outcome = engine.request(&AcceptorCommand::GetBillData.spec()).await;
        let reply = outcome.ok().unwrap();
        assert_eq!(reply.packet.data(), 10);
        assert_eq!(reply.follow_on, None);

        let _device = responder.await.unwrap();
        let log = engine.log().commands();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command, "Get Bill Data");
        assert_eq!(log[0].rx_hex(), "24 67 62 0a d3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_through_fallback_is_device_error() {
        let (engine, mut device) = start(ACCEPTOR_PROFILE, EngineOptions::default());

        tokio::spawn(async move {
            read_packet(&mut device).await;
            device
                .write_all(Packet::new(b'N', b'G', b'a').as_bytes())
                .await
                .unwrap();
            device
        });

        let outcome = engine.request(&AcceptorCommand::DisableAcceptance.spec()).await;
        assert_eq!(outcome, Outcome::DeviceError(b'a'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_ack_data_is_timeout() {
        let (engine, mut device) = start(ACCEPTOR_PROFILE, EngineOptions::default());

        tokio::spawn(async move {
            read_packet(&mut device).await;
            device
                .write_all(Packet::new(b'O', b'K', b'z').as_bytes())
                .await
                .unwrap();
            device
        });

        let outcome = engine.request(&AcceptorCommand::EnableAcceptance.spec()).await;
        assert_eq!(outcome, Outcome::Timeout);
        let entry = &engine.log().commands()[0];
        assert!(entry.error.as_deref().unwrap().starts_with("protocol mismatch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_is_acked_and_dispatched() {
        let recorder = Arc::new(Recorder::default());
        let options = EngineOptions::default().handler(recorder.clone());
        let (engine, mut device) = start(ACCEPTOR_PROFILE, options);
        engine.dispatcher().set_processing(true);

        device
            .write_all(Packet::new(b'E', b'S', 0x05).as_bytes())
            .await
            .unwrap();
        let ack = read_packet(&mut device).await;
        assert_eq!(ack, Packet::new(b'e', b's', 0x05));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![0x05]);
        assert_eq!(engine.last_event().map(|e| e.code), Some(0x05));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_bypasses_request_waiting_on_same_signature() {
        let recorder = Arc::new(Recorder::default());
        let options = EngineOptions::default().handler(recorder.clone());
        let (engine, mut device) = start(ACCEPTOR_PROFILE, options);
        engine.dispatcher().set_processing(true);

        let lookalike = CommandSpec {
            name: "Event Lookalike",
            request: Packet::new(b'G', b'A', b'?'),
            expect: Signature::exact(b'E', b'S'),
            expect_data: None,
            follow_on: None,
            timeout: Some(Duration::from_millis(100)),
        };
        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request(&lookalike).await })
        };
        assert_eq!(read_packet(&mut device).await, Packet::new(b'G', b'A', b'?'));

        device
            .write_all(Packet::new(b'E', b'S', 0x05).as_bytes())
            .await
            .unwrap();

        assert_eq!(waiter.await.unwrap(), Outcome::Timeout);
        assert_eq!(*recorder.0.lock().unwrap(), vec![0x05]);
        let acks = engine
            .log()
            .commands()
            .into_iter()
            .filter(|entry| entry.command == "Event Ack")
            .count();
        assert_eq!(acks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_acked_but_not_dispatched_when_processing_off() {
        let recorder = Arc::new(Recorder::default());
        let options = EngineOptions::default().handler(recorder.clone());
        let (_engine, mut device) = start(ACCEPTOR_PROFILE, options);

        device
            .write_all(Packet::new(b'E', b'S', 0x02).as_bytes())
            .await
            .unwrap();
        assert_eq!(read_packet(&mut device).await, Packet::new(b'e', b's', 0x02));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_unsolicited_packets() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = EngineOptions::default().observer(Arc::new(move |packet: &Packet| {
            sink.lock().unwrap().push(*packet);
        }));
        let (_engine, mut device) = start(DISPENSER_PROFILE, options);

        device
            .write_all(Packet::new(b's', b't', b'b').as_bytes())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Packet::new(b's', b't', b'b')]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_pending_request() {
        let (engine, _device) = start(ACCEPTOR_PROFILE, EngineOptions::default());

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request(&AcceptorCommand::GetStatus.spec()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.close().await;
        engine.close().await;

        assert_eq!(waiter.await.unwrap(), Outcome::TransportClosed);
        assert!(!engine.is_connected());
        assert_eq!(
            engine.request(&AcceptorCommand::GetStatus.spec()).await,
            Outcome::TransportClosed
        );
        let events: Vec<String> = engine
            .log()
            .connections()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(events, vec!["CONNECTED", "DISCONNECTED"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_hangup_closes_session() {
        let (engine, device) = start(DISPENSER_PROFILE, EngineOptions::default());
        drop(device);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!engine.is_connected());
    }
}
