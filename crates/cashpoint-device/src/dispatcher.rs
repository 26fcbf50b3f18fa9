//! Event bookkeeping: duplicate suppression, busy window and last-event record.
//!
//! The engine's event task owns the control flow (acknowledge, settle,
//! dispatch); this type holds the state it shares with command callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use cashpoint_protocol::Packet;

use crate::config::EngineConfig;

/// Most recent event accepted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub code: u8,
    pub packet: Packet,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub received_at: Instant,
}

impl EventRecord {
    /// Time since the event arrived, on the runtime clock.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

#[derive(Debug)]
pub struct EventDispatcher {
    dedup_window: Duration,
    busy_wait_limit: Duration,
    busy_wait_slice: Duration,
    seen: Mutex<HashMap<u8, Instant>>,
    last: Mutex<Option<EventRecord>>,
    busy: AtomicBool,
    processing: AtomicBool,
}

impl EventDispatcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dedup_window: config.dedup_window,
            busy_wait_limit: config.busy_wait_limit,
            busy_wait_slice: config.busy_wait_slice.max(Duration::from_millis(1)),
            seen: Mutex::new(HashMap::new()),
            last: Mutex::new(None),
            busy: AtomicBool::new(false),
            processing: AtomicBool::new(false),
        }
    }

    /// Accept an event unless the same code was accepted inside the dedup window.
    ///
    /// An accepted event becomes the last event.
    pub fn admit(&self, event: Packet) -> bool {
        let code = event.data();
        let now = Instant::now();
        {
            let mut seen = lock(&self.seen);
            if let Some(previous) = seen.get(&code)
                && now.duration_since(*previous) < self.dedup_window
            {
                trace!(code, "Duplicate event suppressed");
                return false;
            }
            seen.insert(code, now);
        }

        *lock(&self.last) = Some(EventRecord {
            code,
            packet: event,
            timestamp: Utc::now(),
            received_at: now,
        });
        true
    }

    pub fn last_event(&self) -> Option<EventRecord> {
        *lock(&self.last)
    }

    /// Whether an event arrived within `window`.
    pub fn event_within(&self, window: Duration) -> bool {
        self.last_event().is_some_and(|record| record.age() < window)
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Poll the busy flag until it clears or the wait limit passes.
    ///
    /// Returns `false` if the window was still open at the limit; the caller
    /// proceeds either way.
    pub async fn wait_until_idle(&self) -> bool {
        let deadline = Instant::now() + self.busy_wait_limit;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.busy_wait_slice).await;
        }
        true
    }

    /// Enable or disable dispatch to the event handler.
    ///
    /// Events are acknowledged either way.
    pub fn set_processing(&self, enabled: bool) {
        self.processing.store(enabled, Ordering::SeqCst);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Forget dedup history and the last event.
    pub fn reset(&self) {
        lock(&self.seen).clear();
        *lock(&self.last) = None;
        self.set_busy(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(code: u8) -> Packet {
        Packet::new(b'E', b'S', code)
    }

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(&EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_code_inside_window_is_dropped() {
        let dispatcher = dispatcher();

        assert!(dispatcher.admit(event(0x0B)));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!dispatcher.admit(event(0x0B)));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(dispatcher.admit(event(0x0B)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_codes_are_tracked_separately() {
        let dispatcher = dispatcher();

        assert!(dispatcher.admit(event(0x05)));
        assert!(dispatcher.admit(event(0x0B)));
        assert!(!dispatcher.admit(event(0x05)));
        assert!(!dispatcher.admit(event(0x0B)));

        assert_eq!(dispatcher.last_event().map(|r| r.code), Some(0x0B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_within_window() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.event_within(Duration::from_secs(5)));

        dispatcher.admit(event(0x02));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(dispatcher.event_within(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dispatcher.event_within(Duration::from_secs(5)));
        assert!(dispatcher.event_within(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_idle_gives_up_at_limit() {
        let dispatcher = dispatcher();
        dispatcher.set_busy(true);

        let started = Instant::now();
        assert!(!dispatcher.wait_until_idle().await);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_idle_returns_when_cleared() {
        let dispatcher = Arc::new(dispatcher());
        dispatcher.set_busy(true);

        let clearer = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            clearer.set_busy(false);
        });

        let started = Instant::now();
        assert!(dispatcher.wait_until_idle().await);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_processing_flag_defaults_off() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.is_processing());
        dispatcher.set_processing(true);
        assert!(dispatcher.is_processing());
    }
}
