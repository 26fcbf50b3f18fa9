//! Response correlation: match inbound packets to the request waiting for them.
//!
//! Each outstanding request is keyed by the signature of the reply it
//! expects. A signature can have at most one registration at a time; a
//! second caller expecting the same reply waits on that signature's lease
//! until the first exchange finishes, so two requests never race for one
//! reply.
//!
//! ```text
//! caller ── lease(sig) ── register(sig) ── send ── await ─┬─ reply    -> Replied
//!                                          ^              └─ timeout  -> backoff, resend
//!                                          └────────────────────────────┘  (max_attempts)
//! reader ── resolve(packet) ── exact sig? ── wildcard sig? ── fallback sig?
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, oneshot};
use tracing::{debug, trace, warn};

use cashpoint_protocol::{Packet, Signature};

/// Timeout and retry budget for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Matching reply, plus the follow-on packet when one was requested.
    Replied {
        reply: Packet,
        follow_on: Option<Packet>,
    },
    /// Every attempt timed out.
    TimedOut,
    /// The session closed or the write failed.
    Closed,
}

/// Pending-request table shared by the reader loop and command callers.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Signature, oneshot::Sender<Packet>>>,
    leases: Mutex<HashMap<Signature, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a request and wait for its reply, resending on timeout.
    ///
    /// `send` is called once per attempt. When `follow_on` is given, the
    /// second packet is awaited after the reply without sending again; it is
    /// registered before the request goes out so a fast device cannot beat
    /// the registration.
    pub async fn send_and_await<F, Fut, E>(
        &self,
        expect: Signature,
        follow_on: Option<Signature>,
        policy: RetryPolicy,
        mut send: F,
    ) -> Correlation
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let _lease = self.lease(expect).await;
        let _follow_lease = match follow_on {
            Some(sig) => Some(self.lease(sig).await),
            None => None,
        };

        let attempts = policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(reply_rx) = self.register(expect) else {
                return Correlation::Closed;
            };
            let follow_rx = match follow_on {
                Some(sig) => match self.register(sig) {
                    Some(rx) => Some((sig, rx)),
                    None => {
                        self.unregister(expect);
                        return Correlation::Closed;
                    }
                },
                None => None,
            };

            if let Err(e) = send().await {
                warn!(signature = %expect, "Write failed: {}", e);
                self.unregister(expect);
                if let Some((sig, _)) = follow_rx {
                    self.unregister(sig);
                }
                return Correlation::Closed;
            }

            match tokio::time::timeout(policy.timeout, reply_rx).await {
                Ok(Ok(reply)) => {
                    let Some((sig, rx)) = follow_rx else {
                        return Correlation::Replied {
                            reply,
                            follow_on: None,
                        };
                    };
                    return match tokio::time::timeout(policy.timeout, rx).await {
                        Ok(Ok(second)) => Correlation::Replied {
                            reply,
                            follow_on: Some(second),
                        },
                        Ok(Err(_)) => Correlation::Closed,
                        Err(_) => {
                            debug!(signature = %sig, "Follow-on packet timed out");
                            self.unregister(sig);
                            Correlation::TimedOut
                        }
                    };
                }
                Ok(Err(_)) => {
                    if let Some((sig, _)) = follow_rx {
                        self.unregister(sig);
                    }
                    return Correlation::Closed;
                }
                Err(_) => {
                    debug!(
                        signature = %expect,
                        attempt,
                        attempts,
                        "Response timeout after {}ms",
                        policy.timeout.as_millis()
                    );
                    self.unregister(expect);
                    if let Some((sig, _)) = follow_rx {
                        self.unregister(sig);
                    }
                    if attempt < attempts {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }

        Correlation::TimedOut
    }

    /// Hand an inbound packet to the request waiting for it.
    ///
    /// An exact registration wins over a wildcard one; `fallback` is tried
    /// last. Returns `false` when nobody was waiting.
    pub fn resolve(&self, packet: Packet, fallback: Option<Signature>) -> bool {
        let candidates = [
            Some(packet.signature()),
            Some(Signature::any_second(packet.cmd1())),
            fallback,
        ];

        let mut pending = self.pending();
        for sig in candidates.into_iter().flatten() {
            if let Some(tx) = pending.remove(&sig) {
                trace!(signature = %sig, rx = %packet, "Response matched");
                // The waiter may have timed out in the same instant; the reply is then unused.
                let _ = tx.send(packet);
                return true;
            }
        }
        false
    }

    /// Reject every pending request and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut pending = self.pending();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            debug!("Rejected {} pending request(s) on close", dropped);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of registrations currently waiting.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    async fn lease(&self, sig: Signature) -> OwnedMutexGuard<()> {
        let lock = {
            let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(leases.entry(sig).or_default())
        };
        lock.lock_owned().await
    }

    fn register(&self, sig: Signature) -> Option<oneshot::Receiver<Packet>> {
        if self.is_closed() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.pending().insert(sig, tx);
        Some(rx)
    }

    fn unregister(&self, sig: Signature) {
        self.pending().remove(&sig);
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Signature, oneshot::Sender<Packet>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    const POLICY: RetryPolicy = RetryPolicy {
        timeout: Duration::from_millis(500),
        max_attempts: 3,
        backoff: Duration::from_millis(100),
    };

    fn ok_send() -> impl Future<Output = Result<(), String>> {
        async { Ok(()) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out_after_full_budget() {
        let correlator = Correlator::new();
        let sends = AtomicU32::new(0);
        let started = Instant::now();

        let result = correlator
            .send_and_await(Signature::exact(b'g', b'a'), None, POLICY, || {
                sends.fetch_add(1, Ordering::SeqCst);
                ok_send()
            })
            .await;

        assert_eq!(result, Correlation::TimedOut);
        assert_eq!(sends.load(Ordering::SeqCst), 3);
        // 3 x 500 ms timeouts and 2 x 100 ms backoffs.
        assert!(started.elapsed() >= Duration::from_millis(1_700));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_resolves_waiter() {
        let correlator = Arc::new(Correlator::new());
        let reader = Arc::clone(&correlator);

        let waiter = tokio::spawn(async move {
            reader
                .send_and_await(Signature::exact(b'g', b'b'), None, POLICY, ok_send)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(correlator.resolve(Packet::new(b'g', b'b', 10), None));

        let result = waiter.await.unwrap();
        assert_eq!(
            result,
            Correlation::Replied {
                reply: Packet::new(b'g', b'b', 10),
                follow_on: None
            }
        );
    }

    #[test]
    fn test_exact_registration_beats_wildcard() {
        let correlator = Correlator::new();
        let mut wildcard = correlator.register(Signature::any_second(b's')).unwrap();
        let mut exact = correlator.register(Signature::exact(b's', b'e')).unwrap();

        assert!(correlator.resolve(Packet::new(b's', b'e', 0x82), None));
        assert_eq!(exact.try_recv().unwrap().data(), 0x82);
        assert!(wildcard.try_recv().is_err());

        assert!(correlator.resolve(Packet::new(b's', b't', b'b'), None));
        assert_eq!(wildcard.try_recv().unwrap().cmd2(), b't');
    }

    #[test]
    fn test_error_status_goes_to_pending_error_code_query() {
        use cashpoint_core::Dialect;
        use cashpoint_protocol::DispenserCommand;

        let correlator = Correlator::new();
        let status = DispenserCommand::GetStatus.spec(Dialect::Old).expect;
        let error = DispenserCommand::GetErrorCode.spec(Dialect::Old).expect;
        let mut status_rx = correlator.register(status).unwrap();
        let mut error_rx = correlator.register(error).unwrap();

        assert!(correlator.resolve(Packet::new(b's', b'e', 0x81), None));
        assert_eq!(error_rx.try_recv().unwrap().data(), 0x81);
        assert!(status_rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn test_fallback_route() {
        let correlator = Correlator::new();
        let mut ok = correlator.register(Signature::exact(b'O', b'K')).unwrap();

        let nack = Packet::new(b'N', b'G', b'a');
        assert!(!correlator.resolve(nack, None));
        assert!(correlator.resolve(nack, Some(Signature::exact(b'O', b'K'))));
        assert_eq!(ok.try_recv().unwrap(), nack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_pending() {
        let correlator = Arc::new(Correlator::new());
        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .send_and_await(Signature::exact(b'O', b'K'), None, POLICY, ok_send)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        correlator.close();

        assert_eq!(waiter.await.unwrap(), Correlation::Closed);
        assert!(correlator.register(Signature::exact(b'O', b'K')).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_closed() {
        let correlator = Correlator::new();
        let result = correlator
            .send_and_await(Signature::exact(b'O', b'K'), None, POLICY, || async {
                Err::<(), _>("broken pipe")
            })
            .await;
        assert_eq!(result, Correlation::Closed);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_signature_requests_are_serialized() {
        let correlator = Arc::new(Correlator::new());
        let sig = Signature::exact(b'O', b'K');

        let first = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.send_and_await(sig, None, POLICY, ok_send).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.send_and_await(sig, None, POLICY, ok_send).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Only the first request is registered; the second waits on the lease.
        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.resolve(Packet::new(b'O', b'K', b'a'), None));
        assert!(first.await.unwrap() != Correlation::TimedOut);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.resolve(Packet::new(b'O', b'K', b'c'), None));

        match second.await.unwrap() {
            Correlation::Replied { reply, .. } => assert_eq!(reply.data(), b'c'),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_on_packet_without_second_send() {
        let correlator = Arc::new(Correlator::new());
        let sends = Arc::new(AtomicU32::new(0));

        let waiter = {
            let correlator = Arc::clone(&correlator);
            let sends = Arc::clone(&sends);
            tokio::spawn(async move {
                correlator
                    .send_and_await(
                        Signature::any_second(b't'),
                        Some(Signature::any_second(b'g')),
                        POLICY,
                        move || {
                            sends.fetch_add(1, Ordering::SeqCst);
                            ok_send()
                        },
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Both packets arrive back to back before the caller wakes.
        assert!(correlator.resolve(Packet::new(b't', 0x00, 0x01), None));
        assert!(correlator.resolve(Packet::new(b'g', 0x00, 0x2C), None));

        let result = waiter.await.unwrap();
        assert_eq!(
            result,
            Correlation::Replied {
                reply: Packet::new(b't', 0x00, 0x01),
                follow_on: Some(Packet::new(b'g', 0x00, 0x2C)),
            }
        );
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }
}
