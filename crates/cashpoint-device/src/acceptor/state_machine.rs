//! Bill acceptor event state machine.
//!
//! The acceptor reports its progress with `E S <code>` events:
//!
//! ```text
//! WAIT -> START_WAIT -> RECOGNITION_WAIT -> RECOGNITION_END -> STACK_WAIT -> STACK_END
//!                                                  └──> RETURN_WAIT -> RETURN_END
//! any state ──> ERROR_WAIT
//! ```
//!
//! States are advisory: an out-of-order event is logged, never rejected,
//! since the device is the source of truth. Two states carry side effects,
//! described by [`EventAction`].

use std::collections::VecDeque;

use tracing::debug;

use cashpoint_protocol::AcceptorStatus;

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 32;

/// Side effect an event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Logging point only.
    None,
    /// Read the bill value for information; the authoritative read comes at stack end.
    PollBillData,
    /// Read the stacked bill, report it, then re-arm intake.
    CompleteStack,
    /// Query and log the device error code.
    ReportError,
}

impl EventAction {
    #[must_use]
    pub fn for_status(status: AcceptorStatus) -> Self {
        match status {
            AcceptorStatus::RecognitionWait => EventAction::PollBillData,
            AcceptorStatus::StackEnd => EventAction::CompleteStack,
            AcceptorStatus::ErrorWait => EventAction::ReportError,
            _ => EventAction::None,
        }
    }
}

/// Check whether `to` is a documented successor of `from`.
///
/// ```
/// use cashpoint_device::acceptor::is_expected_transition;
/// use cashpoint_protocol::AcceptorStatus;
///
/// assert!(is_expected_transition(AcceptorStatus::StackWait, AcceptorStatus::StackEnd));
/// assert!(is_expected_transition(AcceptorStatus::RecognitionEnd, AcceptorStatus::ReturnWait));
/// assert!(!is_expected_transition(AcceptorStatus::Wait, AcceptorStatus::StackEnd));
/// ```
#[must_use]
pub fn is_expected_transition(from: AcceptorStatus, to: AcceptorStatus) -> bool {
    use AcceptorStatus::*;

    matches!(
        (from, to),
        (_, ErrorWait)
            | (Wait | ErrorWait | StackEnd | ReturnEnd, Wait | StartWait)
            | (StartWait, RecognitionWait)
            | (RecognitionWait, RecognitionEnd)
            | (RecognitionEnd, StackWait | ReturnWait)
            | (StackWait, StackEnd)
            | (ReturnWait, ReturnEnd)
    )
}

/// Last known acceptor state and a short transition history.
#[derive(Debug, Default)]
pub struct AcceptorStateMachine {
    current: Option<AcceptorStatus>,
    history: VecDeque<(Option<AcceptorStatus>, AcceptorStatus)>,
}

impl AcceptorStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AcceptorStatus> {
        self.current
    }

    /// Apply an event code and return the action it triggers.
    ///
    /// Unknown codes leave the state unchanged and trigger nothing.
    pub fn advance(&mut self, code: u8) -> EventAction {
        let Ok(next) = AcceptorStatus::from_code(code) else {
            debug!("Unknown acceptor event code 0x{:02x}", code);
            return EventAction::None;
        };

        let previous = self.current;
        if let Some(from) = previous
            && from != next
            && !is_expected_transition(from, next)
        {
            debug!("Unexpected acceptor transition {} -> {}", from.as_str(), next.as_str());
        }

        self.current = Some(next);
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back((previous, next));

        EventAction::for_status(next)
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &(Option<AcceptorStatus>, AcceptorStatus)> {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }
}
