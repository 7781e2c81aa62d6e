//! Interrupt handling (SIGINT/SIGTERM).
//!
//! The first signal requests cancellation: the shared flag is set, the
//! executor kills the active subprocess, and the pipeline aborts with a
//! cancelled status (still writing the run summary). A second signal exits
//! immediately; anything after that is ignored.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled runs.
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Action decided for an incoming signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel the active stage and abort the pipeline.
    InitiateCancellation,
    /// Second signal: exit now.
    ImmediateExit,
    /// Third and later signals.
    Ignore,
}

/// Shared signal state.
#[derive(Debug, Default)]
pub struct SignalState {
    cancel: AtomicBool,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what to do with it.
    pub fn handle_signal(&self) -> SignalAction {
        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.cancel.store(true, Ordering::SeqCst);
                SignalAction::InitiateCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Installs the process signal handler and hands out the cancellation flag
/// the executor polls.
pub struct SignalHandler {
    state: Arc<SignalState>,
    cancel_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag passed into [`crate::exec::run_tool`]; setting it kills the
    /// active child.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the SIGINT/SIGTERM handler. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        let cancel_flag = Arc::clone(&self.cancel_flag);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                cancel_flag.store(true, Ordering::SeqCst);
                eprintln!("\ninterrupt received, stopping the active stage...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nsecond interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels() {
        let state = SignalState::new();
        assert!(!state.is_cancelled());
        assert_eq!(state.handle_signal(), SignalAction::InitiateCancellation);
        assert!(state.is_cancelled());
    }

    #[test]
    fn test_second_signal_exits_then_ignored() {
        let state = SignalState::new();
        state.handle_signal();
        assert_eq!(state.handle_signal(), SignalAction::ImmediateExit);
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
    }
}
