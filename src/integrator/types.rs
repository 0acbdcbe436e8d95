//! Integrator types

use crate::state::ErrorRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Cooperative cancellation flag shared with a running integrator
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; calling it again changes nothing
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every phase ran to the end
    Completed,
    /// Stopped at a cancellation check; the next run resumes from there
    Cancelled,
    /// Halted on a fatal error, also kept in `current_error`
    Failed(ErrorRecord),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Process exit code for the outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::Cancelled => 0,
            Self::Failed(_) => 1,
        }
    }
}

/// Result of one stage
#[derive(Debug)]
pub(super) enum Flow {
    Next,
    Cancelled,
    Fatal(ErrorRecord),
}
