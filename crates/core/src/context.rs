//! Caller-supplied cancellation and deadline for a single engine call.
//!
//! The engine checks the context before every blocking store call. A tripped context aborts
//! the current operation with [`EmtctError::Cancelled`] or [`EmtctError::DeadlineExceeded`];
//! nothing is retried and no partial result is returned.

use crate::error::{EmtctError, EmtctResult, Phase};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancelled: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never cancels and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn check(&self, phase: Phase) -> EmtctResult<()> {
        if let Some(flag) = &self.cancelled {
            if flag.load(Ordering::Acquire) {
                return Err(EmtctError::Cancelled { phase });
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EmtctError::DeadlineExceeded { phase });
            }
        }
        Ok(())
    }
}
