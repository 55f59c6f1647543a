use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, SharkError};

/// Cooperative cancellation + deadline token for long-running operations.
///
/// The sync engine checks it between files and between batches; bulk
/// repository operations check it between scope items. Cloned tokens share
/// the same cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Token that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    /// Token that fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation from another clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Suspension-point check: Err(Cancelled) or Err(Timeout) when the token
    /// has fired, Ok otherwise.
    pub fn checkpoint(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(SharkError::Cancelled);
        }
        if self.deadline_exceeded() {
            return Err(SharkError::Timeout(what.to_string()));
        }
        Ok(())
    }
}
