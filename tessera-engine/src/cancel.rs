use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a command handle and the
/// running command body.
///
/// Cancelling never interrupts a body; the body polls [`check`] at points
/// where stopping is safe. The engine also checks before the body starts
/// and before committing, so a command cancelled at any point before commit
/// leaves the model unchanged.
///
/// [`check`]: CancellationToken::check
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] after [`CancellationToken::cancel`].
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
