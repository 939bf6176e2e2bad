//! Cooperative cancellation.

use crate::error::{WcError, WcResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag polled at path boundaries.
///
/// Long-running walks call [`Canceller::check`] before each directory
/// entry or file merge; a raised flag unwinds as
/// [`WcError::Cancelled`] through every scoped resource on the way out.
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
}

impl Canceller {
    /// Creates an unraised canceller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Safe to call from another thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// True once [`Canceller::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns [`WcError::Cancelled`] once the flag is raised.
    pub fn check(&self) -> WcResult<()> {
        if self.is_cancelled() {
            Err(WcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_until_cancelled() {
        let canceller = Canceller::new();
        assert!(canceller.check().is_ok());
        canceller.cancel();
        assert!(matches!(canceller.check(), Err(WcError::Cancelled)));
        // Clones observe the same flag.
        assert!(canceller.clone().is_cancelled());
    }
}
