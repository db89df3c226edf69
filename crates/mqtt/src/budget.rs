//! Bounded retry budget for connection attempts.
//!
//! Unlike a backoff schedule, the budget never resets: it is created once per
//! process and every `connect()` call that gets past the exhaustion check
//! consumes one attempt, whether it succeeds or not. Once exhausted the
//! persistent transport is abandoned for the rest of the run.
//!
//! ```ignore
//! let budget = RetryBudget::new(3);
//! assert_eq!(budget.try_consume()?, 1);
//! assert_eq!(budget.remaining(), 2);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use super::error::TransferError;

#[derive(Debug)]
pub struct RetryBudget {
    attempts: AtomicU32,
    max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            max_attempts,
        }
    }

    /// Takes one attempt from the budget.
    ///
    /// Returns the 1-based number of the attempt just taken, or
    /// `RetryBudgetExhausted` without touching the counter.
    pub fn try_consume(&self) -> Result<u32, TransferError> {
        self.attempts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_attempts).then_some(current + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| TransferError::RetryBudgetExhausted(self.max_attempts))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts())
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts() >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_exhausted() {
        let budget = RetryBudget::new(3);
        assert_eq!(budget.try_consume().unwrap(), 1);
        assert_eq!(budget.try_consume().unwrap(), 2);
        assert!(!budget.is_exhausted());
        assert_eq!(budget.try_consume().unwrap(), 3);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_exhausted_budget_does_not_count() {
        let budget = RetryBudget::new(1);
        budget.try_consume().unwrap();

        let err = budget.try_consume().unwrap_err();
        assert!(matches!(err, TransferError::RetryBudgetExhausted(1)));
        assert_eq!(budget.attempts(), 1);
    }

    #[test]
    fn test_concurrent_consumers_never_overshoot() {
        let budget = std::sync::Arc::new(RetryBudget::new(5));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || budget.try_consume().is_ok())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 5);
        assert_eq!(budget.attempts(), 5);
    }
}
