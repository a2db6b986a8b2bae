//! Cooperative cancellation for long-running searches

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a search stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TimeBudget,
    Cancelled,
}

/// Deadline plus external stop flag, polled at every recursive entry
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    deadline: Option<Instant>,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// Token that never fires
    pub fn never() -> Self {
        Self::default()
    }

    /// Fire once `budget` has elapsed from now
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fire when the shared flag is set
    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn flag_set(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Check whether the search must stop
    ///
    /// An external cancel wins over an expired deadline.
    pub fn check(&self) -> Option<StopReason> {
        if self.flag_set() {
            Some(StopReason::Cancelled)
        } else if self.past_deadline() {
            Some(StopReason::TimeBudget)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_fires() {
        assert_eq!(CancelToken::never().check(), None);
    }

    #[test]
    fn test_expired_deadline() {
        let token = CancelToken::never().with_deadline(Instant::now());
        assert_eq!(token.check(), Some(StopReason::TimeBudget));

        let token = CancelToken::never().with_budget(Duration::from_secs(3600));
        assert_eq!(token.check(), None);
    }

    #[test]
    fn test_flag_wins() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancelToken::never()
            .with_deadline(Instant::now())
            .with_flag(flag.clone());
        assert_eq!(token.check(), Some(StopReason::TimeBudget));

        flag.store(true, Ordering::Relaxed);
        assert_eq!(token.check(), Some(StopReason::Cancelled));
    }
}
