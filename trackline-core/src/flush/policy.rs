//! Retry and drop policy
//!
//! Decision table applied to every record in a flush pass:
//!
//! | Send result          | Condition                      | Disposition  | Store mutation            |
//! |----------------------|--------------------------------|--------------|---------------------------|
//! | success              |                                | `Delivered`  | `remove(id)`              |
//! | failure              | `attempt_count + 1 >= max_tries` | `Exhausted`  | `remove(id)`              |
//! | failure              | otherwise                      | `Retry`      | `update(id, attempt + 1)` |
//! | payload not encodable |                               | `Malformed`  | `remove(id)`, no increment |

use serde::Serialize;

/// What happens to a record after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted by the server
    Delivered,
    /// Failed with attempts remaining; retried on the next pass
    Retry { attempt_count: u32 },
    /// Failed on its last allowed attempt
    Exhausted { attempts: u32 },
    /// Payload could not be encoded; never attempted
    Malformed,
}

/// Attempt budget per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_tries: u32,
}

impl RetryPolicy {
    /// `max_tries` below 1 is treated as 1.
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Disposition of a record that had `attempt_count` prior attempts.
    pub fn decide(&self, attempt_count: u32, delivered: bool) -> Disposition {
        if delivered {
            return Disposition::Delivered;
        }
        let attempts = attempt_count.saturating_add(1);
        if attempts >= self.max_tries {
            Disposition::Exhausted { attempts }
        } else {
            Disposition::Retry {
                attempt_count: attempts,
            }
        }
    }
}

/// Tally of one flush pass, handed to the completion listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    /// Records in the snapshot the pass started from
    pub snapshot: usize,
    /// Send attempts made
    pub attempted: usize,
    pub delivered: usize,
    /// Failed records kept for a later pass
    pub pending: usize,
    pub dropped_exhausted: usize,
    pub dropped_malformed: usize,
    /// Store mutations that failed and were skipped
    pub store_errors: usize,
    /// Pass skipped because the network was unreachable
    pub offline: bool,
}

impl FlushOutcome {
    /// Outcome of a pass that found no connectivity
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    /// Records removed without delivery
    pub fn dropped(&self) -> usize {
        self.dropped_exhausted + self.dropped_malformed
    }

    pub(crate) fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Delivered => {
                self.attempted += 1;
                self.delivered += 1;
            }
            Disposition::Retry { .. } => {
                self.attempted += 1;
                self.pending += 1;
            }
            Disposition::Exhausted { .. } => {
                self.attempted += 1;
                self.dropped_exhausted += 1;
            }
            Disposition::Malformed => {
                self.dropped_malformed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_always_delivered() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.decide(0, true), Disposition::Delivered);
        assert_eq!(policy.decide(2, true), Disposition::Delivered);
    }

    #[test]
    fn test_single_try_drops_on_first_failure() {
        let policy = RetryPolicy::new(1);
        assert_eq!(
            policy.decide(0, false),
            Disposition::Exhausted { attempts: 1 }
        );
    }

    #[test]
    fn test_last_attempt_is_dropped_not_updated() {
        let policy = RetryPolicy::new(10);
        assert_eq!(
            policy.decide(0, false),
            Disposition::Retry { attempt_count: 1 }
        );
        assert_eq!(
            policy.decide(8, false),
            Disposition::Retry { attempt_count: 9 }
        );
        assert_eq!(
            policy.decide(9, false),
            Disposition::Exhausted { attempts: 10 }
        );
    }

    #[test]
    fn test_attempts_never_exceed_budget() {
        for max_tries in 1..6 {
            let policy = RetryPolicy::new(max_tries);
            let mut attempt_count = 0;
            let mut sends = 0;
            loop {
                sends += 1;
                match policy.decide(attempt_count, false) {
                    Disposition::Retry { attempt_count: next } => {
                        assert!(next < max_tries);
                        attempt_count = next;
                    }
                    Disposition::Exhausted { attempts } => {
                        assert_eq!(attempts, max_tries);
                        break;
                    }
                    other => panic!("unexpected disposition {:?}", other),
                }
            }
            assert_eq!(sends, max_tries);
        }
    }

    #[test]
    fn test_zero_max_tries_is_clamped() {
        assert_eq!(RetryPolicy::new(0).max_tries(), 1);
    }

    #[test]
    fn test_outcome_tally() {
        let mut outcome = FlushOutcome::default();
        outcome.record(Disposition::Delivered);
        outcome.record(Disposition::Retry { attempt_count: 1 });
        outcome.record(Disposition::Exhausted { attempts: 3 });
        outcome.record(Disposition::Malformed);

        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.pending, 1);
        assert_eq!(outcome.dropped(), 2);
        assert!(!outcome.offline);
        assert!(FlushOutcome::offline().offline);
        assert_eq!(FlushOutcome::offline().attempted, 0);
    }
}
