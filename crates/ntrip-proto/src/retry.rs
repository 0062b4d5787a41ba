//! Reconnection gating: retry windows and the lockout budget.

/// What the session should do on a pass through the disconnected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The retry window since the last attempt has not elapsed.
    Wait,
    /// The failure budget is spent; stop attempting until reset.
    LockOut,
    /// Attempt a connection now.
    Attempt,
}

/// Decide whether to wait, lock out, or attempt.
///
/// A `last_attempt_ms` of 0 means "no prior attempt" and opens the window
/// unconditionally; a forced reconnect clears the stamp to 0 for exactly
/// this reason. The window check runs before the budget check, so a session
/// whose budget just ran out still finishes waiting out its final window
/// before the lockout is declared.
pub fn retry_gate(
    failures: u32,
    max_tries: u32,
    now_ms: u64,
    last_attempt_ms: u64,
    retry_delay_ms: u64,
) -> RetryDecision {
    if last_attempt_ms != 0 && now_ms.saturating_sub(last_attempt_ms) < retry_delay_ms {
        return RetryDecision::Wait;
    }
    if failures >= max_tries {
        return RetryDecision::LockOut;
    }
    RetryDecision::Attempt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_immediate() {
        assert_eq!(retry_gate(0, 3, 5_000, 0, 30_000), RetryDecision::Attempt);
    }

    #[test]
    fn window_open_after_delay() {
        assert_eq!(retry_gate(1, 3, 40_000, 10_000, 30_000), RetryDecision::Attempt);
    }

    #[test]
    fn window_closed_within_delay() {
        assert_eq!(retry_gate(1, 3, 20_000, 10_000, 30_000), RetryDecision::Wait);
        // Boundary: exactly at the window edge the wait is over.
        assert_eq!(retry_gate(1, 3, 40_000, 10_000, 30_000), RetryDecision::Attempt);
        assert_eq!(retry_gate(1, 3, 39_999, 10_000, 30_000), RetryDecision::Wait);
    }

    #[test]
    fn budget_exhaustion_locks_out() {
        assert_eq!(retry_gate(3, 3, 50_000, 10_000, 30_000), RetryDecision::LockOut);
        assert_eq!(retry_gate(4, 3, 50_000, 10_000, 30_000), RetryDecision::LockOut);
    }

    #[test]
    fn window_is_checked_before_budget() {
        // Budget spent but the last window still running: wait, not lockout.
        assert_eq!(retry_gate(3, 3, 20_000, 10_000, 30_000), RetryDecision::Wait);
    }

    #[test]
    fn cleared_stamp_forces_attempt_despite_delay() {
        // reconnect() zeroes the stamp; even a long delay cannot hold it.
        assert_eq!(retry_gate(1, 3, 100, 0, 30_000), RetryDecision::Attempt);
    }

    #[test]
    fn zero_delay_never_waits() {
        assert_eq!(retry_gate(1, 3, 10_000, 10_000, 0), RetryDecision::Attempt);
    }
}
