//! Bounded, fixed-delay retry policy shared by navigation and clicks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times an operation is attempted and how long to pause between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

/// One attempt within a policy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub of: u32,
}

impl Attempt {
    pub fn is_last(&self) -> bool {
        self.number >= self.of
    }
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.of)
    }
}

impl RetryPolicy {
    /// Page loads: 3 attempts, 5 s apart.
    pub const NAVIGATION: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay_ms: 5_000,
    };

    /// Row clicks: 3 attempts, 1 s apart.
    pub const CLICK: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay_ms: 1_000,
    };

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Attempts in order. A zero policy still yields one attempt.
    pub fn attempts(&self) -> impl Iterator<Item = Attempt> {
        let of = self.max_attempts.max(1);
        (1..=of).map(move |number| Attempt { number, of })
    }

    /// Sleep the fixed delay unless `attempt` was the last one.
    pub async fn pause_after(&self, attempt: Attempt) {
        if !attempt.is_last() && self.delay_ms > 0 {
            tokio::time::sleep(self.delay()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_bounded() {
        let attempts: Vec<_> = RetryPolicy::NAVIGATION.attempts().collect();
        assert_eq!(attempts.len(), 3);
        assert!(!attempts[0].is_last());
        assert!(attempts[2].is_last());
        assert_eq!(attempts[1].to_string(), "2/3");
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts().count(), 1);
    }

    #[tokio::test]
    async fn no_pause_after_last_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_secs(60));
        let last = policy.attempts().last().unwrap();
        // Would hang for a minute if the delay were applied.
        tokio::time::timeout(Duration::from_millis(100), policy.pause_after(last))
            .await
            .unwrap();
    }
}
