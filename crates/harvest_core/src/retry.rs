use std::time::Duration;

/// How the scheduler treats a failed attempt, independent of where the
/// failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The session is no longer accepted. Nothing else can succeed.
    Halt,
    /// Throttled by the platform; wait longer than the base delay.
    Throttled,
    /// Network hiccup or server error.
    Transient,
    /// The resource is gone or the request is refused for good.
    Permanent,
    /// The response could not be interpreted.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Halt,
    RetryAfter(Duration),
    GiveUp,
    RecordPermanent,
    SkipMalformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Inter-request delay; every retry waits strictly longer.
    pub base_delay: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Wait before the attempt following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        scaled
            .max(self.min_backoff)
            .min(self.max_backoff)
            .max(self.base_delay + Duration::from_millis(1))
    }

    pub fn decide(&self, class: FailureClass, attempt: u32) -> Decision {
        match class {
            FailureClass::Halt => Decision::Halt,
            FailureClass::Permanent => Decision::RecordPermanent,
            FailureClass::Malformed => Decision::SkipMalformed,
            FailureClass::Throttled | FailureClass::Transient => {
                if attempt < self.max_attempts.max(1) {
                    Decision::RetryAfter(self.backoff(attempt))
                } else {
                    Decision::GiveUp
                }
            }
        }
    }
}
