//! Failure classification and the bounded linear retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default base delay between reconnect attempts.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// What went wrong with an established transport.
#[derive(Debug, Clone)]
pub enum FailureKind {
    /// The peer connection degraded to failed/disconnected.
    PeerDegraded(String),
    /// The control channel reported an error.
    ChannelError(String),
    /// The control channel closed while the session was connected.
    ChannelClosed,
    /// A send operation failed while the session claimed to be connected.
    SendFailed(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::PeerDegraded(state) => {
                write!(f, "peer connection degraded to {state}")
            }
            FailureKind::ChannelError(msg) => write!(f, "control channel error: {msg}"),
            FailureKind::ChannelClosed => write!(f, "control channel closed unexpectedly"),
            FailureKind::SendFailed(msg) => write!(f, "send failed while connected: {msg}"),
        }
    }
}

/// Bounded reconnection policy with linearly increasing delay.
///
/// The delay for attempt `n` is `n * base_delay`; growth is linear, not
/// exponential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum number of scheduled reconnect attempts per connect cycle.
    pub max_attempts: u32,
    /// Base delay multiplied by the attempt number.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with the given attempt budget and the default base delay.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Whether another attempt may be scheduled when `attempts` have
    /// already been used.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the given attempt number (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delay() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = ReconnectPolicy::with_max_attempts(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));

        let none = ReconnectPolicy::with_max_attempts(0);
        assert!(!none.should_retry(0));
    }

    #[test]
    fn test_failure_kind_display() {
        assert!(
            FailureKind::PeerDegraded("failed".to_string())
                .to_string()
                .contains("degraded to failed")
        );
        assert!(
            FailureKind::ChannelClosed
                .to_string()
                .contains("closed unexpectedly")
        );
    }
}
