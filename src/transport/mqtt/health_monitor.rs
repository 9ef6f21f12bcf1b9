//! Pure reconnection decision logic for the rumqttc engine

use super::connection::ReconnectConfig;

/// Outcome of a reconnection check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Sleep `delay_ms`, then poll the event loop again
    Proceed { attempt: u32, delay_ms: u64 },
    /// Automatic reconnection is switched off
    AbortDisabled,
    /// Stop was requested while the connection was down
    AbortShutdownRequested,
    /// Configured attempt limit reached
    AbortMaxAttemptsExceeded,
}

/// Reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether another reconnection attempt should be made (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        auto_reconnect: bool,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if !auto_reconnect {
            return ReconnectionDecision::AbortDisabled;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: config.calculate_backoff_delay(current_attempts + 1),
        }
    }
}
