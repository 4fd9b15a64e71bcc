//! Retransmission parameters supplied once per session.

use std::time::Duration;

use super::constants;
use super::error::ConfigError;

/// Static transmission parameters for one peer session.
///
/// The defaults are the CoAP transmission parameters plus the reconnection
/// bounds used by LWM2M clients. All of them are overridable, either by
/// setting the fields directly or through [`ParametersBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetransmissionParameters {
    /// Base timeout before the first retransmission.
    pub ack_timeout: Duration,

    /// Upper multiplier of each randomized interval (>= 1.0).
    pub ack_random_factor: f64,

    /// Retransmissions of a confirmable message before it times out.
    pub max_retransmit: u32,

    /// Failed reconnect attempts tolerated before automatic retries stop.
    pub max_icmp_failures: u32,

    /// Wait for the first DTLS handshake flight.
    pub dtls_retry_wait_min: Duration,

    /// Longest wait for a DTLS handshake flight.
    pub dtls_retry_wait_max: Duration,

    /// Send notifications as confirmable messages.
    pub confirmable_notifications: bool,
}

impl Default for RetransmissionParameters {
    fn default() -> Self {
        Self {
            ack_timeout: constants::ACK_TIMEOUT,
            ack_random_factor: constants::ACK_RANDOM_FACTOR,
            max_retransmit: constants::MAX_RETRANSMIT,
            max_icmp_failures: constants::MAX_ICMP_FAILURES,
            dtls_retry_wait_min: constants::DTLS_RETRY_WAIT_MIN,
            dtls_retry_wait_max: constants::DTLS_RETRY_WAIT_MAX,
            confirmable_notifications: constants::CONFIRMABLE_NOTIFICATIONS,
        }
    }
}

impl RetransmissionParameters {
    /// Check the parameters for values the state machines cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::ZeroAckTimeout);
        }
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            return Err(ConfigError::AckRandomFactor(self.ack_random_factor));
        }
        if self.dtls_retry_wait_min.is_zero() || self.dtls_retry_wait_max.is_zero() {
            return Err(ConfigError::ZeroDtlsWait);
        }
        if self.dtls_retry_wait_min > self.dtls_retry_wait_max {
            return Err(ConfigError::DtlsWaitWindow {
                min_ms: self.dtls_retry_wait_min.as_millis(),
                max_ms: self.dtls_retry_wait_max.as_millis(),
            });
        }
        Ok(())
    }

    /// Start a builder from the defaults.
    pub fn builder() -> ParametersBuilder {
        ParametersBuilder::new()
    }
}

/// Builder for [`RetransmissionParameters`].
#[derive(Debug, Clone, Default)]
pub struct ParametersBuilder {
    params: RetransmissionParameters,
}

impl ParametersBuilder {
    /// Create a builder holding the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base ACK timeout.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.params.ack_timeout = timeout;
        self
    }

    /// Set the ACK random factor.
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.params.ack_random_factor = factor;
        self
    }

    /// Set the number of retransmissions before a timeout.
    pub fn max_retransmit(mut self, count: u32) -> Self {
        self.params.max_retransmit = count;
        self
    }

    /// Set the bound on failed reconnect attempts.
    pub fn max_icmp_failures(mut self, count: u32) -> Self {
        self.params.max_icmp_failures = count;
        self
    }

    /// Set the DTLS handshake flight wait window.
    pub fn dtls_retry_wait(mut self, min: Duration, max: Duration) -> Self {
        self.params.dtls_retry_wait_min = min;
        self.params.dtls_retry_wait_max = max;
        self
    }

    /// Send notifications as confirmable messages.
    pub fn confirmable_notifications(mut self, enabled: bool) -> Self {
        self.params.confirmable_notifications = enabled;
        self
    }

    /// Validate and return the parameters.
    pub fn build(self) -> Result<RetransmissionParameters, ConfigError> {
        self.params.validate()?;
        Ok(self.params)
    }
}
