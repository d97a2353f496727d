//! Configuration for the session core.

use std::time::Duration;

/// Tunables for one control-plane session.
///
/// The defaults are the production values; tests shrink the durations to
/// milliseconds to keep the suite fast.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cluster this agent is registered to.
    pub cluster: String,
    /// Container runtime socket path, included in the `NO_PROXY` default.
    pub docker_endpoint: String,
    /// Accept TLS certificates that fail verification.
    pub accept_insecure_cert: bool,
    /// Inactivity window: the connection is force-closed when no inbound
    /// frame arrives within this window (plus jitter).
    pub heartbeat_timeout: Duration,
    pub heartbeat_jitter: Duration,
    /// Maximum connection age before a deliberate rotation.
    pub connection_time: Duration,
    pub connection_jitter: Duration,
    /// Reconnect delay applied after the control endpoint reports the
    /// instance as deregistered.
    pub inactive_instance_reconnect_delay: Duration,
    pub backoff: BackoffConfig,
}

/// Parameters for the exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub min: Duration,
    pub max: Duration,
    /// Proportional jitter added to each delay (0.2 = up to +20%).
    pub jitter: f64,
    pub multiplier: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cluster: "default".to_string(),
            docker_endpoint: "/var/run/docker.sock".to_string(),
            accept_insecure_cert: false,
            heartbeat_timeout: Duration::from_secs(60),
            heartbeat_jitter: Duration::from_secs(20),
            connection_time: Duration::from_secs(15 * 60),
            connection_jitter: Duration::from_secs(30 * 60),
            inactive_instance_reconnect_delay: Duration::from_secs(60 * 60),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_secs(2 * 60),
            jitter: 0.2,
            multiplier: 1.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tunables() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.connection_time, Duration::from_secs(900));
        assert_eq!(
            config.inactive_instance_reconnect_delay,
            Duration::from_secs(3600)
        );
        assert_eq!(config.backoff.min, Duration::from_millis(250));
        assert_eq!(config.backoff.max, Duration::from_secs(120));
    }
}
