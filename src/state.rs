use std::time::Duration;

use crate::config::Config;
use crate::registry::Registry;
use crate::ws::broadcast::Broadcaster;

/// Per-connection transport limits, derived from `Config`.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Frames that may wait in one connection's outbound queue before it is
    /// considered stalled and evicted.
    pub outbound_queue_capacity: usize,
    /// Upper bound for a single socket write.
    pub write_timeout: Duration,
    /// Server ping period; `None` disables keepalive.
    pub ping_interval: Option<Duration>,
    /// How long to wait for a pong after each ping.
    pub pong_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            outbound_queue_capacity: config.outbound_queue_capacity.max(1),
            write_timeout: Duration::from_millis(config.write_timeout_ms.max(1)),
            ping_interval: (config.ping_interval_secs > 0)
                .then(|| Duration::from_secs(config.ping_interval_secs)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared application state passed to all handlers via axum State extractor.
/// Each server instance owns its own registry.
#[derive(Clone)]
pub struct AppState {
    /// Connected participants
    pub registry: Registry,
    /// Fan-out over `registry`
    pub broadcaster: Broadcaster,
    pub settings: ConnectionSettings,
}

impl AppState {
    pub fn new(settings: ConnectionSettings) -> Self {
        let registry = Registry::new();
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ping_interval_disables_keepalive() {
        let config = Config {
            ping_interval_secs: 0,
            ..Config::default()
        };
        assert!(ConnectionSettings::from_config(&config).ping_interval.is_none());
    }

    #[test]
    fn test_queue_capacity_is_at_least_one() {
        let config = Config {
            outbound_queue_capacity: 0,
            ..Config::default()
        };
        assert_eq!(ConnectionSettings::from_config(&config).outbound_queue_capacity, 1);
    }

    #[test]
    fn test_broadcaster_shares_state_registry() {
        let state = AppState::new(ConnectionSettings::default());
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let id = crate::registry::ConnectionId::new();
        state
            .registry
            .register(id, tx, tokio_util::sync::CancellationToken::new())
            .unwrap();
        assert!(state.broadcaster.registry().contains(&id));
    }
}
