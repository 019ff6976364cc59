use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Tunables for the hub and every connection it owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bounded per-connection outbound queue. A full queue evicts the connection.
    pub outbound_queue_capacity: usize,
    /// Shared queue from all readers into the hub loop.
    pub inbound_queue_capacity: usize,
    /// Largest inbound text frame accepted; larger frames terminate the connection.
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed only by a pong.
    pub pong_wait_ms: u64,
    /// Ping cadence. Must be shorter than `pong_wait_ms`.
    pub ping_interval_ms: u64,
    /// Upper bound on a single transport write.
    pub write_wait_ms: u64,
    /// How long connection tasks get to finish on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            inbound_queue_capacity: 1024,
            max_frame_bytes: 512,
            pong_wait_ms: 60_000,
            ping_interval_ms: 54_000,
            write_wait_ms: 10_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl HubConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        let zero = [
            ("outbound_queue_capacity", self.outbound_queue_capacity as u64),
            ("inbound_queue_capacity", self.inbound_queue_capacity as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
            ("pong_wait_ms", self.pong_wait_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("write_wait_ms", self.write_wait_ms),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        if let Some((field, _)) = zero {
            return Err(HubError::InvalidConfig(format!("{field} must be greater than zero")));
        }
        if self.ping_interval_ms >= self.pong_wait_ms {
            return Err(HubError::InvalidConfig(format!(
                "ping_interval_ms ({}) must be shorter than pong_wait_ms ({})",
                self.ping_interval_ms, self.pong_wait_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = HubConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ping_interval(), Duration::from_secs(54));
        assert_eq!(cfg.pong_wait(), Duration::from_secs(60));
    }

    #[test]
    fn ping_must_be_shorter_than_pong_wait() {
        let cfg = HubConfig {
            ping_interval_ms: 60_000,
            ..HubConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(HubError::InvalidConfig(_))));
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = HubConfig {
            outbound_queue_capacity: 0,
            ..HubConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("outbound_queue_capacity"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: HubConfig = serde_json::from_str(r#"{"max_frame_bytes": 4096}"#).unwrap();
        assert_eq!(cfg.max_frame_bytes, 4096);
        assert_eq!(cfg.outbound_queue_capacity, 256);
    }
}
