use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use super::types::DetectionMode;

pub const DEFAULT_PORT: u16 = 7777;

const PROBE_INTERVAL: Duration = Duration::from_secs(2);
const DETECTOR_TICK: Duration = Duration::from_secs(1);
const GOSSIP_INTERVAL: Duration = Duration::from_secs(3);
const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT_TICKS: u32 = 5;
const SUSPICION_TIMEOUT_TICKS: u32 = 10;
const GOSSIP_FANOUT: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("gossip fanout must be at least 1")]
    ZeroFanout,

    #[error("probe timeout must be at least one tick")]
    ZeroProbeTimeout,

    #[error(
        "suspicion timeout ({suspicion} ticks) must be longer than the probe timeout ({probe} ticks)"
    )]
    SuspicionNotLonger { probe: u32, suspicion: u32 },
}

/// Timing and addressing of one membership node.
///
/// Timeouts are counted in detector ticks, so a probe timeout of 5 with a
/// 1s tick gives a peer five seconds to answer.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub bind_addr: SocketAddr,
    /// Address announced to peers when it differs from the bound one
    /// (e.g. binding `0.0.0.0`).
    pub advertise_addr: Option<SocketAddr>,
    pub probe_interval: Duration,
    pub detector_tick: Duration,
    pub probe_timeout_ticks: u32,
    pub suspicion_timeout_ticks: u32,
    pub gossip_interval: Duration,
    pub gossip_fanout: usize,
    /// Upper bound on a single socket read so the receive loop notices shutdown.
    pub recv_timeout: Duration,
    pub detection: DetectionMode,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            advertise_addr: None,
            probe_interval: PROBE_INTERVAL,
            detector_tick: DETECTOR_TICK,
            probe_timeout_ticks: PROBE_TIMEOUT_TICKS,
            suspicion_timeout_ticks: SUSPICION_TIMEOUT_TICKS,
            gossip_interval: GOSSIP_INTERVAL,
            gossip_fanout: GOSSIP_FANOUT,
            recv_timeout: RECV_TIMEOUT,
            detection: DetectionMode::DirectFail,
        }
    }
}

impl MembershipConfig {
    pub fn with_bind(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("probe interval", self.probe_interval),
            ("detector tick", self.detector_tick),
            ("gossip interval", self.gossip_interval),
            ("receive timeout", self.recv_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::ZeroInterval(*name));
        }

        if self.gossip_fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }

        if self.probe_timeout_ticks == 0 {
            return Err(ConfigError::ZeroProbeTimeout);
        }

        if self.suspicion_timeout_ticks <= self.probe_timeout_ticks {
            return Err(ConfigError::SuspicionNotLonger {
                probe: self.probe_timeout_ticks,
                suspicion: self.suspicion_timeout_ticks,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MembershipConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.gossip_fanout, 3);
        assert_eq!(config.detection, DetectionMode::DirectFail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_suspicion_must_outlast_probe() {
        let config = MembershipConfig {
            probe_timeout_ticks: 5,
            suspicion_timeout_ticks: 5,
            ..MembershipConfig::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::SuspicionNotLonger {
                probe: 5,
                suspicion: 5
            })
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = MembershipConfig {
            gossip_interval: Duration::ZERO,
            ..MembershipConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("gossip interval"))
        );

        let config = MembershipConfig {
            gossip_fanout: 0,
            ..MembershipConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroFanout));

        let config = MembershipConfig {
            probe_timeout_ticks: 0,
            ..MembershipConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroProbeTimeout));
    }
}
