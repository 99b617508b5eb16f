use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;

/// A host monitored on its own schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or literal address, as configured
    pub name: String,

    /// Time between two probes
    pub probe_interval: Duration,

    /// Time between two DNS refresh cycles
    pub dns_refresh_interval: Duration,

    /// Whether this target is the tracked intermediate hop
    pub is_next_hop: bool,
}

impl Target {
    pub fn new(name: impl Into<String>, probe_interval: Duration, dns_refresh_interval: Duration) -> Self {
        Self { name: name.into(), probe_interval, dns_refresh_interval, is_next_hop: false }
    }

    /// Tag the target as the tracked next hop
    pub fn next_hop(mut self) -> Self {
        self.is_next_hop = true;
        self
    }
}

/// Outcome of one probe, as handed to the result sink
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Name of the target that was probed
    pub target: String,

    /// Address that was probed; `None` when no probe could be attempted
    pub address: Option<IpAddr>,

    /// Round-trip time; `None` means the target did not answer
    pub rtt: Option<Duration>,

    /// Whether the result belongs to the tracked next hop
    pub next_hop: bool,

    /// When the probe was issued
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// Create an unreachable result with no address
    pub fn new(target: impl Into<String>, next_hop: bool) -> Self {
        Self { target: target.into(), address: None, rtt: None, next_hop, timestamp: Utc::now() }
    }

    /// Record the address the probe was sent to
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Record a reply
    pub fn reply(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }

    /// Round-trip time in fractional seconds
    pub fn rtt_seconds(&self) -> Option<f64> {
        self.rtt.map(|rtt| rtt.as_secs_f64())
    }

    pub fn is_reachable(&self) -> bool {
        self.rtt.is_some()
    }
}
