/// Probing engine - produces one result per probe tick and target
///
/// This module is responsible for:
/// - Sending ICMP echo probes
/// - Resolving target names and arbitrating between multiple addresses
/// - Scheduling probes and DNS refreshes per target
/// - Locating and tracking the next hop
pub mod checker;
pub mod hop;
pub mod resolver;
pub mod scheduler;
pub mod types;

pub use checker::{IcmpProber, Prober};
pub use hop::{HopDiscovery, HopSettings, HopTracker, TracerouteDiscovery};
pub use resolver::{Resolver, SystemLookup};
pub use scheduler::TargetScheduler;
pub use types::{ProbeResult, Target};
