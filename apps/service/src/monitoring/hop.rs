//! Next-hop tracking.
//!
//! The intermediate router is located once at startup by tracing the path to a well-known
//! destination. From then on it is probed like any other target, tagged as next hop.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trippy_core::{Builder, ProbeStatus, Protocol, Round};

use super::checker::Prober;
use super::resolver::Resolver;
use super::scheduler::TargetScheduler;
use super::types::{ProbeResult, Target};

#[derive(Error, Debug)]
pub enum HopError {
    #[error("path trace failed: {0}")]
    Trace(String),

    #[error("hop {hop} is out of range, path has {available} hops")]
    OutOfRange { hop: u8, available: usize },

    #[error("hop {0} did not answer")]
    Silent(u8),
}

/// Path discovery towards a destination
#[async_trait::async_trait]
pub trait HopDiscovery: Send + Sync {
    /// Ordered hop addresses, first hop first; `None` for hops that did not answer
    async fn discover(&self, destination: IpAddr, max_hops: u8, retries: u8)
    -> Result<Vec<Option<IpAddr>>, HopError>;
}

/// Responding address per TTL, sized to the hop limit up front
#[derive(Debug, Clone, PartialEq)]
pub struct HopTable {
    hops: Vec<Option<IpAddr>>,
}

impl HopTable {
    pub fn new(max_hops: u8) -> Self {
        Self { hops: vec![None; usize::from(max_hops)] }
    }

    /// Keep the first responder seen for `ttl`; TTLs outside `1..=max_hops` are ignored
    pub fn record(&mut self, ttl: u8, host: IpAddr) {
        let Some(slot) = usize::from(ttl).checked_sub(1).and_then(|index| self.hops.get_mut(index)) else {
            return;
        };
        slot.get_or_insert(host);
    }

    pub fn record_round(&mut self, round: &Round<'_>) {
        for probe in round.probes {
            if let ProbeStatus::Complete(complete) = probe {
                self.record(complete.ttl.0, complete.host);
            }
        }
    }

    /// Hops up to the furthest one that answered
    pub fn into_hops(mut self) -> Vec<Option<IpAddr>> {
        while matches!(self.hops.last(), Some(None)) {
            self.hops.pop();
        }
        self.hops
    }
}

/// ICMP path discovery with trippy's tracer.
///
/// Raw ICMP sockets need the same privileges as the echo prober.
#[derive(Default)]
pub struct TracerouteDiscovery;

impl TracerouteDiscovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl HopDiscovery for TracerouteDiscovery {
    async fn discover(
        &self,
        destination: IpAddr,
        max_hops: u8,
        retries: u8,
    ) -> Result<Vec<Option<IpAddr>>, HopError> {
        let table = Arc::new(Mutex::new(HopTable::new(max_hops)));
        let recorder = table.clone();
        let rounds = usize::from(retries.max(1));

        tokio::task::spawn_blocking(move || {
            Builder::new(destination)
                .protocol(Protocol::Icmp)
                .max_ttl(max_hops)
                .max_rounds(Some(rounds))
                .build()?
                .run_with(move |round: &Round<'_>| {
                    recorder.lock().unwrap_or_else(PoisonError::into_inner).record_round(round);
                })
        })
        .await
        .map_err(|e| HopError::Trace(e.to_string()))?
        .map_err(|e| HopError::Trace(e.to_string()))?;

        let hops = table.lock().unwrap_or_else(PoisonError::into_inner).clone().into_hops();
        debug!(%destination, rounds, hops = hops.len(), "Path trace finished");
        Ok(hops)
    }
}

/// Pick the 1-based `hop` from a discovered path
pub fn select_hop(hops: &[Option<IpAddr>], hop: u8) -> Result<IpAddr, HopError> {
    let index = usize::from(hop).checked_sub(1).ok_or(HopError::OutOfRange { hop, available: hops.len() })?;
    match hops.get(index) {
        Some(Some(address)) => Ok(*address),
        Some(None) => Err(HopError::Silent(hop)),
        None => Err(HopError::OutOfRange { hop, available: hops.len() }),
    }
}

#[derive(Debug, Clone)]
pub struct HopSettings {
    /// 1-based position of the tracked hop
    pub hop: u8,
    pub interval: Duration,
    pub destination: IpAddr,
    pub retries: u8,
    pub dns_refresh: Duration,
}

pub struct HopTracker {
    settings: HopSettings,
    discovery: Arc<dyn HopDiscovery>,
    resolver: Arc<Resolver>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    result_tx: mpsc::Sender<ProbeResult>,
}

impl HopTracker {
    pub fn new(
        settings: HopSettings,
        discovery: Arc<dyn HopDiscovery>,
        resolver: Arc<Resolver>,
        prober: Arc<dyn Prober>,
        probe_timeout: Duration,
        result_tx: mpsc::Sender<ProbeResult>,
    ) -> Self {
        Self { settings, discovery, resolver, prober, probe_timeout, result_tx }
    }

    /// Address of the configured hop
    pub async fn locate(&self) -> Result<IpAddr, HopError> {
        let hops = self
            .discovery
            .discover(self.settings.destination, self.settings.hop, self.settings.retries)
            .await?;
        select_hop(&hops, self.settings.hop)
    }

    /// Locate the hop, then probe it until cancelled.
    ///
    /// When the hop cannot be located the tracker stays idle until shutdown, so a missing hop
    /// never stops the other units.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let located = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            located = self.locate() => located,
        };

        let address = match located {
            Ok(address) => address,
            Err(e) => {
                warn!(
                    hop = self.settings.hop,
                    destination = %self.settings.destination,
                    "Next-hop tracking disabled: {}", e
                );
                cancel.cancelled().await;
                return Ok(());
            }
        };

        info!(hop = self.settings.hop, %address, "Tracking next hop");
        let target =
            Target::new(address.to_string(), self.settings.interval, self.settings.dns_refresh).next_hop();

        TargetScheduler::new(target, self.resolver, self.prober, self.probe_timeout, self.result_tx)
            .with_address(address)
            .run(cancel)
            .await
    }
}
