use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checker::Prober;
use super::resolver::Resolver;
use super::types::{ProbeResult, Target};

/// Drives one target: probes on its own interval and refreshes its address on another.
///
/// The resolved address lives only here. Probing and refreshing are steps of the same loop, so
/// nothing else ever reads or writes it.
pub struct TargetScheduler {
    target: Target,
    resolver: Arc<Resolver>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    result_tx: mpsc::Sender<ProbeResult>,
    address: Option<IpAddr>,
}

impl TargetScheduler {
    pub fn new(
        target: Target,
        resolver: Arc<Resolver>,
        prober: Arc<dyn Prober>,
        probe_timeout: Duration,
        result_tx: mpsc::Sender<ProbeResult>,
    ) -> Self {
        Self { target, resolver, prober, probe_timeout, result_tx, address: None }
    }

    /// Start from a known address instead of resolving the name first
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Run until `cancel` fires or the result channel closes
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            host = %self.target.name,
            next_hop = self.target.is_next_hop,
            "Scheduling probes every {:?}, DNS refresh every {:?}",
            self.target.probe_interval,
            self.target.dns_refresh_interval
        );

        if self.address.is_none() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.refresh() => {}
            }
        }

        let mut probe_timer = interval(self.target.probe_interval);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let refresh_period = self.target.dns_refresh_interval;
        let mut refresh_timer = interval_at(Instant::now() + refresh_period, refresh_period);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = refresh_timer.tick() => self.refresh().await,
                _ = probe_timer.tick() => {
                    let result = self.probe_once().await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = self.result_tx.send(result) => {
                            if sent.is_err() {
                                return Err(anyhow!("result channel closed for {}", self.target.name));
                            }
                        }
                    }
                }
            }
        }

        debug!(host = %self.target.name, "Scheduler stopped");
        Ok(())
    }

    /// Re-resolve the target; a failure keeps the last known address
    async fn refresh(&mut self) {
        match self.resolver.resolve(&self.target.name).await {
            Ok(address) => {
                if self.address != Some(address) {
                    info!(host = %self.target.name, %address, previous = ?self.address, "Resolved address changed");
                }
                self.address = Some(address);
            }
            Err(e) => {
                warn!(host = %self.target.name, kept = ?self.address, "DNS refresh failed: {}", e);
            }
        }
    }

    async fn probe_once(&mut self) -> ProbeResult {
        let result = ProbeResult::new(self.target.name.clone(), self.target.is_next_hop);

        if self.address.is_none() {
            self.refresh().await;
        }
        let Some(address) = self.address else {
            debug!(host = %self.target.name, "No address known, recording as unreachable");
            return result;
        };

        let result = result.with_address(address);
        match self.prober.probe(address, self.probe_timeout).await {
            Ok(Some(rtt)) => result.reply(rtt),
            Ok(None) => result,
            Err(e) => {
                warn!(host = %self.target.name, %address, "Probe failed: {}", e);
                result
            }
        }
    }
}
