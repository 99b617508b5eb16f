/// Orchestrator module - supervises every unit of the monitor
///
/// The supervisor owns the result channel and the root cancellation token. It
/// spawns the result sink, one scheduler per target and the hop tracker, then
/// waits. The first unit to stop, for whatever reason, cancels the others.


use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::monitoring::{HopDiscovery, HopSettings, HopTracker, ProbeResult, Prober, Resolver, Target, TargetScheduler};

type SinkFactory = Box<dyn FnOnce(mpsc::Receiver<ProbeResult>, CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

pub struct Supervisor {
    targets: Vec<Target>,
    hop: Option<(HopSettings, Arc<dyn HopDiscovery>)>,
    resolver: Arc<Resolver>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    grace_period: Duration,
    sink: SinkFactory,
}

impl Supervisor {
    /// `sink` is started with the receiving end of the result channel
    pub fn new<F, Fut>(resolver: Arc<Resolver>, prober: Arc<dyn Prober>, probe_timeout: Duration, sink: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<ProbeResult>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            targets: Vec::new(),
            hop: None,
            resolver,
            prober,
            probe_timeout,
            grace_period: Duration::from_secs(10),
            sink: Box::new(move |results, cancel| Box::pin(sink(results, cancel))),
        }
    }

    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_hop(mut self, settings: HopSettings, discovery: Arc<dyn HopDiscovery>) -> Self {
        self.hop = Some((settings, discovery));
        self
    }

    /// How long units get to stop after cancellation before they are aborted
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run every unit until one stops or `cancel` fires.
    ///
    /// Returns the first error or panic reported by any unit, once all of
    /// them have exited.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(1);
        let mut units: JoinSet<Result<()>> = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();

        let handle = units.spawn((self.sink)(result_rx, cancel.clone()));
        names.insert(handle.id(), "result sink".to_string());

        for target in self.targets {
            let name = format!("scheduler {}", target.name);
            let scheduler = TargetScheduler::new(
                target,
                self.resolver.clone(),
                self.prober.clone(),
                self.probe_timeout,
                result_tx.clone(),
            );
            let handle = units.spawn(scheduler.run(cancel.clone()));
            names.insert(handle.id(), name);
        }

        if let Some((settings, discovery)) = self.hop {
            let tracker = HopTracker::new(
                settings,
                discovery,
                self.resolver.clone(),
                self.prober.clone(),
                self.probe_timeout,
                result_tx.clone(),
            );
            let handle = units.spawn(tracker.run(cancel.clone()));
            names.insert(handle.id(), "hop tracker".to_string());
        }

        // Only units hold senders now; the sink sees a closed channel once they are all gone.
        drop(result_tx);
        info!(units = units.len(), "Supervisor started");

        let mut first_error: Option<anyhow::Error> = None;

        let first = tokio::select! {
            joined = units.join_next_with_id() => joined,
            _ = cancel.cancelled() => None,
        };
        if let Some(joined) = first {
            record_exit(&names, joined, &mut first_error);
        }
        if !cancel.is_cancelled() {
            info!("A unit stopped, shutting down the others");
        }
        cancel.cancel();

        let drained = tokio::time::timeout(self.grace_period, async {
            while let Some(joined) = units.join_next_with_id().await {
                record_exit(&names, joined, &mut first_error);
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = units.len(), "Units still running after {:?}, aborting them", self.grace_period);
            units.abort_all();
            while let Some(joined) = units.join_next_with_id().await {
                if let Err(e) = joined {
                    if e.is_cancelled() {
                        warn!(unit = %unit_name(&names, e.id()), "Unit aborted");
                    } else {
                        record_exit(&names, Err(e), &mut first_error);
                    }
                }
            }
        }

        info!("All units stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn unit_name(names: &HashMap<Id, String>, id: Id) -> &str {
    names.get(&id).map(String::as_str).unwrap_or("unknown unit")
}

fn record_exit(
    names: &HashMap<Id, String>,
    joined: Result<(Id, Result<()>), JoinError>,
    first_error: &mut Option<anyhow::Error>,
) {
    let failure = match joined {
        Ok((id, Ok(()))) => {
            info!(unit = %unit_name(names, id), "Unit stopped");
            return;
        }
        Ok((id, Err(e))) => {
            let name = unit_name(names, id);
            error!(unit = %name, "Unit failed: {:#}", e);
            e.context(format!("{name} failed"))
        }
        Err(e) => {
            let name = unit_name(names, e.id());
            error!(unit = %name, "Unit panicked or was cancelled: {}", e);
            anyhow!("{name} terminated abnormally: {e}")
        }
    };

    if first_error.is_none() {
        *first_error = Some(failure);
    }
}
