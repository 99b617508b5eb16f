//! Name resolution with reachability arbitration.
//!
//! DNS often hands out several addresses for one name, some of which may be stale. When that
//! happens every candidate is probed at once and the first one to answer wins. If none answers
//! the first address in resolver order is used, so resolution never fails just because the
//! target is down.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use super::checker::Prober;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("lookup of '{name}' failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' does not resolve to any address")]
    NoAddresses(String),
}

/// Name-to-address lookup
#[async_trait::async_trait]
pub trait NameLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Lookup through the system resolver
pub struct SystemLookup;

#[async_trait::async_trait]
impl NameLookup for SystemLookup {
    async fn lookup(&self, name: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((name, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

pub struct Resolver {
    lookup: Arc<dyn NameLookup>,
    prober: Arc<dyn Prober>,
    arbitration_timeout: Duration,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn NameLookup>, prober: Arc<dyn Prober>, arbitration_timeout: Duration) -> Self {
        Self { lookup, prober, arbitration_timeout }
    }

    /// Resolve `name` to the address that currently answers
    pub async fn resolve(&self, name: &str) -> Result<IpAddr, ResolveError> {
        if let Ok(literal) = name.parse::<IpAddr>() {
            return Ok(literal);
        }

        let found = self
            .lookup
            .lookup(name)
            .await
            .map_err(|source| ResolveError::Lookup { name: name.to_string(), source })?;

        let mut candidates: Vec<IpAddr> = Vec::with_capacity(found.len());
        for address in found {
            if !candidates.contains(&address) {
                candidates.push(address);
            }
        }

        match candidates.as_slice() {
            [] => Err(ResolveError::NoAddresses(name.to_string())),
            [only] => Ok(*only),
            _ => Ok(self.arbitrate(name, &candidates).await),
        }
    }

    /// First responder among `candidates`, or the first candidate if nobody answers
    async fn arbitrate(&self, name: &str, candidates: &[IpAddr]) -> IpAddr {
        let mut probes: FuturesUnordered<_> = candidates
            .iter()
            .map(|&address| {
                let prober = Arc::clone(&self.prober);
                let timeout = self.arbitration_timeout;
                async move { (address, prober.probe(address, timeout).await) }
            })
            .collect();

        while let Some((address, outcome)) = probes.next().await {
            match outcome {
                Ok(Some(rtt)) => {
                    debug!(host = name, %address, ?rtt, "Arbitration picked first responder");
                    return address;
                }
                Ok(None) => debug!(host = name, %address, "Candidate did not answer"),
                Err(e) => warn!(host = name, %address, "Candidate probe failed: {}", e),
            }
        }

        let fallback = candidates[0];
        debug!(host = name, address = %fallback, "No candidate answered, using first address");
        fallback
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Lookup answering from a table; each call pops the next answer for a name, the last one
    /// sticks.
    #[derive(Default)]
    pub struct FakeLookup {
        pub answers: Mutex<HashMap<String, Vec<std::io::Result<Vec<IpAddr>>>>>,
        pub calls: Mutex<usize>,
    }

    impl FakeLookup {
        pub fn with(name: &str, answers: Vec<std::io::Result<Vec<IpAddr>>>) -> Self {
            let lookup = Self::default();
            lookup.answers.lock().unwrap().insert(name.to_string(), answers);
            lookup
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl NameLookup for FakeLookup {
        async fn lookup(&self, name: &str) -> std::io::Result<Vec<IpAddr>> {
            *self.calls.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            let Some(queue) = answers.get_mut(name) else {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "unknown host"));
            };
            if queue.len() > 1 { queue.remove(0) } else { clone_answer(&queue[0]) }
        }
    }

    fn clone_answer(answer: &std::io::Result<Vec<IpAddr>>) -> std::io::Result<Vec<IpAddr>> {
        match answer {
            Ok(addrs) => Ok(addrs.clone()),
            Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}
