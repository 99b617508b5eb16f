use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Size of the echo payload, same as the classic `ping` default
const PAYLOAD_SIZE: usize = 56;

/// Failure to run a probe at all. A missing reply is not an error.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("cannot open ICMP socket: {0}")]
    Unavailable(#[source] std::io::Error),

    #[error("echo to {address} failed: {reason}")]
    Transport { address: IpAddr, reason: String },
}

/// Sends one echo request and waits for the reply
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Round-trip time of a single echo, or `None` if nothing came back within `timeout`
    async fn probe(&self, address: IpAddr, timeout: Duration) -> Result<Option<Duration>, ProbeError>;
}

/// ICMP echo prober backed by raw sockets (requires CAP_NET_RAW or root)
pub struct IcmpProber {
    v4: OnceCell<Client>,
    v6: OnceCell<Client>,
    sequence: AtomicU16,
}

impl IcmpProber {
    pub fn new() -> Self {
        Self { v4: OnceCell::new(), v6: OnceCell::new(), sequence: AtomicU16::new(0) }
    }

    /// Socket for the address family, opened on first use. A failed open is retried on the
    /// next call.
    async fn client_for(&self, address: &IpAddr) -> Result<&Client, ProbeError> {
        let (cell, kind) = match address {
            IpAddr::V4(_) => (&self.v4, ICMP::V4),
            IpAddr::V6(_) => (&self.v6, ICMP::V6),
        };

        cell.get_or_try_init(|| async move {
            let config = Config::builder().kind(kind).build();
            Client::new(&config).map_err(ProbeError::Unavailable)
        })
        .await
    }
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: IpAddr, timeout: Duration) -> Result<Option<Duration>, ProbeError> {
        let client = self.client_for(&address).await?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut pinger = client.pinger(address, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(sequence), &[0; PAYLOAD_SIZE]).await {
            Ok((_packet, rtt)) => Ok(Some(rtt)),
            Err(SurgeError::Timeout { .. }) => Ok(None),
            Err(SurgeError::IOError(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(ProbeError::Unavailable(e))
            }
            Err(e) => Err(ProbeError::Transport { address, reason: e.to_string() }),
        }
    }
}
