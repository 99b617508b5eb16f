use std::fmt::Display;
use std::time::Duration;

use anyhow::{Result, anyhow};
use deadpool::managed::{Manager, Object, Pool};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::InsertStatement;
use super::repository::StoreConnection;
use crate::monitoring::types::ProbeResult;

/// Timing knobs for a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// Deadline for a single insert
    pub write_timeout: Duration,
    /// Pause between two failed connection attempts
    pub reconnect_delay: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self { write_timeout: Duration::from_secs(5), reconnect_delay: Duration::from_secs(1) }
    }
}

/// Sole consumer of the result channel.
///
/// Every received result is written exactly once, in arrival order. A failed
/// or timed-out write drops the connection, reconnects and retries the same
/// result; nothing else is read from the channel until it lands.
pub struct ResultSink<M: Manager> {
    pool: Pool<M>,
    statement: InsertStatement,
    settings: SinkSettings,
}

impl<M> ResultSink<M>
where
    M: Manager,
    M::Type: StoreConnection,
    M::Error: Display,
{
    pub fn new(pool: Pool<M>, statement: InsertStatement, settings: SinkSettings) -> Self {
        Self { pool, statement, settings }
    }

    pub async fn run(self, mut results: mpsc::Receiver<ProbeResult>, cancel: CancellationToken) -> Result<()> {
        let Some(mut conn) = self.connect(&cancel).await else {
            return Ok(());
        };
        info!("Result sink connected");

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = results.recv() => match next {
                    Some(result) => result,
                    None => {
                        info!("Result channel closed, sink stopping");
                        break;
                    }
                },
            };

            loop {
                match self.write(&mut conn, &result).await {
                    Ok(()) => {
                        debug!(host = %result.target, reachable = result.is_reachable(), rtt = ?result.rtt, "Persisted probe result");
                        break;
                    }
                    Err(e) => {
                        error!(host = %result.target, "Failed to persist probe result: {:#}", e);
                        drop(Object::take(conn));
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        }
                        conn = match self.connect(&cancel).await {
                            Some(conn) => conn,
                            None => return Ok(()),
                        };
                        info!("Result sink reconnected, retrying write");
                    }
                }
            }
        }

        Ok(())
    }

    async fn write(&self, conn: &mut Object<M>, result: &ProbeResult) -> Result<()> {
        let conn: &mut M::Type = conn;
        match tokio::time::timeout(self.settings.write_timeout, conn.insert_probe(&self.statement, result)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("write did not finish within {:?}", self.settings.write_timeout)),
        }
    }

    /// Keep trying until a connection is available; `None` once cancelled.
    /// Each attempt is bounded by the write deadline.
    async fn connect(&self, cancel: &CancellationToken) -> Option<Object<M>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                outcome = tokio::time::timeout(self.settings.write_timeout, self.pool.get()) => outcome,
            };
            match outcome {
                Ok(Ok(conn)) => return Some(conn),
                Ok(Err(e)) => warn!(attempt, "Store connection failed: {}", e),
                Err(_) => warn!(attempt, "Store connection did not complete within {:?}", self.settings.write_timeout),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{MemoryManager, MemoryStore};
    use super::*;
    use crate::database::models::{Dialect, StoreSchema};
    use crate::pool::single_connection;
    use std::sync::Arc;

    fn sink(store: &Arc<MemoryStore>) -> ResultSink<MemoryManager> {
        let pool = single_connection(MemoryManager { store: store.clone() }).unwrap();
        let statement = InsertStatement::new(&StoreSchema::default(), Dialect::Sqlite);
        ResultSink::new(pool, statement, SinkSettings::default())
    }

    fn numbered(n: usize) -> ProbeResult {
        ProbeResult::new(format!("host{n}.example"), false).reply(Duration::from_millis(n as u64))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_writes_are_retried_in_order() {
        let store = MemoryStore::failing(5..=9);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        for n in 1..=10 {
            tx.send(numbered(n)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap().unwrap();

        let targets: Vec<String> = store.rows().into_iter().map(|row| row.target).collect();
        let expected: Vec<String> = (1..=10).map(|n| format!("host{n}.example")).collect();
        assert_eq!(targets, expected);
        // initial connection plus one per failed write
        assert_eq!(store.connects(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_write_hits_deadline_and_retries() {
        let store = MemoryStore::hanging([1]);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        tx.send(numbered(1)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target, "host1.example");
        assert_eq!(store.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_result_is_persisted() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        let unreachable = ProbeResult::new("down.example", false).with_address("192.0.2.9".parse().unwrap());
        tx.send(unreachable.clone()).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(store.rows(), vec![unreachable]);
        assert_eq!(store.rows()[0].rtt_seconds(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_backoff() {
        let store = MemoryStore::refusing(3);
        let (tx, rx) = mpsc::channel(1);
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        tx.send(numbered(1)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.connects(), 4);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_waits_before_reconnecting() {
        let store = MemoryStore::failing(1..=3);
        let (tx, rx) = mpsc::channel(1);
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        tx.send(numbered(1)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.connects(), 4);
        // one reconnect delay per failed write, nothing else sleeps
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_is_abandoned_after_deadline() {
        let store = MemoryStore::unresponsive(2);
        let (tx, rx) = mpsc::channel(1);
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(sink(&store).run(rx, CancellationToken::new()));

        tx.send(numbered(1)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.connects(), 3);
        // two 5s deadlines, each followed by the 1s backoff
        assert!(start.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_reconnect_exits() {
        let store = MemoryStore::refusing(usize::MAX);
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sink(&store).run(rx, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(store.connects(), 4);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_libsql_sink_persists_rtt_seconds() {
        use crate::pool::LibsqlManager;

        let dir = tempfile::TempDir::new().unwrap();
        let db = libsql::Builder::new_local(dir.path().join("sink.db")).build().await.unwrap();
        db.connect()
            .unwrap()
            .execute("CREATE TABLE pings (domain TEXT, packet_rtt REAL, ip_address TEXT, next_hop INTEGER)", ())
            .await
            .unwrap();

        let pool = single_connection(LibsqlManager::new(db)).unwrap();
        let statement = InsertStatement::new(&StoreSchema::default(), Dialect::Sqlite);
        let sink = ResultSink::new(pool.clone(), statement, SinkSettings::default());

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(sink.run(rx, CancellationToken::new()));
        tx.send(
            ProbeResult::new("example.com", false)
                .with_address("93.184.216.34".parse().unwrap())
                .reply(Duration::from_millis(123)),
        )
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let conn = pool.get().await.unwrap();
        let mut rows = conn.query("SELECT domain, packet_rtt FROM pings", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "example.com");
        assert!((row.get::<f64>(1).unwrap() - 0.123).abs() < 1e-9);
    }
}
