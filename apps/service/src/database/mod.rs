/// Result storage
///
/// Probe results are appended to a single table through one of two backends:
/// LibSQL (local SQLite file or a remote sqld/Turso database) and PostgreSQL.
pub mod models;
pub mod repository;
pub mod sink;

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::monitoring::types::ProbeResult;
use crate::pool::{LibsqlManager, LibsqlPool, PostgresManager, PostgresPool, single_connection};
pub use models::{Dialect, InsertStatement, StoreSchema};
pub use sink::{ResultSink, SinkSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Libsql,
    Postgres,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Libsql => write!(f, "libsql"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Everything needed to open a store and run its sink
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: Backend,
    pub url: String,
    pub auth_token: Option<String>,
    pub schema: StoreSchema,
    pub sink: SinkSettings,
}

/// Where a libsql URL points
#[derive(Debug, PartialEq, Eq)]
enum LibsqlLocation {
    Local(PathBuf),
    Remote,
}

fn libsql_location(url: &str) -> Result<LibsqlLocation> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        // plain paths have no scheme
        Err(_) => return Ok(LibsqlLocation::Local(PathBuf::from(url))),
    };

    match parsed.scheme() {
        "libsql" | "http" | "https" | "ws" | "wss" => Ok(LibsqlLocation::Remote),
        "file" if url.starts_with("file://") => parsed
            .to_file_path()
            .map(LibsqlLocation::Local)
            .map_err(|_| anyhow!("{url} is not a local file URL")),
        "file" => Ok(LibsqlLocation::Local(PathBuf::from(&url["file:".len()..]))),
        // a drive letter such as `C:\pings.db`
        drive if drive.len() == 1 => Ok(LibsqlLocation::Local(PathBuf::from(url))),
        other => bail!("unsupported libsql URL scheme '{other}'"),
    }
}

/// Open a libsql database from a local path (plain or `file:` URL) or a
/// `libsql`, `http(s)` or `ws(s)` URL. Local files are opened right away so a
/// bad path fails at startup.
pub async fn open_libsql(url: &str, auth_token: Option<&str>) -> Result<libsql::Database> {
    match libsql_location(url)? {
        LibsqlLocation::Remote => {
            libsql::Builder::new_remote(url.to_string(), auth_token.unwrap_or_default().to_string())
                .build()
                .await
                .with_context(|| format!("failed to open libsql database at {url}"))
        }
        LibsqlLocation::Local(path) => {
            let database = libsql::Builder::new_local(&path)
                .build()
                .await
                .with_context(|| format!("failed to open libsql database at {}", path.display()))?;
            database.connect().with_context(|| format!("failed to open libsql database at {}", path.display()))?;
            Ok(database)
        }
    }
}

/// A connection pool for the configured backend
pub enum StorePool {
    Libsql(LibsqlPool),
    Postgres(PostgresPool),
}

impl StorePool {
    /// Build the pool. No connection is made until the sink asks for one,
    /// except for local libsql files which are opened (and created) here.
    pub async fn open(settings: &StoreSettings) -> Result<Self> {
        match settings.backend {
            Backend::Libsql => {
                let database = open_libsql(&settings.url, settings.auth_token.as_deref()).await?;
                Ok(StorePool::Libsql(single_connection(LibsqlManager::new(database))?))
            }
            Backend::Postgres => Ok(StorePool::Postgres(single_connection(PostgresManager::new(&settings.url))?)),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            StorePool::Libsql(_) => Dialect::Sqlite,
            StorePool::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Drain `results` into the store until cancelled or the channel closes
    pub async fn run_sink(
        self,
        schema: &StoreSchema,
        settings: SinkSettings,
        results: mpsc::Receiver<ProbeResult>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let statement = InsertStatement::new(schema, self.dialect());
        match self {
            StorePool::Libsql(pool) => ResultSink::new(pool, statement, settings).run(results, cancel).await,
            StorePool::Postgres(pool) => ResultSink::new(pool, statement, settings).run(results, cancel).await,
        }
    }
}
