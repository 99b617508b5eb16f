use std::collections::HashMap;

use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::warn;

/// Hands out connections to one libsql database, local or remote
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(&self, conn: &mut Self::Type, _: &managed::Metrics) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ()).await?.next().await?.ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// A tokio-postgres client together with the task driving its socket.
///
/// Dropping it stops the driver, which closes the connection.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
    statements: HashMap<String, Statement>,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Prepare `sql` once per connection
    pub async fn prepare(&mut self, sql: &str) -> Result<Statement, tokio_postgres::Error> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement.clone());
        }
        let statement = self.client.prepare(sql).await?;
        self.statements.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Opens tokio-postgres connections from a connection string
pub struct PostgresManager {
    dsn: String,
}

impl PostgresManager {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

impl managed::Manager for PostgresManager {
    type Type = PgConnection;
    type Error = tokio_postgres::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection closed: {}", e);
            }
        });
        Ok(PgConnection { client, driver, statements: HashMap::new() })
    }

    async fn recycle(&self, conn: &mut Self::Type, _: &managed::Metrics) -> RecycleResult<Self::Error> {
        if conn.client.is_closed() {
            return Err(managed::RecycleError::Message("connection closed".into()));
        }
        conn.client.simple_query("").await?;
        Ok(())
    }
}

pub type PostgresPool = Pool<PostgresManager>;

/// Single-connection pool: a sink holds at most one live connection
pub fn single_connection<M: managed::Manager>(manager: M) -> Result<Pool<M>, managed::BuildError> {
    Pool::builder(manager).max_size(1).build()
}
