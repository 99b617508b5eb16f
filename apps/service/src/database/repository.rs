use anyhow::{Result, bail};
use async_trait::async_trait;
use libsql::Value;
use tokio_postgres::types::ToSql;

use super::models::{ColumnValue, InsertStatement};
use crate::monitoring::types::ProbeResult;
use crate::pool::PgConnection;

/// One live connection a sink can append probe results through
#[async_trait]
pub trait StoreConnection: Send {
    /// Insert one row for `result` using `statement`
    async fn insert_probe(&mut self, statement: &InsertStatement, result: &ProbeResult) -> Result<()>;
}

fn libsql_value(value: ColumnValue) -> Value {
    match value {
        ColumnValue::Text(text) => Value::Text(text),
        ColumnValue::NullableText(text) => text.map_or(Value::Null, Value::Text),
        ColumnValue::NullableReal(real) => real.map_or(Value::Null, Value::Real),
        ColumnValue::Bool(flag) => Value::Integer(i64::from(flag)),
        // Unix seconds, like the rest of the local store
        ColumnValue::Time(time) => Value::Integer(time.timestamp()),
    }
}

fn postgres_value(value: ColumnValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        ColumnValue::Text(text) => Box::new(text),
        ColumnValue::NullableText(text) => Box::new(text),
        ColumnValue::NullableReal(real) => Box::new(real),
        ColumnValue::Bool(flag) => Box::new(flag),
        ColumnValue::Time(time) => Box::new(time),
    }
}

#[async_trait]
impl StoreConnection for libsql::Connection {
    async fn insert_probe(&mut self, statement: &InsertStatement, result: &ProbeResult) -> Result<()> {
        let values: Vec<Value> = statement.values(result).into_iter().map(libsql_value).collect();
        let rows = self.execute(&statement.sql, values).await?;
        if rows == 0 {
            bail!("insert for {} affected no rows", result.target);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for PgConnection {
    async fn insert_probe(&mut self, statement: &InsertStatement, result: &ProbeResult) -> Result<()> {
        let prepared = self.prepare(&statement.sql).await?;
        let values: Vec<Box<dyn ToSql + Sync + Send>> =
            statement.values(result).into_iter().map(postgres_value).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|value| &**value as &(dyn ToSql + Sync)).collect();

        let rows = self.client().execute(&prepared, &params).await?;
        if rows == 0 {
            bail!("insert for {} affected no rows", result.target);
        }
        Ok(())
    }
}
