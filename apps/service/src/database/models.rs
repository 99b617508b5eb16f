use chrono::{DateTime, Utc};

use crate::monitoring::types::ProbeResult;

/// SQL flavour of a store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `INSERT INTO t (..) VALUES (?, ..)`
    Sqlite,
    /// `INSERT INTO t (..) VALUES ($1, ..)`
    Postgres,
}

/// Where probe results land. Column names are validated identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    pub table: String,
    pub domain_column: String,
    pub rtt_column: String,
    pub address_column: Option<String>,
    pub next_hop_column: Option<String>,
    pub timestamp_column: Option<String>,
}

impl Default for StoreSchema {
    fn default() -> Self {
        Self {
            table: "pings".to_string(),
            domain_column: "domain".to_string(),
            rtt_column: "packet_rtt".to_string(),
            address_column: Some("ip_address".to_string()),
            next_hop_column: Some("next_hop".to_string()),
            timestamp_column: None,
        }
    }
}

/// A value written for one probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Domain,
    Rtt,
    Address,
    NextHop,
    Timestamp,
}

/// Backend-neutral column value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    NullableText(Option<String>),
    NullableReal(Option<f64>),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl Column {
    pub fn value(&self, result: &ProbeResult) -> ColumnValue {
        match self {
            Column::Domain => ColumnValue::Text(result.target.clone()),
            Column::Rtt => ColumnValue::NullableReal(result.rtt_seconds()),
            Column::Address => ColumnValue::NullableText(result.address.map(|ip| ip.to_string())),
            Column::NextHop => ColumnValue::Bool(result.next_hop),
            Column::Timestamp => ColumnValue::Time(result.timestamp),
        }
    }
}

/// Insert statement for one schema and dialect, built once per sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub columns: Vec<Column>,
}

impl InsertStatement {
    pub fn new(schema: &StoreSchema, dialect: Dialect) -> Self {
        let mut named: Vec<(&str, Column)> =
            vec![(schema.domain_column.as_str(), Column::Domain), (schema.rtt_column.as_str(), Column::Rtt)];
        for (name, column) in [
            (&schema.address_column, Column::Address),
            (&schema.next_hop_column, Column::NextHop),
            (&schema.timestamp_column, Column::Timestamp),
        ] {
            if let Some(name) = name {
                named.push((name.as_str(), column));
            }
        }

        let names: Vec<&str> = named.iter().map(|(name, _)| *name).collect();
        let sql = match dialect {
            Dialect::Sqlite => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            ),
            Dialect::Postgres => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                names.join(", "),
                (1..=names.len()).map(|n| format!("${n}")).collect::<Vec<_>>().join(", ")
            ),
        };

        Self { sql, columns: named.into_iter().map(|(_, column)| column).collect() }
    }

    /// Values for `result`, in placeholder order
    pub fn values(&self, result: &ProbeResult) -> Vec<ColumnValue> {
        self.columns.iter().map(|column| column.value(result)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sqlite_statement() {
        let statement = InsertStatement::new(&StoreSchema::default(), Dialect::Sqlite);
        assert_eq!(
            statement.sql,
            "INSERT INTO pings (domain, packet_rtt, ip_address, next_hop) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(statement.columns, vec![Column::Domain, Column::Rtt, Column::Address, Column::NextHop]);
    }

    #[test]
    fn test_postgres_statement_numbers_placeholders() {
        let schema = StoreSchema { timestamp_column: Some("probed_at".into()), ..StoreSchema::default() };
        let statement = InsertStatement::new(&schema, Dialect::Postgres);
        assert_eq!(
            statement.sql,
            "INSERT INTO pings (domain, packet_rtt, ip_address, next_hop, probed_at) VALUES ($1, $2, $3, $4, $5)"
        );
    }

    #[test]
    fn test_optional_columns_are_left_out() {
        let schema = StoreSchema { address_column: None, next_hop_column: None, ..StoreSchema::default() };
        let statement = InsertStatement::new(&schema, Dialect::Postgres);
        assert_eq!(statement.sql, "INSERT INTO pings (domain, packet_rtt) VALUES ($1, $2)");
        assert_eq!(statement.columns, vec![Column::Domain, Column::Rtt]);
    }

    #[test]
    fn test_values_keep_null_rtt() {
        let statement = InsertStatement::new(&StoreSchema::default(), Dialect::Sqlite);
        let result = ProbeResult::new("down.example", false).with_address("192.0.2.1".parse().unwrap());

        assert_eq!(
            statement.values(&result),
            vec![
                ColumnValue::Text("down.example".into()),
                ColumnValue::NullableReal(None),
                ColumnValue::NullableText(Some("192.0.2.1".into())),
                ColumnValue::Bool(false),
            ]
        );
    }

    #[test]
    fn test_values_use_fractional_seconds() {
        let statement = InsertStatement::new(&StoreSchema::default(), Dialect::Postgres);
        let result = ProbeResult::new("example.com", true).reply(Duration::from_millis(123));

        let values = statement.values(&result);
        assert_eq!(values[1], ColumnValue::NullableReal(Some(0.123)));
        assert_eq!(values[2], ColumnValue::NullableText(None));
        assert_eq!(values[3], ColumnValue::Bool(true));
    }
}
