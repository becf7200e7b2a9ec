use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;

pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod registry;
pub mod sheets;

// ---------- identity ----------

/// Static identity of a connector implementation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectorInfo {
    pub connector_type: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

// ---------- schema DTOs ----------

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeySchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One table / collection / sheet with its column layout.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// Namespace where the backend has one (SQL schema); None otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<ColumnSchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeySchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

impl TableSchema {
    /// A bare descriptor with no keys/indexes/row count.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns,
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            row_count: None,
        }
    }
}

/// Narrowing options for `Connector::schema`. How an unknown target is
/// handled is connector-specific and documented on each implementation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaOptions {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub sheet: Option<String>,
}

// ---------- errors ----------

#[derive(Debug)]
pub enum ConnectorError {
    /// Bad or missing connection parameters; the message names the field.
    Validation(String),
    Connection(String),
    Query(String),
    Cancelled,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Validation(msg) => write!(f, "Invalid connection parameters: {msg}"),
            ConnectorError::Connection(msg) => write!(f, "Connection error: {msg}"),
            ConnectorError::Query(msg) => write!(f, "Query error: {msg}"),
            ConnectorError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for ConnectorError {}

// ---------- capability contract ----------

/// The fixed capability set every backend integration satisfies.
///
/// Implementations are stateless; a connection parameter document is passed
/// into every call. The three network operations re-run `validate_params`
/// internally before any I/O and must release the backend connection on
/// every exit path, including cancellation.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    fn info(&self) -> ConnectorInfo;

    /// Check presence and shape of the required fields and return a
    /// normalized copy with defaults applied. Pure and idempotent.
    fn validate_params(&self, params: &Value) -> Result<Value, ConnectorError>;

    /// Cheapest possible liveness probe against the backend.
    async fn test_connection(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError>;

    /// Backend-identity facts: version, active database, object count.
    async fn metadata(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ConnectorError>;

    /// Table/collection/sheet descriptors, optionally narrowed by `options`.
    async fn schema(
        &self,
        params: &Value,
        options: &SchemaOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, ConnectorError>;
}

// ---------- param helpers ----------

pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ConnectorError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConnectorError::Validation(format!("missing required parameter: {key}")))
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn optional_u64(params: &Value, key: &str) -> Result<Option<u64>, ConnectorError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ConnectorError::Validation(format!("parameter {key} must be a non-negative integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str_rejects_missing_and_empty() {
        let params = serde_json::json!({"host": "localhost", "empty": ""});
        assert_eq!(require_str(&params, "host").unwrap(), "localhost");
        let err = require_str(&params, "port").unwrap_err().to_string();
        assert!(err.contains("port"), "error should name the field: {err}");
        assert!(require_str(&params, "empty").is_err());
    }

    #[test]
    fn test_optional_u64_type_checks() {
        let params = serde_json::json!({"port": 6379, "bad": "x", "absent_null": null});
        assert_eq!(optional_u64(&params, "port").unwrap(), Some(6379));
        assert_eq!(optional_u64(&params, "missing").unwrap(), None);
        assert_eq!(optional_u64(&params, "absent_null").unwrap(), None);
        assert!(optional_u64(&params, "bad").is_err());
    }
}
