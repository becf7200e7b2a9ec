use redis::aio::MultiplexedConnection;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    Connector, ConnectorError, ConnectorInfo, SchemaOptions, TableSchema, optional_str,
    optional_u64, require_str,
};

const DEFAULT_PORT: u16 = 6379;

/// Redis connector.
///
/// Redis has no table schema; `schema` reports one descriptor per
/// non-empty logical database from INFO keyspace (name `dbN`, key count as
/// the row count, no columns). `SchemaOptions` is ignored.
pub struct RedisConnector;

impl RedisConnector {
    fn normalized(params: &Value) -> Result<Value, ConnectorError> {
        let host = require_str(params, "host")?;
        let port = optional_u64(params, "port")?.unwrap_or(u64::from(DEFAULT_PORT));
        if port == 0 || port > u64::from(u16::MAX) {
            return Err(ConnectorError::Validation(
                "parameter port must fit in 1..=65535".to_string(),
            ));
        }
        let db = optional_u64(params, "db")?.unwrap_or(0);

        let mut normalized = serde_json::json!({
            "host": host,
            "port": port,
            "db": db,
        });
        if let Some(password) = optional_str(params, "password") {
            normalized["password"] = Value::String(password.to_string());
        }
        Ok(normalized)
    }

    async fn connect(
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<MultiplexedConnection, ConnectorError> {
        let normalized = Self::normalized(params)?;
        let host = normalized["host"].as_str().unwrap_or_default().to_string();
        let port = normalized["port"].as_u64().unwrap_or(u64::from(DEFAULT_PORT)) as u16;

        // Structured ConnectionInfo rather than a URL, so passwords never
        // need URL-escaping.
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(host, port),
            redis: redis::RedisConnectionInfo {
                db: normalized["db"].as_u64().unwrap_or(0) as i64,
                username: None,
                password: normalized["password"].as_str().map(str::to_string),
                ..Default::default()
            },
        };

        let client = redis::Client::open(info)
            .map_err(|e| ConnectorError::Connection(format!("Failed to create Redis client: {e}")))?;

        tokio::select! {
            res = client.get_multiplexed_async_connection() => {
                res.map_err(|e| ConnectorError::Connection(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    async fn raw_info(
        conn: &mut MultiplexedConnection,
        section: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectorError> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg(section);
        tokio::select! {
            res = cmd.query_async::<String>(conn) => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    /// Pull `key: value` pairs out of an INFO section body.
    fn info_field<'a>(info: &'a str, key: &str) -> Option<&'a str> {
        info.lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.trim())
    }
}

#[async_trait::async_trait]
impl Connector for RedisConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            connector_type: "redis",
            display_name: "Redis",
            description: "Connect to Redis key-value stores",
        }
    }

    fn validate_params(&self, params: &Value) -> Result<Value, ConnectorError> {
        Self::normalized(params)
    }

    async fn test_connection(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;
        let cmd = redis::cmd("PING");
        tokio::select! {
            res = cmd.query_async::<String>(&mut conn) => {
                res.map(|_| ()).map_err(|e| ConnectorError::Connection(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    async fn metadata(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;

        let server = Self::raw_info(&mut conn, "server", cancel).await?;
        let dbsize_cmd = redis::cmd("DBSIZE");
        let key_count = tokio::select! {
            res = dbsize_cmd.query_async::<i64>(&mut conn) => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
        };

        let db = optional_u64(params, "db")?.unwrap_or(0);

        Ok(serde_json::json!({
            "type": "redis",
            "version": Self::info_field(&server, "redis_version").unwrap_or("unknown"),
            "mode": Self::info_field(&server, "redis_mode").unwrap_or("standalone"),
            "db": db,
            "key_count": key_count,
        }))
    }

    async fn schema(
        &self,
        params: &Value,
        _options: &SchemaOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;
        let keyspace = Self::raw_info(&mut conn, "keyspace", cancel).await?;

        // Lines look like: db0:keys=42,expires=0,avg_ttl=0
        let mut result = Vec::new();
        for line in keyspace.lines() {
            let Some((db_name, stats)) = line.split_once(':') else {
                continue;
            };
            if !db_name.starts_with("db") {
                continue;
            }
            let keys = stats
                .split(',')
                .filter_map(|kv| kv.split_once('='))
                .find(|(k, _)| *k == "keys")
                .and_then(|(_, v)| v.parse::<i64>().ok());

            let mut table = TableSchema::new(db_name, Vec::new());
            table.row_count = keys;
            result.push(table);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_applies_defaults() {
        let connector = RedisConnector;
        let normalized = connector
            .validate_params(&serde_json::json!({"host": "cache.internal"}))
            .unwrap();
        assert_eq!(normalized["port"], 6379);
        assert_eq!(normalized["db"], 0);
        assert!(normalized.get("password").is_none());
    }

    #[test]
    fn test_validate_keeps_password_and_is_idempotent() {
        let connector = RedisConnector;
        let params = serde_json::json!({"host": "h", "port": 6380, "password": "pw", "db": 2});
        let once = connector.validate_params(&params).unwrap();
        let twice = connector.validate_params(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once["password"], "pw");
    }

    #[test]
    fn test_validate_rejects_out_of_range_port() {
        let connector = RedisConnector;
        for port in [0u64, 70_000] {
            let err = connector
                .validate_params(&serde_json::json!({"host": "h", "port": port}))
                .unwrap_err();
            assert!(matches!(err, ConnectorError::Validation(_)));
        }
    }

    #[test]
    fn test_info_field_parsing() {
        let info = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n";
        assert_eq!(RedisConnector::info_field(info, "redis_version"), Some("7.2.4"));
        assert_eq!(RedisConnector::info_field(info, "absent"), None);
    }
}
