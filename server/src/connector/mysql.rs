use serde_json::Value;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Connection as SqlxConnection, Row};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use super::{
    ColumnSchema, Connector, ConnectorError, ConnectorInfo, ForeignKeySchema, IndexSchema,
    SchemaOptions, TableSchema, require_str,
};

/// MySQL / MariaDB connector.
///
/// In MySQL a schema is a database, so discovery is scoped to the database
/// named in the connection string (or `options.schema` when given). Unknown
/// schema or table names match nothing and yield an empty result.
pub struct MysqlConnector;

impl MysqlConnector {
    fn connection_string<'a>(params: &'a Value) -> Result<&'a str, ConnectorError> {
        let conn_str = require_str(params, "connection_string")?;
        if !conn_str.starts_with("mysql://") {
            return Err(ConnectorError::Validation(
                "connection_string must start with mysql://".to_string(),
            ));
        }
        Ok(conn_str)
    }

    async fn connect(
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<MySqlConnection, ConnectorError> {
        let conn_str = Self::connection_string(params)?;
        tokio::select! {
            res = MySqlConnection::connect(conn_str) => {
                res.map_err(|e| ConnectorError::Connection(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        binds: &[Option<&str>],
        cancel: &CancellationToken,
    ) -> Result<Vec<MySqlRow>, ConnectorError> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        tokio::select! {
            res = query.fetch_all(&mut *conn) => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    async fn schema_inner(
        conn: &mut MySqlConnection,
        options: &SchemaOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, ConnectorError> {
        let schema = options.schema.as_deref();
        let table = options.table.as_deref();

        let column_rows = Self::fetch_all(
            conn,
            "SELECT table_schema, table_name, column_name, data_type, is_nullable, column_key \
             FROM information_schema.columns \
             WHERE table_schema = COALESCE(?, DATABASE()) \
             AND (? IS NULL OR table_name = ?) \
             ORDER BY table_schema, table_name, ordinal_position",
            &[schema, table, table],
            cancel,
        )
        .await?;

        let mut tables: BTreeMap<(String, String), TableSchema> = BTreeMap::new();
        for row in column_rows {
            let schema_name: String = row.get(0);
            let table_name: String = row.get(1);
            let column_name: String = row.get(2);
            let is_nullable: String = row.get(4);
            let column_key: String = row.get(5);
            let entry = tables
                .entry((schema_name.clone(), table_name.clone()))
                .or_insert_with(|| {
                    let mut t = TableSchema::new(table_name, Vec::new());
                    t.schema = Some(schema_name);
                    t
                });
            if column_key == "PRI" {
                entry.primary_keys.push(column_name.clone());
            }
            entry.columns.push(ColumnSchema {
                name: column_name,
                data_type: row.get(3),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            });
        }

        // Approximate row counts from the table catalog
        let table_rows = Self::fetch_all(
            conn,
            "SELECT table_schema, table_name, table_rows \
             FROM information_schema.tables \
             WHERE table_schema = COALESCE(?, DATABASE())",
            &[schema],
            cancel,
        )
        .await?;
        for row in table_rows {
            let key = (row.get::<String, _>(0), row.get::<String, _>(1));
            if let Some(t) = tables.get_mut(&key) {
                t.row_count = row.get::<Option<u64>, _>(2).map(|n| n as i64);
            }
        }

        // Foreign keys from key_column_usage
        let fk_rows = Self::fetch_all(
            conn,
            "SELECT table_schema, table_name, constraint_name, column_name, \
                    referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = COALESCE(?, DATABASE()) \
             AND referenced_table_name IS NOT NULL \
             ORDER BY constraint_name, ordinal_position",
            &[schema],
            cancel,
        )
        .await?;
        for row in fk_rows {
            let key = (row.get::<String, _>(0), row.get::<String, _>(1));
            let constraint: String = row.get(2);
            if let Some(t) = tables.get_mut(&key) {
                let column: String = row.get(3);
                let referenced_table: String = row.get(4);
                let referenced_column: String = row.get(5);
                match t
                    .foreign_keys
                    .iter_mut()
                    .find(|fk| fk.name.as_deref() == Some(constraint.as_str()))
                {
                    Some(fk) => {
                        fk.columns.push(column);
                        fk.referenced_columns.push(referenced_column);
                    }
                    None => t.foreign_keys.push(ForeignKeySchema {
                        name: Some(constraint),
                        columns: vec![column],
                        referenced_table,
                        referenced_columns: vec![referenced_column],
                    }),
                }
            }
        }

        // Indexes from the statistics catalog
        let ix_rows = Self::fetch_all(
            conn,
            "SELECT table_schema, table_name, index_name, column_name, non_unique \
             FROM information_schema.statistics \
             WHERE table_schema = COALESCE(?, DATABASE()) \
             ORDER BY table_name, index_name, seq_in_index",
            &[schema],
            cancel,
        )
        .await?;
        for row in ix_rows {
            let key = (row.get::<String, _>(0), row.get::<String, _>(1));
            let index_name: String = row.get(2);
            if let Some(t) = tables.get_mut(&key) {
                let column: String = row.get(3);
                let non_unique: i64 = row.get(4);
                match t.indexes.iter_mut().find(|ix| ix.name == index_name) {
                    Some(ix) => ix.columns.push(column),
                    None => t.indexes.push(IndexSchema {
                        name: index_name,
                        columns: vec![column],
                        unique: non_unique == 0,
                    }),
                }
            }
        }

        Ok(tables.into_values().collect())
    }
}

#[async_trait::async_trait]
impl Connector for MysqlConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            connector_type: "mysql",
            display_name: "MySQL",
            description: "Connect to MySQL/MariaDB databases",
        }
    }

    fn validate_params(&self, params: &Value) -> Result<Value, ConnectorError> {
        Self::connection_string(params)?;
        Ok(params.clone())
    }

    async fn test_connection(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;
        let result = Self::fetch_all(&mut conn, "SELECT 1", &[], cancel).await;
        let _ = conn.close().await;
        result.map(|_| ())
    }

    async fn metadata(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;

        let result = Self::fetch_all(
            &mut conn,
            "SELECT VERSION(), DATABASE(), \
             (SELECT COUNT(*) FROM information_schema.tables \
              WHERE table_schema = DATABASE())",
            &[],
            cancel,
        )
        .await;
        let _ = conn.close().await;

        let row = result?
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::Query("empty metadata result".to_string()))?;

        let version: String = row.get(0);
        let database: Option<String> = row.get(1);
        let table_count: i64 = row.get(2);

        Ok(serde_json::json!({
            "type": "mysql",
            "version": version,
            "database": database,
            "table_count": table_count,
        }))
    }

    async fn schema(
        &self,
        params: &Value,
        options: &SchemaOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, ConnectorError> {
        let mut conn = Self::connect(params, cancel).await?;
        let result = Self::schema_inner(&mut conn, options, cancel).await;
        let _ = conn.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_mysql_scheme() {
        let connector = MysqlConnector;
        assert!(
            connector
                .validate_params(&serde_json::json!({
                    "connection_string": "mysql://u:p@localhost:3306/db"
                }))
                .is_ok()
        );
        let err = connector
            .validate_params(&serde_json::json!({
                "connection_string": "postgresql://u:p@localhost/db"
            }))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[test]
    fn test_validate_names_missing_field() {
        let connector = MysqlConnector;
        let err = connector
            .validate_params(&serde_json::json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("connection_string"));
    }
}
