use serde_json::Value;
use std::collections::BTreeMap;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

use super::{
    ColumnSchema, Connector, ConnectorError, ConnectorInfo, ForeignKeySchema, IndexSchema,
    SchemaOptions, TableSchema, require_str,
};

/// PostgreSQL connector.
///
/// Schema narrowing: an unknown schema or table name matches nothing and
/// yields an empty result rather than an error.
pub struct PostgresConnector;

impl PostgresConnector {
    fn connection_string<'a>(params: &'a Value) -> Result<&'a str, ConnectorError> {
        let conn_str = require_str(params, "connection_string")?;
        if !conn_str.starts_with("postgresql://") && !conn_str.starts_with("postgres://") {
            return Err(ConnectorError::Validation(
                "connection_string must start with postgresql:// or postgres://".to_string(),
            ));
        }
        Ok(conn_str)
    }

    async fn connect(
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<tokio_postgres::Client, ConnectorError> {
        let conn_str = Self::connection_string(params)?;

        let (client, connection) = tokio::select! {
            res = tokio_postgres::connect(conn_str, NoTls) => {
                res.map_err(|e| ConnectorError::Connection(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
        };

        // The connection task ends when the client is dropped, so every
        // exit path below releases the socket.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection closed with error");
            }
        });

        Ok(client)
    }

    async fn query(
        client: &tokio_postgres::Client,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        cancel: &CancellationToken,
    ) -> Result<Vec<tokio_postgres::Row>, ConnectorError> {
        tokio::select! {
            res = client.query(sql, params) => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl Connector for PostgresConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            connector_type: "postgresql",
            display_name: "PostgreSQL",
            description: "Connect to PostgreSQL databases",
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
        let client = Self::connect(params, cancel).await?;
        Self::query(&client, "SELECT 1", &[], cancel).await?;
        Ok(())
    }

    async fn metadata(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ConnectorError> {
        let client = Self::connect(params, cancel).await?;

        let row = Self::query(
            &client,
            "SELECT version(), current_database(), \
             (SELECT count(*) FROM information_schema.tables \
              WHERE table_schema NOT IN ('pg_catalog', 'information_schema'))",
            &[],
            cancel,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ConnectorError::Query("empty metadata result".to_string()))?;

        let version: String = row.get(0);
        let database: String = row.get(1);
        let table_count: i64 = row.get(2);

        Ok(serde_json::json!({
            "type": "postgresql",
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
        let client = Self::connect(params, cancel).await?;

        // Resolve the schema set first; everything below is scoped to it.
        let schemas: Vec<String> = match &options.schema {
            Some(s) => vec![s.clone()],
            None => Self::query(
                &client,
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('pg_catalog', 'information_schema') \
                 AND schema_name !~ '^pg_toast' \
                 AND schema_name !~ '^pg_temp' \
                 ORDER BY schema_name",
                &[],
                cancel,
            )
            .await?
            .into_iter()
            .map(|row| row.get(0))
            .collect(),
        };

        let schema_refs: Vec<&str> = schemas.iter().map(|s| s.as_str()).collect();
        let schema_param: &(dyn tokio_postgres::types::ToSql + Sync) = &schema_refs;
        let table_param: &(dyn tokio_postgres::types::ToSql + Sync) = &options.table;

        // Columns, grouped by (schema, table) in deterministic order
        let column_rows = Self::query(
            &client,
            "SELECT table_schema, table_name, column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = ANY($1) \
             AND ($2::text IS NULL OR table_name = $2) \
             ORDER BY table_schema, table_name, ordinal_position",
            &[schema_param, table_param],
            cancel,
        )
        .await?;

        let mut tables: BTreeMap<(String, String), TableSchema> = BTreeMap::new();
        for row in column_rows {
            let schema_name: String = row.get(0);
            let table_name: String = row.get(1);
            let is_nullable: String = row.get(4);
            let entry = tables
                .entry((schema_name.clone(), table_name.clone()))
                .or_insert_with(|| {
                    let mut t = TableSchema::new(table_name, Vec::new());
                    t.schema = Some(schema_name);
                    t
                });
            entry.columns.push(ColumnSchema {
                name: row.get(2),
                data_type: row.get(3),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            });
        }

        // Primary keys
        let pk_rows = Self::query(
            &client,
            "SELECT tc.table_schema, tc.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
             AND tc.table_schema = ANY($1) \
             ORDER BY kcu.ordinal_position",
            &[schema_param],
            cancel,
        )
        .await?;
        for row in pk_rows {
            let key = (row.get::<_, String>(0), row.get::<_, String>(1));
            if let Some(table) = tables.get_mut(&key) {
                table.primary_keys.push(row.get(2));
            }
        }

        // Foreign keys: one entry per constraint, columns in ordinal order
        let fk_rows = Self::query(
            &client,
            "SELECT tc.table_schema, tc.table_name, tc.constraint_name, \
                    kcu.column_name, ccu.table_name, ccu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name \
              AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
             AND tc.table_schema = ANY($1) \
             ORDER BY tc.constraint_name, kcu.ordinal_position",
            &[schema_param],
            cancel,
        )
        .await?;
        for row in fk_rows {
            let key = (row.get::<_, String>(0), row.get::<_, String>(1));
            let constraint: String = row.get(2);
            if let Some(table) = tables.get_mut(&key) {
                let column: String = row.get(3);
                let referenced_table: String = row.get(4);
                let referenced_column: String = row.get(5);
                match table
                    .foreign_keys
                    .iter_mut()
                    .find(|fk| fk.name.as_deref() == Some(constraint.as_str()))
                {
                    Some(fk) => {
                        fk.columns.push(column);
                        fk.referenced_columns.push(referenced_column);
                    }
                    None => table.foreign_keys.push(ForeignKeySchema {
                        name: Some(constraint),
                        columns: vec![column],
                        referenced_table,
                        referenced_columns: vec![referenced_column],
                    }),
                }
            }
        }

        // Indexes via pg_index (information_schema has no index view)
        let ix_rows = Self::query(
            &client,
            "SELECT n.nspname, t.relname, i.relname, ix.indisunique, a.attname \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             WHERE n.nspname = ANY($1) \
             ORDER BY n.nspname, t.relname, i.relname, a.attnum",
            &[schema_param],
            cancel,
        )
        .await?;
        for row in ix_rows {
            let key = (row.get::<_, String>(0), row.get::<_, String>(1));
            let index_name: String = row.get(2);
            if let Some(table) = tables.get_mut(&key) {
                let unique: bool = row.get(3);
                let column: String = row.get(4);
                match table
                    .indexes
                    .iter_mut()
                    .find(|ix| ix.name == index_name)
                {
                    Some(ix) => ix.columns.push(column),
                    None => table.indexes.push(IndexSchema {
                        name: index_name,
                        columns: vec![column],
                        unique,
                    }),
                }
            }
        }

        Ok(tables.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_both_schemes() {
        let connector = PostgresConnector;
        for scheme in ["postgresql", "postgres"] {
            let params = serde_json::json!({
                "connection_string": format!("{scheme}://u:p@localhost/db")
            });
            assert!(connector.validate_params(&params).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_missing_connection_string() {
        let connector = PostgresConnector;
        let err = connector
            .validate_params(&serde_json::json!({"host": "localhost"}))
            .unwrap_err();
        assert!(err.to_string().contains("connection_string"));
    }

    #[test]
    fn test_validate_rejects_foreign_scheme() {
        let connector = PostgresConnector;
        let err = connector
            .validate_params(&serde_json::json!({"connection_string": "mysql://u:p@h/db"}))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_network_ops_validate_before_io() {
        // A validation failure must surface as Validation, not as a
        // connection attempt against a bogus target.
        let connector = PostgresConnector;
        let cancel = CancellationToken::new();
        let params = serde_json::json!({"connection_string": "file:///etc/passwd"});
        for result in [
            connector.test_connection(&params, &cancel).await.err(),
            connector.metadata(&params, &cancel).await.err(),
        ] {
            assert!(matches!(result, Some(ConnectorError::Validation(_))));
        }
    }
}
