use mongodb::Client;
use mongodb::bson::{Bson, Document, doc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    ColumnSchema, Connector, ConnectorError, ConnectorInfo, SchemaOptions, TableSchema,
    require_str,
};

/// MongoDB connector.
///
/// Collections have no declared schema; field layout is inferred from one
/// sampled document per collection. An unknown collection name in
/// `options.table` yields an empty result.
pub struct MongodbConnector;

impl MongodbConnector {
    fn check_params(params: &Value) -> Result<(), ConnectorError> {
        let uri = require_str(params, "uri")?;
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(ConnectorError::Validation(
                "uri must start with mongodb:// or mongodb+srv://".to_string(),
            ));
        }
        require_str(params, "database")?;
        Ok(())
    }

    async fn connect(params: &Value, cancel: &CancellationToken) -> Result<Client, ConnectorError> {
        Self::check_params(params)?;
        let uri = require_str(params, "uri")?;
        tokio::select! {
            res = Client::with_uri_str(uri) => {
                res.map_err(|e| ConnectorError::Connection(e.to_string()))
            }
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        }
    }

    fn bson_type_name(value: &Bson) -> &'static str {
        match value {
            Bson::Double(_) => "double",
            Bson::String(_) => "string",
            Bson::Document(_) => "object",
            Bson::Array(_) => "array",
            Bson::Boolean(_) => "boolean",
            Bson::Int32(_) | Bson::Int64(_) => "int",
            Bson::ObjectId(_) => "objectId",
            Bson::DateTime(_) => "date",
            Bson::Decimal128(_) => "decimal",
            Bson::Binary(_) => "binary",
            Bson::Null => "null",
            _ => "unknown",
        }
    }

    fn fields_from_sample(sample: &Document) -> Vec<ColumnSchema> {
        sample
            .iter()
            .map(|(name, value)| ColumnSchema {
                name: name.clone(),
                data_type: Self::bson_type_name(value).to_string(),
                nullable: true,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Connector for MongodbConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            connector_type: "mongodb",
            display_name: "MongoDB",
            description: "Connect to MongoDB document databases",
        }
    }

    fn validate_params(&self, params: &Value) -> Result<Value, ConnectorError> {
        Self::check_params(params)?;
        Ok(params.clone())
    }

    async fn test_connection(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError> {
        let client = Self::connect(params, cancel).await?;
        // The client connects lazily; ping forces a real round-trip.
        let admin_db = client.database("admin");
        tokio::select! {
            res = admin_db.run_command(doc! {"ping": 1}) => {
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
        let client = Self::connect(params, cancel).await?;
        let db_name = require_str(params, "database")?;

        let admin_db = client.database("admin");
        let build_info = tokio::select! {
            res = admin_db.run_command(doc! {"buildInfo": 1}) => {
                res.map_err(|e| ConnectorError::Connection(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
        };
        let version = build_info.get_str("version").unwrap_or("unknown");

        let target_db = client.database(db_name);
        let collections = tokio::select! {
            res = target_db.list_collection_names() => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
        };

        Ok(serde_json::json!({
            "type": "mongodb",
            "version": version,
            "database": db_name,
            "collection_count": collections.len(),
        }))
    }

    async fn schema(
        &self,
        params: &Value,
        options: &SchemaOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, ConnectorError> {
        let client = Self::connect(params, cancel).await?;
        let db = client.database(require_str(params, "database")?);

        let mut names = tokio::select! {
            res = db.list_collection_names() => {
                res.map_err(|e| ConnectorError::Query(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
        };
        names.sort();

        if let Some(wanted) = options.table.as_deref() {
            names.retain(|n| n == wanted);
        }

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            let collection = db.collection::<Document>(&name);

            let sample = tokio::select! {
                res = collection.find_one(doc! {}) => {
                    res.map_err(|e| ConnectorError::Query(e.to_string()))?
                }
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            };

            let count = tokio::select! {
                res = collection.estimated_document_count() => res.ok(),
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            };

            let mut table = TableSchema::new(
                name,
                sample.as_ref().map(Self::fields_from_sample).unwrap_or_default(),
            );
            table.row_count = count.map(|n| n as i64);
            result.push(table);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_uri_and_database() {
        let connector = MongodbConnector;
        assert!(
            connector
                .validate_params(&serde_json::json!({
                    "uri": "mongodb://localhost:27017",
                    "database": "app"
                }))
                .is_ok()
        );

        let err = connector
            .validate_params(&serde_json::json!({"uri": "mongodb://localhost"}))
            .unwrap_err();
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let connector = MongodbConnector;
        let err = connector
            .validate_params(&serde_json::json!({
                "uri": "http://localhost:27017",
                "database": "app"
            }))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[test]
    fn test_srv_scheme_accepted() {
        let connector = MongodbConnector;
        assert!(
            connector
                .validate_params(&serde_json::json!({
                    "uri": "mongodb+srv://cluster.example.net",
                    "database": "app"
                }))
                .is_ok()
        );
    }

    #[test]
    fn test_field_inference_maps_bson_types() {
        let sample = doc! {
            "_id": mongodb::bson::oid::ObjectId::new(),
            "name": "widget",
            "price": 9.99,
            "qty": 3_i32,
            "tags": ["a", "b"],
            "meta": {"color": "red"},
            "discontinued": false,
            "notes": Bson::Null,
        };
        let fields = MongodbConnector::fields_from_sample(&sample);
        let types: std::collections::HashMap<_, _> = fields
            .iter()
            .map(|f| (f.name.as_str(), f.data_type.as_str()))
            .collect();
        assert_eq!(types["_id"], "objectId");
        assert_eq!(types["name"], "string");
        assert_eq!(types["price"], "double");
        assert_eq!(types["qty"], "int");
        assert_eq!(types["tags"], "array");
        assert_eq!(types["meta"], "object");
        assert_eq!(types["discontinued"], "boolean");
        assert_eq!(types["notes"], "null");
    }
}
