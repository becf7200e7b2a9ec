use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connector::SchemaOptions;
use crate::entity::connection;

// ---------- connection requests ----------

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub connector_type: String,
    /// The full parameter document, secrets included. Encrypted before it
    /// is written and never returned by any endpoint.
    pub connection_params: serde_json::Value,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    /// When present, replaces the entire stored parameter document.
    pub connection_params: Option<serde_json::Value>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListConnectionsQuery {
    pub connector_type: Option<String>,
}

// ---------- connection responses ----------

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub id: Uuid,
    pub name: String,
    pub connector_type: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<connection::Model> for ConnectionResponse {
    fn from(m: connection::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            connector_type: m.connector_type,
            description: m.description,
            is_active: m.is_active,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

// ---------- ad-hoc dispatch requests ----------

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub connector_type: String,
    pub connection_params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SchemaDispatchRequest {
    pub connector_type: String,
    pub connection_params: serde_json::Value,
    #[serde(default)]
    pub options: SchemaOptionsBody,
}

/// Body-side mirror of the query-string `SchemaOptions`.
#[derive(Debug, Default, Deserialize)]
pub struct SchemaOptionsBody {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub sheet: Option<String>,
}

impl From<SchemaOptionsBody> for SchemaOptions {
    fn from(b: SchemaOptionsBody) -> Self {
        Self {
            schema: b.schema,
            table: b.table,
            sheet: b.sheet,
        }
    }
}
