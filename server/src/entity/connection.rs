use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connection")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Unique across active rows (partial index `ux_connection_active_name`).
    pub name: String,
    /// Registry tag (postgresql, mysql, mongodb, redis, google_sheets).
    /// Immutable after creation.
    pub connector_type: String,
    /// The whole parameter document, serialized and encrypted as one
    /// AES-256-GCM base64 token (plaintext JSON when encryption is off).
    pub connection_params: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
