use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::connector::registry::ConnectorRegistry;
use crate::crypto::{CryptoError, EncryptionService};
use crate::entity::connection;

// ---------- errors ----------

#[derive(Debug)]
pub enum RepoError {
    /// Absent or soft-deleted — indistinguishable to callers.
    NotFound,
    DuplicateName(String),
    UnknownConnectorType(String),
    Crypto(CryptoError),
    Db(sea_orm::DbErr),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::NotFound => write!(f, "Connection not found"),
            RepoError::DuplicateName(name) => {
                write!(f, "A connection named '{name}' already exists")
            }
            RepoError::UnknownConnectorType(t) => {
                write!(f, "Connector type '{t}' is not registered")
            }
            RepoError::Crypto(e) => write!(f, "{e}"),
            RepoError::Db(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl std::error::Error for RepoError {}

/// Map a unique-violation on `ux_connection_active_name` to `DuplicateName`.
fn map_insert_err(name: &str, e: sea_orm::DbErr) -> RepoError {
    let msg = e.to_string();
    if msg.contains("UNIQUE") || msg.contains("unique") {
        RepoError::DuplicateName(name.to_string())
    } else {
        RepoError::Db(e)
    }
}

// ---------- inputs ----------

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub connector_type: String,
    pub params: serde_json::Value,
    pub description: Option<String>,
}

/// Partial update. `params`, when present, replaces the whole document —
/// merging is the caller's concern.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub params: Option<serde_json::Value>,
    pub description: Option<String>,
}

// ---------- repository ----------

/// Persistence for connection descriptors. Owns the encrypt-before-write /
/// decrypt-after-read boundary: parameter documents cross it encrypted in
/// every direction except `decrypted_params`.
pub struct ConnectionRepository {
    db: DatabaseConnection,
    crypto: Arc<EncryptionService>,
    registry: Arc<ConnectorRegistry>,
}

impl ConnectionRepository {
    pub fn new(
        db: DatabaseConnection,
        crypto: Arc<EncryptionService>,
        registry: Arc<ConnectorRegistry>,
    ) -> Self {
        Self {
            db,
            crypto,
            registry,
        }
    }

    /// Create a descriptor. The connector type must be registered
    /// (fail-fast at creation rather than at first dispatch). Stores the
    /// supplied params verbatim, encrypted as one document.
    pub async fn create(&self, new: NewConnection) -> Result<connection::Model, RepoError> {
        if !self.registry.contains(&new.connector_type) {
            return Err(RepoError::UnknownConnectorType(new.connector_type));
        }

        let token = self
            .crypto
            .encrypt_params(&new.params)
            .map_err(RepoError::Crypto)?;

        let now = Utc::now().naive_utc();
        let name = new.name.clone();

        connection::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(new.name),
            connector_type: Set(new.connector_type),
            connection_params: Set(token),
            description: Set(new.description),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(|e| map_insert_err(&name, e))
    }

    /// Active descriptors only; soft-deleted rows read as `NotFound`.
    pub async fn get_by_id(&self, id: Uuid) -> Result<connection::Model, RepoError> {
        connection::Entity::find_by_id(id)
            .filter(connection::Column::IsActive.eq(true))
            .one(&self.db)
            .await
            .map_err(RepoError::Db)?
            .ok_or(RepoError::NotFound)
    }

    /// By-id lookup that ignores the soft-delete flag. Audit use only;
    /// params stay encrypted.
    pub async fn find_for_audit(&self, id: Uuid) -> Result<Option<connection::Model>, RepoError> {
        connection::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(RepoError::Db)
    }

    pub async fn list_all(
        &self,
        connector_type: Option<&str>,
    ) -> Result<Vec<connection::Model>, RepoError> {
        let mut query =
            connection::Entity::find().filter(connection::Column::IsActive.eq(true));

        if let Some(ctype) = connector_type {
            query = query.filter(connection::Column::ConnectorType.eq(ctype));
        }

        query
            .order_by_asc(connection::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(RepoError::Db)
    }

    /// Replace only the supplied fields. A supplied `params` replaces the
    /// entire document and is re-encrypted; a name change is re-checked
    /// against the active-name index.
    pub async fn update(
        &self,
        id: Uuid,
        patch: ConnectionPatch,
    ) -> Result<connection::Model, RepoError> {
        let model = self.get_by_id(id).await?;
        let mut active: connection::ActiveModel = model.into();

        let mut new_name = None;
        if let Some(name) = patch.name {
            new_name = Some(name.clone());
            active.name = Set(name);
        }
        if let Some(params) = patch.params {
            let token = self
                .crypto
                .encrypt_params(&params)
                .map_err(RepoError::Crypto)?;
            active.connection_params = Set(token);
        }
        if let Some(description) = patch.description {
            active.description = Set(Some(description));
        }

        active.updated_at = Set(Utc::now().naive_utc());
        active
            .update(&self.db)
            .await
            .map_err(|e| map_insert_err(new_name.as_deref().unwrap_or(""), e))
    }

    /// Soft-delete: the single place the `active → deleted` transition is
    /// made. Deleting an already-inactive id fails with `NotFound`.
    pub async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let model = self.get_by_id(id).await?;
        let mut active: connection::ActiveModel = model.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().naive_utc());
        active.update(&self.db).await.map_err(RepoError::Db)?;
        Ok(())
    }

    /// The only path that returns secrets in the clear. Callers must treat
    /// the result as short-lived and never log or persist it.
    pub async fn decrypted_params(&self, id: Uuid) -> Result<serde_json::Value, RepoError> {
        let model = self.get_by_id(id).await?;
        self.crypto
            .decrypt_params(&model.connection_params)
            .map_err(RepoError::Crypto)
    }
}

// ---------- tests ----------
