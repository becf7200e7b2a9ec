use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::connector::{SchemaOptions, TableSchema};
use crate::dispatch::TestReport;
use crate::repository::{ConnectionPatch, NewConnection};

use super::{
    ApiErr, AppState,
    auth::ApiKey,
    dto::{
        ConnectionResponse, CreateConnectionRequest, ListConnectionsQuery, UpdateConnectionRequest,
    },
};

// ---------- GET /connections ----------

pub async fn list_connections(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<Vec<ConnectionResponse>>, ApiErr> {
    let models = state
        .repo
        .list_all(query.connector_type.as_deref())
        .await?;
    Ok(Json(models.into_iter().map(ConnectionResponse::from).collect()))
}

// ---------- POST /connections ----------

pub async fn create_connection(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Json(body): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionResponse>), ApiErr> {
    let model = state
        .repo
        .create(NewConnection {
            name: body.name,
            connector_type: body.connector_type,
            params: body.connection_params,
            description: body.description,
        })
        .await?;

    tracing::info!(id = %model.id, connector_type = %model.connector_type, "connection created");

    Ok((StatusCode::CREATED, Json(model.into())))
}

// ---------- GET /connections/{id} ----------

pub async fn get_connection(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionResponse>, ApiErr> {
    let model = state.repo.get_by_id(id).await?;
    Ok(Json(model.into()))
}

// ---------- PUT /connections/{id} ----------

pub async fn update_connection(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionResponse>, ApiErr> {
    let model = state
        .repo
        .update(
            id,
            ConnectionPatch {
                name: body.name,
                params: body.connection_params,
                description: body.description,
            },
        )
        .await?;

    tracing::info!(id = %model.id, "connection updated");

    Ok(Json(model.into()))
}

// ---------- DELETE /connections/{id} ----------

pub async fn delete_connection(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiErr> {
    state.repo.delete(id).await?;
    tracing::info!(id = %id, "connection soft-deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------- POST /connections/{id}/test ----------

pub async fn test_connection(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<TestReport> {
    let report = state.dispatcher.test_by_connection(id).await;
    if !report.success {
        tracing::info!(id = %id, message = %report.message, "connection test failed");
    }
    Json(report)
}

// ---------- GET /connections/{id}/metadata ----------

pub async fn connection_metadata(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let metadata = state.dispatcher.metadata_by_connection(id).await?;
    Ok(Json(metadata))
}

// ---------- GET /connections/{id}/schema ----------

pub async fn connection_schema(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(options): Query<SchemaOptions>,
) -> Result<Json<Vec<TableSchema>>, ApiErr> {
    let tables = state.dispatcher.schema_by_connection(id, &options).await?;
    Ok(Json(tables))
}

// ---------- tests ----------
