use axum::{extract::State, response::Json};

use crate::connector::{ConnectorInfo, TableSchema};
use crate::dispatch::TestReport;

use super::{
    ApiErr, AppState,
    auth::ApiKey,
    dto::{DispatchRequest, SchemaDispatchRequest},
};

// ---------- GET /connector-types ----------

pub async fn list_connector_types(
    ApiKey: ApiKey,
    State(state): State<AppState>,
) -> Json<Vec<ConnectorInfo>> {
    Json(state.registry.list())
}

// ---------- POST /connectors/test ----------

pub async fn test_with_params(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Json(body): Json<DispatchRequest>,
) -> Json<TestReport> {
    Json(
        state
            .dispatcher
            .test_with_params(&body.connector_type, body.connection_params)
            .await,
    )
}

// ---------- POST /connectors/metadata ----------

pub async fn metadata_with_params(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let metadata = state
        .dispatcher
        .metadata_with_params(&body.connector_type, body.connection_params)
        .await?;
    Ok(Json(metadata))
}

// ---------- POST /connectors/schema ----------

pub async fn schema_with_params(
    ApiKey: ApiKey,
    State(state): State<AppState>,
    Json(body): Json<SchemaDispatchRequest>,
) -> Result<Json<Vec<TableSchema>>, ApiErr> {
    let tables = state
        .dispatcher
        .schema_with_params(
            &body.connector_type,
            body.connection_params,
            &body.options.into(),
        )
        .await?;
    Ok(Json(tables))
}

// ---------- tests ----------
