use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::set_header::response::SetResponseHeaderLayer;

use crate::connector::ConnectorError;
use crate::connector::registry::ConnectorRegistry;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::repository::{ConnectionRepository, RepoError};

pub mod auth;
pub mod capabilities;
pub mod connections;
pub mod dto;

// ---------- shared state ----------

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectorRegistry>,
    pub repo: Arc<ConnectionRepository>,
    pub dispatcher: Arc<Dispatcher>,
    pub api_key: String,
}

// ---------- error type ----------

/// A JSON error response: `{"error": "..."}` with an HTTP status.
pub struct ApiErr(StatusCode, String);

impl ApiErr {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self(status, msg.into())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self(StatusCode::CONFLICT, msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(StatusCode::UNAUTHORIZED, msg.into())
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self(StatusCode::UNPROCESSABLE_ENTITY, msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_GATEWAY, msg.into())
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.1 });
        (self.0, Json(body)).into_response()
    }
}

impl From<RepoError> for ApiErr {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiErr::not_found("Connection not found"),
            RepoError::DuplicateName(_) => ApiErr::conflict(e.to_string()),
            RepoError::UnknownConnectorType(_) => ApiErr::unprocessable(e.to_string()),
            RepoError::Crypto(_) | RepoError::Db(_) => ApiErr::internal(e),
        }
    }
}

impl From<DispatchError> for ApiErr {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Registry(e) => ApiErr::unprocessable(e.to_string()),
            DispatchError::Repo(e) => e.into(),
            DispatchError::Connector(ConnectorError::Validation(_)) => {
                ApiErr::unprocessable(e.to_string())
            }
            DispatchError::Connector(_) | DispatchError::Timeout(_) => {
                ApiErr::bad_gateway(e.to_string())
            }
        }
    }
}

// ---------- router ----------

pub fn api_router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    let allowed_origins: Vec<HeaderValue> = cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new() // no origins allowed = same-origin only
    } else {
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-api-key")])
    };

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api/v1", api_v1())
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .with_state(state)
}

fn api_v1() -> Router<AppState> {
    Router::new()
        // connector discovery
        .route(
            "/connector-types",
            get(capabilities::list_connector_types),
        )
        // stored connections
        .route(
            "/connections",
            get(connections::list_connections).post(connections::create_connection),
        )
        .route(
            "/connections/{id}",
            get(connections::get_connection)
                .put(connections::update_connection)
                .delete(connections::delete_connection),
        )
        .route("/connections/{id}/test", post(connections::test_connection))
        .route(
            "/connections/{id}/metadata",
            get(connections::connection_metadata),
        )
        .route(
            "/connections/{id}/schema",
            get(connections::connection_schema),
        )
        // ad-hoc dispatch with caller-supplied params
        .route("/connectors/test", post(capabilities::test_with_params))
        .route(
            "/connectors/metadata",
            post(capabilities::metadata_with_params),
        )
        .route("/connectors/schema", post(capabilities::schema_with_params))
}
