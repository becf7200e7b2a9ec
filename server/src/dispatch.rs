use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connector::registry::{ConnectorRegistry, UnknownConnectorType};
use crate::connector::{Connector, ConnectorError, SchemaOptions, TableSchema};
use crate::repository::{ConnectionRepository, RepoError};

// ---------- results ----------

/// Uniform outcome of a connectivity test. A failed probe is a normal
/// result, not an error — `test_*` never returns `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,
}

// ---------- errors ----------

#[derive(Debug)]
pub enum DispatchError {
    Registry(UnknownConnectorType),
    Repo(RepoError),
    Connector(ConnectorError),
    Timeout(Duration),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Registry(e) => write!(f, "{e}"),
            DispatchError::Repo(e) => write!(f, "{e}"),
            DispatchError::Connector(e) => write!(f, "{e}"),
            DispatchError::Timeout(d) => {
                write!(f, "Operation timed out after {d:?}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

// ---------- façade ----------

/// Resolves a connector (via the registry) and parameters (from the
/// repository, decrypting, or caller-supplied) and invokes one capability.
///
/// Every invocation runs under a bounded timeout; on expiry the per-call
/// cancellation token fires and the in-flight future is dropped, so the
/// backend connection is released.
pub struct Dispatcher {
    registry: Arc<ConnectorRegistry>,
    repo: Arc<ConnectionRepository>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        repo: Arc<ConnectionRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            repo,
            timeout,
        }
    }

    async fn resolve_stored(
        &self,
        id: Uuid,
    ) -> Result<(Arc<dyn Connector>, serde_json::Value), DispatchError> {
        let model = self.repo.get_by_id(id).await.map_err(DispatchError::Repo)?;
        let connector = self
            .registry
            .get(&model.connector_type)
            .map_err(DispatchError::Registry)?;
        let params = self
            .repo
            .decrypted_params(id)
            .await
            .map_err(DispatchError::Repo)?;
        Ok((connector, params))
    }

    async fn bounded<T, F>(
        &self,
        fut: F,
        cancel: &CancellationToken,
    ) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, ConnectorError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(DispatchError::Connector),
            Err(_) => {
                cancel.cancel();
                Err(DispatchError::Timeout(self.timeout))
            }
        }
    }

    async fn run_test(
        &self,
        connector: Arc<dyn Connector>,
        params: serde_json::Value,
    ) -> TestReport {
        let cancel = CancellationToken::new();
        match self
            .bounded(connector.test_connection(&params, &cancel), &cancel)
            .await
        {
            Ok(()) => TestReport {
                success: true,
                message: format!(
                    "Successfully connected to {}",
                    connector.info().display_name
                ),
            },
            Err(e) => TestReport {
                success: false,
                message: format!("Connection failed: {e}"),
            },
        }
    }

    // ---------- test (never throws) ----------

    pub async fn test_by_connection(&self, id: Uuid) -> TestReport {
        match self.resolve_stored(id).await {
            Ok((connector, params)) => self.run_test(connector, params).await,
            Err(e) => TestReport {
                success: false,
                message: e.to_string(),
            },
        }
    }

    pub async fn test_with_params(
        &self,
        connector_type: &str,
        params: serde_json::Value,
    ) -> TestReport {
        match self.registry.get(connector_type) {
            Ok(connector) => self.run_test(connector, params).await,
            Err(e) => TestReport {
                success: false,
                message: e.to_string(),
            },
        }
    }

    // ---------- metadata / schema (propagate) ----------

    pub async fn metadata_by_connection(
        &self,
        id: Uuid,
    ) -> Result<serde_json::Value, DispatchError> {
        let (connector, params) = self.resolve_stored(id).await?;
        let cancel = CancellationToken::new();
        self.bounded(connector.metadata(&params, &cancel), &cancel)
            .await
    }

    pub async fn metadata_with_params(
        &self,
        connector_type: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let connector = self
            .registry
            .get(connector_type)
            .map_err(DispatchError::Registry)?;
        let cancel = CancellationToken::new();
        self.bounded(connector.metadata(&params, &cancel), &cancel)
            .await
    }

    pub async fn schema_by_connection(
        &self,
        id: Uuid,
        options: &SchemaOptions,
    ) -> Result<Vec<TableSchema>, DispatchError> {
        let (connector, params) = self.resolve_stored(id).await?;
        let cancel = CancellationToken::new();
        self.bounded(connector.schema(&params, options, &cancel), &cancel)
            .await
    }

    pub async fn schema_with_params(
        &self,
        connector_type: &str,
        params: serde_json::Value,
        options: &SchemaOptions,
    ) -> Result<Vec<TableSchema>, DispatchError> {
        let connector = self
            .registry
            .get(connector_type)
            .map_err(DispatchError::Registry)?;
        let cancel = CancellationToken::new();
        self.bounded(connector.schema(&params, options, &cancel), &cancel)
            .await
    }
}

// ---------- tests ----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::registry::builtin_registry;
    use crate::connector::{ConnectorInfo, SchemaOptions};
    use crate::crypto::EncryptionService;
    use crate::repository::NewConnection;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::Value;

    /// Test double: succeeds or fails on command, echoes params as
    /// metadata, optionally sleeps past any deadline.
    struct ScriptedConnector {
        tag: &'static str,
        fail_with: Option<&'static str>,
        delay: Option<Duration>,
    }

    impl ScriptedConnector {
        fn ok(tag: &'static str) -> Self {
            Self {
                tag,
                fail_with: None,
                delay: None,
            }
        }

        fn failing(tag: &'static str, reason: &'static str) -> Self {
            Self {
                tag,
                fail_with: Some(reason),
                delay: None,
            }
        }

        fn slow(tag: &'static str, delay: Duration) -> Self {
            Self {
                tag,
                fail_with: None,
                delay: Some(delay),
            }
        }

        async fn act(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                }
            }
            match self.fail_with {
                Some(reason) => Err(ConnectorError::Connection(reason.to_string())),
                None => Ok(()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        fn info(&self) -> ConnectorInfo {
            ConnectorInfo {
                connector_type: self.tag,
                display_name: "Scripted",
                description: "test double",
            }
        }

        fn validate_params(&self, params: &Value) -> Result<Value, ConnectorError> {
            Ok(params.clone())
        }

        async fn test_connection(
            &self,
            _params: &Value,
            cancel: &CancellationToken,
        ) -> Result<(), ConnectorError> {
            self.act(cancel).await
        }

        async fn metadata(
            &self,
            params: &Value,
            cancel: &CancellationToken,
        ) -> Result<Value, ConnectorError> {
            self.act(cancel).await?;
            Ok(params.clone())
        }

        async fn schema(
            &self,
            _params: &Value,
            _options: &SchemaOptions,
            cancel: &CancellationToken,
        ) -> Result<Vec<TableSchema>, ConnectorError> {
            self.act(cancel).await?;
            Ok(vec![TableSchema::new("scripted", Vec::new())])
        }
    }

    async fn dispatcher_with(
        connectors: Vec<ScriptedConnector>,
        timeout: Duration,
    ) -> (Dispatcher, Arc<ConnectionRepository>) {
        let mut registry = ConnectorRegistry::new();
        for connector in connectors {
            registry.register(Arc::new(connector));
        }
        let registry = Arc::new(registry);

        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = Arc::new(ConnectionRepository::new(
            db,
            Arc::new(EncryptionService::new("dispatch-test-secret")),
            registry.clone(),
        ));

        (
            Dispatcher::new(registry, repo.clone(), timeout),
            repo,
        )
    }

    #[tokio::test]
    async fn test_with_params_reports_success() {
        let (dispatcher, _repo) =
            dispatcher_with(vec![ScriptedConnector::ok("stub")], Duration::from_secs(5)).await;
        let report = dispatcher
            .test_with_params("stub", serde_json::json!({}))
            .await;
        assert!(report.success);
        assert!(report.message.contains("Successfully connected"));
    }

    #[tokio::test]
    async fn test_with_params_unknown_type_is_a_result_not_an_error() {
        let (dispatcher, _repo) = dispatcher_with(vec![], Duration::from_secs(5)).await;
        let report = dispatcher
            .test_with_params("oracle", serde_json::json!({}))
            .await;
        assert!(!report.success);
        assert!(report.message.contains("not registered"));
    }

    #[tokio::test]
    async fn test_backend_refusal_folds_into_report() {
        let (dispatcher, _repo) = dispatcher_with(
            vec![ScriptedConnector::failing("stub", "connection refused")],
            Duration::from_secs(5),
        )
        .await;
        let report = dispatcher
            .test_with_params("stub", serde_json::json!({}))
            .await;
        assert!(!report.success);
        assert!(report.message.contains("Connection failed"));
        assert!(report.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_deadline_folds_into_report() {
        let (dispatcher, _repo) = dispatcher_with(
            vec![ScriptedConnector::slow("stub", Duration::from_secs(60))],
            Duration::from_millis(50),
        )
        .await;
        let report = dispatcher
            .test_with_params("stub", serde_json::json!({}))
            .await;
        assert!(!report.success);
        assert!(report.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_metadata_deadline_propagates_as_error() {
        let (dispatcher, _repo) = dispatcher_with(
            vec![ScriptedConnector::slow("stub", Duration::from_secs(60))],
            Duration::from_millis(50),
        )
        .await;
        let err = dispatcher
            .metadata_with_params("stub", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_by_connection_round_trips_decrypted_params() {
        let (dispatcher, repo) =
            dispatcher_with(vec![ScriptedConnector::ok("stub")], Duration::from_secs(5)).await;

        let params = serde_json::json!({"host": "db.internal", "password": "pw"});
        let model = repo
            .create(NewConnection {
                name: "echo".to_string(),
                connector_type: "stub".to_string(),
                params: params.clone(),
                description: None,
            })
            .await
            .unwrap();

        // The scripted connector echoes its params back as metadata, so
        // this proves the façade handed it the decrypted document.
        let metadata = dispatcher.metadata_by_connection(model.id).await.unwrap();
        assert_eq!(metadata, params);

        let report = dispatcher.test_by_connection(model.id).await;
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_by_connection_missing_descriptor() {
        let (dispatcher, _repo) =
            dispatcher_with(vec![ScriptedConnector::ok("stub")], Duration::from_secs(5)).await;

        let report = dispatcher.test_by_connection(Uuid::now_v7()).await;
        assert!(!report.success, "test never throws, even for a missing id");

        let err = dispatcher
            .metadata_by_connection(Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Repo(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_schema_by_connection_dispatches() {
        let (dispatcher, repo) =
            dispatcher_with(vec![ScriptedConnector::ok("stub")], Duration::from_secs(5)).await;
        let model = repo
            .create(NewConnection {
                name: "s".to_string(),
                connector_type: "stub".to_string(),
                params: serde_json::json!({}),
                description: None,
            })
            .await
            .unwrap();

        let tables = dispatcher
            .schema_by_connection(model.id, &SchemaOptions::default())
            .await
            .unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "scripted");
    }

    /// Spec scenario: a descriptor pointing at an unreachable host yields a
    /// structured failure, not an error.
    #[tokio::test]
    async fn test_unreachable_postgres_host_reports_failure() {
        let registry = Arc::new(builtin_registry());
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = Arc::new(ConnectionRepository::new(
            db,
            Arc::new(EncryptionService::new("dispatch-test-secret")),
            registry.clone(),
        ));
        let dispatcher = Dispatcher::new(registry, repo.clone(), Duration::from_secs(5));

        let model = repo
            .create(NewConnection {
                name: "prod-pg".to_string(),
                connector_type: "postgresql".to_string(),
                // Port 1 is never listening; connect fails immediately
                params: serde_json::json!({
                    "connection_string": "postgresql://u:p@127.0.0.1:1/db"
                }),
                description: None,
            })
            .await
            .unwrap();

        let report = dispatcher.test_by_connection(model.id).await;
        assert!(!report.success);
        assert!(report.message.contains("Connection failed"), "got: {}", report.message);
    }
}
