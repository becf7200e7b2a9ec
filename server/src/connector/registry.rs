use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Connector, ConnectorInfo};

#[derive(Debug)]
pub struct UnknownConnectorType(pub String);

impl fmt::Display for UnknownConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connector type '{}' is not registered", self.0)
    }
}

impl std::error::Error for UnknownConnectorType {}

/// Process-wide mapping from connector type tag to implementation.
///
/// Populated once in `main` before the first request and shared read-only
/// behind `Arc` afterwards — the single funnel all capability dispatch
/// passes through.
pub struct ConnectorRegistry {
    connectors: HashMap<&'static str, Arc<dyn Connector>>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Bind a connector under its declared type tag. Last registration
    /// wins; an overwrite almost always means a wiring bug, so it is
    /// logged loudly rather than rejected.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let tag = connector.info().connector_type;
        if self.connectors.insert(tag, connector).is_some() {
            tracing::warn!(
                connector_type = tag,
                "connector type registered twice; previous implementation replaced"
            );
        }
    }

    pub fn get(&self, connector_type: &str) -> Result<Arc<dyn Connector>, UnknownConnectorType> {
        self.connectors
            .get(connector_type)
            .cloned()
            .ok_or_else(|| UnknownConnectorType(connector_type.to_string()))
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.connectors.contains_key(connector_type)
    }

    /// Identities of every registered connector, ordered by type tag.
    pub fn list(&self) -> Vec<ConnectorInfo> {
        let mut infos: Vec<ConnectorInfo> = self.connectors.values().map(|c| c.info()).collect();
        infos.sort_by_key(|i| i.connector_type);
        infos
    }
}

/// Registry with every built-in connector bound, in the shape `main` uses.
pub fn builtin_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(super::postgres::PostgresConnector));
    registry.register(Arc::new(super::mysql::MysqlConnector));
    registry.register(Arc::new(super::mongodb::MongodbConnector));
    registry.register(Arc::new(super::redis::RedisConnector));
    registry.register(Arc::new(super::sheets::GoogleSheetsConnector));
    registry
}
