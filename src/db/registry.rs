// Connection factory registry
// Maps an engine kind to a driver constructor, with a placeholder default

use crate::db::schema::{MetadataScope, Schema};
use crate::db::traits::{
    Connection, ConnectionProfile, DatabaseError, EngineKind, Transaction, TransactionOptions,
};
use crate::db::value::{QueryRequest, QueryResult};
use crate::secrets::CredentialResolver;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a connection for a profile. Constructors capture no mutable
/// state, so a registry can be shared freely across threads.
pub type DriverConstructor =
    Arc<dyn Fn(ConnectionProfile, Arc<dyn CredentialResolver>) -> Arc<dyn Connection> + Send + Sync>;

/// Registry of driver constructors keyed by engine kind.
///
/// Registration is builder-style and value-returning; the registry is
/// read-only once built. Kinds without a registered constructor fall back
/// to a placeholder connection that deterministically fails every
/// operation, so the surrounding application never special-cases
/// "unsupported" engines.
pub struct ConnectionFactory {
    constructors: HashMap<EngineKind, DriverConstructor>,
    resolver: Arc<dyn CredentialResolver>,
}

impl ConnectionFactory {
    /// Empty registry: every kind resolves to the placeholder.
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self { constructors: HashMap::new(), resolver }
    }

    /// Register a constructor for a kind, fully shadowing the placeholder
    /// default for that kind.
    pub fn with_driver(mut self, kind: EngineKind, constructor: DriverConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    /// Construct a connection for the profile's engine kind.
    pub fn make_connection(&self, profile: ConnectionProfile) -> Arc<dyn Connection> {
        let kind = profile.engine;
        match self.constructors.get(&kind) {
            Some(constructor) => constructor(profile, Arc::clone(&self.resolver)),
            None => Arc::new(PlaceholderConnection::new(
                kind,
                format!("no driver registered for {}", kind),
            )),
        }
    }

    pub fn has_driver(&self, kind: EngineKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// All engine kinds with a registered constructor.
    pub fn supported_kinds(&self) -> Vec<EngineKind> {
        self.constructors.keys().copied().collect()
    }
}

/// A connection that fails every operation with `DriverUnavailable`.
///
/// Lets the application wire connection UI for engines whose driver is not
/// linked yet.
pub struct PlaceholderConnection {
    kind: EngineKind,
    reason: String,
}

impl PlaceholderConnection {
    pub fn new(kind: EngineKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }

    fn unavailable(&self) -> DatabaseError {
        DatabaseError::DriverUnavailable { kind: self.kind, reason: self.reason.clone() }
    }
}

#[async_trait::async_trait]
impl crate::db::traits::QueryExecutor for PlaceholderConnection {
    async fn execute(&self, _request: &QueryRequest) -> Result<QueryResult, DatabaseError> {
        Err(self.unavailable())
    }
}

#[async_trait::async_trait]
impl crate::db::traits::MetadataProvider for PlaceholderConnection {
    async fn metadata(&self, _scope: &MetadataScope) -> Result<Schema, DatabaseError> {
        Err(self.unavailable())
    }
}

#[async_trait::async_trait]
impl Connection for PlaceholderConnection {
    fn engine_kind(&self) -> EngineKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), DatabaseError> {
        Err(self.unavailable())
    }

    async fn disconnect(&self) -> Result<(), DatabaseError> {
        Err(self.unavailable())
    }

    async fn is_connected(&self) -> bool {
        false
    }

    async fn begin_transaction(
        &self,
        _options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, DatabaseError> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{MetadataProvider, QueryExecutor};
    use crate::secrets::MemoryPasswordStore;

    // Mock connection for registration tests
    struct MockConnection {
        kind: EngineKind,
    }

    #[async_trait::async_trait]
    impl QueryExecutor for MockConnection {
        async fn execute(&self, _request: &QueryRequest) -> Result<QueryResult, DatabaseError> {
            Ok(QueryResult::empty())
        }
    }

    #[async_trait::async_trait]
    impl MetadataProvider for MockConnection {
        async fn metadata(&self, _scope: &MetadataScope) -> Result<Schema, DatabaseError> {
            Ok(Schema::empty())
        }
    }

    #[async_trait::async_trait]
    impl Connection for MockConnection {
        fn engine_kind(&self) -> EngineKind {
            self.kind
        }

        async fn connect(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn begin_transaction(
            &self,
            _options: TransactionOptions,
        ) -> Result<Box<dyn Transaction>, DatabaseError> {
            Err(DatabaseError::NotConnected)
        }
    }

    fn factory() -> ConnectionFactory {
        ConnectionFactory::new(Arc::new(MemoryPasswordStore::new()))
    }

    fn assert_unavailable(result: Result<impl Sized, DatabaseError>, expected: EngineKind) {
        match result {
            Err(DatabaseError::DriverUnavailable { kind, .. }) => assert_eq!(kind, expected),
            other => panic!("expected DriverUnavailable, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_unregistered_kind_gets_placeholder() {
        let factory = factory();
        let profile = ConnectionProfile::new(EngineKind::Mysql, "localhost", "app");
        let conn = factory.make_connection(profile);

        assert_eq!(conn.engine_kind(), EngineKind::Mysql);
        assert!(!conn.is_connected().await);
        assert_unavailable(conn.connect().await, EngineKind::Mysql);
        assert_unavailable(conn.execute(&QueryRequest::new("SELECT 1")).await, EngineKind::Mysql);
        assert_unavailable(conn.metadata(&MetadataScope::default()).await, EngineKind::Mysql);
        assert_unavailable(
            conn.begin_transaction(TransactionOptions::default()).await.map(|_| ()),
            EngineKind::Mysql,
        );
    }

    #[tokio::test]
    async fn test_registered_constructor_shadows_placeholder() {
        let factory = factory().with_driver(
            EngineKind::Mysql,
            Arc::new(|profile, _resolver| Arc::new(MockConnection { kind: profile.engine })),
        );

        let profile = ConnectionProfile::new(EngineKind::Mysql, "localhost", "app");
        let conn = factory.make_connection(profile);

        assert!(conn.connect().await.is_ok());
        assert!(conn.execute(&QueryRequest::new("SELECT 1")).await.is_ok());
    }

    #[test]
    fn test_supported_kinds_reflect_registration() {
        let factory = factory().with_driver(
            EngineKind::Postgres,
            Arc::new(|profile, _resolver| Arc::new(MockConnection { kind: profile.engine })),
        );

        assert!(factory.has_driver(EngineKind::Postgres));
        assert!(!factory.has_driver(EngineKind::Sqlite));
        assert_eq!(factory.supported_kinds(), vec![EngineKind::Postgres]);
    }

    #[tokio::test]
    async fn test_factory_is_shareable_across_tasks() {
        let factory = Arc::new(factory());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = Arc::clone(&factory);
                tokio::spawn(async move {
                    let profile = ConnectionProfile::new(EngineKind::Mssql, "localhost", "app");
                    let conn = factory.make_connection(profile);
                    conn.connect().await.is_err()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }
}
