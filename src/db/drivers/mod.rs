// Database drivers
// Concrete Connection implementations per engine

pub mod postgres;

pub use postgres::PgConnection;

use crate::db::registry::ConnectionFactory;
use crate::db::traits::EngineKind;

/// Register every driver this build links. Engine kinds without a driver
/// keep the registry's placeholder behavior.
pub fn register_builtin(factory: ConnectionFactory) -> ConnectionFactory {
    factory.with_driver(EngineKind::Postgres, PgConnection::constructor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{Connection, ConnectionProfile};
    use crate::secrets::MemoryPasswordStore;
    use std::sync::Arc;

    #[test]
    fn test_builtin_registration_covers_postgres_only() {
        let factory =
            register_builtin(ConnectionFactory::new(Arc::new(MemoryPasswordStore::new())));

        assert!(factory.has_driver(EngineKind::Postgres));
        assert!(!factory.has_driver(EngineKind::Mysql));
        assert!(!factory.has_driver(EngineKind::Mssql));
        assert!(!factory.has_driver(EngineKind::Sqlite));
    }

    #[test]
    fn test_factory_constructs_postgres_driver() {
        let resolver = Arc::new(MemoryPasswordStore::with_secret("profile-1", "hunter2"));
        let factory = register_builtin(ConnectionFactory::new(resolver));
        let mut profile = ConnectionProfile::new(EngineKind::Postgres, "localhost", "app");
        profile.password_ref = Some("profile-1".to_string());

        let conn = factory.make_connection(profile);
        assert_eq!(conn.engine_kind(), EngineKind::Postgres);
    }
}
