//! Document storage behind a driver-native session API.
//!
//! A [`Database`] hands out [`DbSession`]s; every read and write of a unit of
//! work goes through one session and becomes visible to other sessions only on
//! [`DbSession::commit`]. Two backends exist: Postgres JSONB tables through
//! sqlx, and an in-process store used by tests and the `memory://` scheme.

mod document;
mod memory;
mod postgres;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

pub use document::{
    document_id, document_version, lookup, Condition, Document, Filter, FindOptions, Operation,
    Sort, SortDirection, Update,
};
pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

use crate::config::DatabaseConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("duplicate document _id '{0}'")]
    Duplicate(String),
    #[error("invalid collection: {0}")]
    InvalidCollection(String),
    /// The update does not fit the stored document, such as a dotted path
    /// through a scalar.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("document has no string _id")]
    MissingId,
    #[error("unsupported database: {0}")]
    Unsupported(String),
    #[error("database error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Backend(err.to_string())
    }
}

/// A connection to a document store.
#[async_trait]
pub trait Database: Send + Sync {
    /// Short backend name reported by health checks.
    fn backend(&self) -> &'static str;

    async fn start_session(&self) -> Result<Box<dyn DbSession>, DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    /// Create the collection if the backend needs it declared up front.
    async fn ensure_collection(&self, name: &str) -> Result<(), DbError>;
}

/// One unit of work. Dropping a session without committing aborts it.
#[async_trait]
pub trait DbSession: Send {
    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError>;

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError>;

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, DbError>;

    /// Insert a document carrying a string `_id`.
    async fn insert_one(&mut self, collection: &str, document: Document)
        -> Result<Document, DbError>;

    /// Apply `update` to the first match and return the updated document.
    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, DbError>;

    /// Replace the first match, keeping its `_id`.
    async fn replace_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        replacement: Document,
    ) -> Result<Option<Document>, DbError>;

    /// Remove the first match and return it.
    async fn delete_one(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DbError>;

    /// Serialize this session against every other session that locks the
    /// same key, until this one ends. Backends whose sessions are already
    /// serialized need not override it.
    async fn lock(&mut self, _key: &str) -> Result<(), DbError> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn abort(self: Box<Self>) -> Result<(), DbError>;
}

/// Open the database named by the configured URI.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DbError> {
    let uri = url::Url::parse(&config.uri)
        .map_err(|e| DbError::Unsupported(format!("invalid database URI: {e}")))?;
    match uri.scheme() {
        "postgres" | "postgresql" => {
            let database = PgDatabase::connect(&config.uri, config.max_connections).await?;
            info!("Database connection pool established");
            Ok(Arc::new(database))
        }
        "memory" => {
            info!("Using in-process document store");
            Ok(Arc::new(MemoryDatabase::new()))
        }
        scheme => Err(DbError::Unsupported(format!(
            "scheme '{scheme}' is not supported"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let database = connect(&DatabaseConfig::default()).await.unwrap();
        assert_eq!(database.backend(), "memory");
        database.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = DatabaseConfig {
            uri: "mysql://localhost/cell".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            connect(&config).await,
            Err(DbError::Unsupported(_))
        ));
    }
}
