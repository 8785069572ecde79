//! The locally cached catalog of connections, databases and collections.
//!
//! The catalog mirrors the structure of the remote stores: a [`ConnectionRecord`] owns
//! [`DatabaseRecord`]s which own [`CollectionRecord`]s. Database and collection rows carry a
//! `keep` liveness flag used by the reconciliation engine's mark-and-sweep passes.
//!
//! Persistence of the catalog is abstracted behind the [`CatalogStore`] trait. Every method of
//! the trait must be applied atomically: a reset, an upsert or a sweep is never observed
//! half-done by a concurrent caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::error::DocumentStoreResult;

/// A configured remote store endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Connection parameters handed verbatim to the store connector.
    pub uri: String,
}

impl ConnectionRecord {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// A database observed under one connection. Unique per `(connection_id, name)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseRecord {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub keep: bool,
}

/// A collection observed under one database. Unique per `(database_id, name)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub id: Uuid,
    pub database_id: Uuid,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub keep: bool,
    /// Documents per page for this collection, overriding the global setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_limit: Option<i64>,
}

impl CollectionRecord {
    /// Creates a freshly seen collection row with the liveness flag set.
    pub fn new(database_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            database_id,
            name: name.into(),
            updated_at: Utc::now(),
            keep: true,
            pagination_limit: None,
        }
    }
}

/// Key-value persistence for catalog records.
///
/// Upserts are keyed by natural key: `(connection_id, name)` for databases and
/// `(database_id, name)` for collections. An upsert always sets `keep = true` and refreshes
/// `updated_at`, preserving the record id and any other attribute of an existing row.
#[async_trait]
pub trait CatalogStore: Send + Sync + Debug {
    /// Adds a connection record. Connections are configuration, the engine never writes them.
    async fn insert_connection(&self, connection: ConnectionRecord) -> DocumentStoreResult<()>;

    async fn get_connection(&self, id: &Uuid) -> DocumentStoreResult<Option<ConnectionRecord>>;

    async fn list_connections(&self) -> DocumentStoreResult<Vec<ConnectionRecord>>;

    async fn get_database(&self, id: &Uuid) -> DocumentStoreResult<Option<DatabaseRecord>>;

    /// Lists the databases owned by a connection, ordered by name.
    async fn list_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<Vec<DatabaseRecord>>;

    /// Sets `keep = false` on every database of the connection. Returns the number of rows touched.
    async fn reset_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<usize>;

    /// Inserts or revives the database `(connection_id, name)` and returns the stored row.
    async fn upsert_database(
        &self,
        connection_id: &Uuid,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> DocumentStoreResult<DatabaseRecord>;

    /// Removes every database of the connection still flagged `keep = false`, together with
    /// all of their collections. Returns the removed database rows.
    async fn sweep_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<Vec<DatabaseRecord>>;

    /// Adds a collection row as-is. Fails if `(database_id, name)` is already present.
    async fn insert_collection(&self, collection: CollectionRecord) -> DocumentStoreResult<()>;

    async fn get_collection(&self, id: &Uuid) -> DocumentStoreResult<Option<CollectionRecord>>;

    /// Lists the collections owned by a database, ordered by name.
    async fn list_collections(&self, database_id: &Uuid) -> DocumentStoreResult<Vec<CollectionRecord>>;

    /// Sets `keep = false` on every collection of the database. Returns the number of rows touched.
    async fn reset_collections(&self, database_id: &Uuid) -> DocumentStoreResult<usize>;

    /// Inserts or revives the collection `(database_id, name)` and returns the stored row.
    async fn upsert_collection(
        &self,
        database_id: &Uuid,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> DocumentStoreResult<CollectionRecord>;

    /// Removes every collection of the database still flagged `keep = false`.
    /// Returns the removed collection rows.
    async fn sweep_collections(&self, database_id: &Uuid) -> DocumentStoreResult<Vec<CollectionRecord>>;

    /// Sets or clears the per-collection pagination override.
    async fn set_pagination_limit(&self, collection_id: &Uuid, limit: Option<i64>) -> DocumentStoreResult<()>;
}
