//! Remote store abstraction.
//!
//! The core never talks to a driver directly. A [`StoreConnector`] knows how to reach the
//! store behind a [`ConnectionRecord`]: it enumerates database names and opens a
//! [`StoreHandle`] scoped to one database. A handle is acquired per logical operation and must
//! be closed by its owner on every exit path; handles are never shared or pooled by the core.
//!
//! # Examples
//!
//! ```ignore
//! use docscope::backend::{StoreConnector, QueryOptions};
//! use bson::doc;
//!
//! let handle = connector.open(&connection, "shop").await?;
//! let docs = handle.find("orders", doc! { "status": "open" }, QueryOptions::default()).await;
//! handle.close().await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{catalog::ConnectionRecord, error::DocumentStoreResult};

/// Query modifiers applied by [`StoreHandle::find`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Projection document (`{field: 1}` includes, `{field: 0}` excludes).
    pub fields: Option<Document>,
    /// Sort document, keys in priority order, values `1` or `-1`.
    pub sort: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return. `Some(0)` means no limit.
    pub limit: Option<u64>,
}

impl QueryOptions {
    pub fn is_empty(&self) -> bool {
        self.fields.is_none() && self.sort.is_none() && self.skip.is_none() && self.limit.is_none()
    }
}

/// An open connection to one database of a remote document store.
///
/// Selectors and update payloads use the store's native query language. All calls are bounded
/// I/O; the handle performs no retries of its own.
#[async_trait]
pub trait StoreHandle: Send + Sync + Debug {
    /// The database this handle is scoped to.
    fn database_name(&self) -> &str;

    /// Lists the names of the collections in the database.
    async fn list_collection_names(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an empty collection.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Counts the documents of `collection` matching `selector`.
    async fn count(&self, collection: &str, selector: &Document) -> DocumentStoreResult<u64>;

    /// Returns the documents of `collection` matching `selector`, in store order unless
    /// `options.sort` says otherwise.
    async fn find(
        &self,
        collection: &str,
        selector: Document,
        options: QueryOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching `selector`, if any.
    async fn find_one(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>>;

    /// Inserts a document and returns its `_id`, generating one when the payload has none.
    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson>;

    /// Applies `update` to the first document matching `selector`.
    ///
    /// A payload whose keys are all update operators (`$set`, `$unset`, ...) modifies the
    /// document; any other payload replaces it, keeping its `_id`. Returns the matched count.
    async fn update(&self, collection: &str, selector: Document, update: Document) -> DocumentStoreResult<u64>;

    /// Removes the first document matching `selector` and returns it.
    async fn find_and_remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>>;

    /// Removes every document matching `selector` and returns how many were removed.
    async fn remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<u64>;

    /// Releases the handle and any resources behind it.
    async fn close(self: Box<Self>) -> DocumentStoreResult<()>;
}

/// Factory for [`StoreHandle`]s, one per remote store technology.
#[async_trait]
pub trait StoreConnector: Send + Sync + Debug {
    /// Lists the names of the databases reachable through `connection`.
    ///
    /// Failures to reach the store are reported as
    /// [`DocumentStoreError::StoreUnreachable`](crate::error::DocumentStoreError::StoreUnreachable).
    async fn list_database_names(&self, connection: &ConnectionRecord) -> DocumentStoreResult<Vec<String>>;

    /// Opens a handle scoped to `database` on `connection`.
    async fn open(&self, connection: &ConnectionRecord, database: &str) -> DocumentStoreResult<Box<dyn StoreHandle>>;
}

/// Factory trait for connectors that need asynchronous setup.
#[async_trait]
pub trait StoreConnectorBuilder {
    type Connector: StoreConnector;

    async fn build(self) -> DocumentStoreResult<Self::Connector>;
}

/// Closes a handle, logging instead of failing if the store reports an error on close.
///
/// Used on every exit path of an operation so the primary result is never masked.
pub async fn release(handle: Box<dyn StoreHandle>) {
    let database = handle.database_name().to_string();

    if let Err(e) = handle.close().await {
        tracing::warn!(database = %database, error = %e, "Failed to close store handle");
    }
}

/// Returns true when every key of `update` is an update operator.
pub fn is_operator_update(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|key| key.starts_with('$'))
}
