//! Main docscope crate: browse and edit remote document stores through a local catalog.
//!
//! This crate is the primary entry point. It re-exports the core types from `docscope-core`
//! and gives access to the available backends.
//!
//! # Features
//!
//! - **Catalog reconciliation** - Keep a local catalog of connections, databases and
//!   collections in step with the live stores through mark-and-sweep passes
//! - **Safe filters** - Operator-typed filters are read by a strict literal parser, never evaluated
//! - **Paginated browsing** - Bounded pages of documents with stable display indices
//! - **Document editing** - Insert, update, remove and bulk-empty through short-lived handles
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docscope::{prelude::*, memory::{InMemoryCatalog, InMemoryConnector, InMemoryServer}};
//! use docscope::bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let server = InMemoryServer::new();
//!     server.insert_documents("shop", "orders", vec![doc! { "status": "open" }]).await;
//!
//!     let connector = Arc::new(InMemoryConnector::new());
//!     connector.register("memory://local", server).await;
//!
//!     let catalog = Arc::new(InMemoryCatalog::new());
//!     let connection = ConnectionRecord::new("local", "memory://local");
//!     catalog.insert_connection(connection.clone()).await?;
//!
//!     // Mirror the live databases and collections into the catalog
//!     let reconciler = SchemaReconciler::new(catalog.clone(), connector.clone());
//!     reconciler.try_reconcile_connection(&connection.id).await?;
//!
//!     let database = &catalog.list_databases(&connection.id).await?[0];
//!     let orders = &catalog.list_collections(&database.id).await?[0];
//!
//!     // Browse the first page of open orders
//!     let access = DocumentAccess::new(catalog, connector, QueryBuilder::new(Settings::from_env()));
//!     let page = access.list_documents(&orders.id, "{status: 'open'}", 1).await?;
//!
//!     println!("{} of {} documents", page.docs.len(), page.total_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory catalog and store for development and testing
//! - [`mongodb`] - MongoDB connector (requires `mongodb` feature)

pub mod prelude;

pub use docscope_core::{
    access, backend, catalog, document, error, literal, page, query, reconcile, settings,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory backend implementations.
pub mod memory {
    pub use docscope_memory::{
        InMemoryCatalog, InMemoryConnector, InMemoryConnectorBuilder, InMemoryHandle, InMemoryServer,
    };
}

/// MongoDB backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docscope_mongodb::{MongoConnector, MongoConnectorBuilder, MongoHandle};
}
