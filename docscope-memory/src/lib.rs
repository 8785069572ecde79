//! In-memory backends for docscope.
//!
//! This crate provides an in-memory [`CatalogStore`](docscope_core::catalog::CatalogStore) and
//! an in-memory remote store reachable through a
//! [`StoreConnector`](docscope_core::backend::StoreConnector). Both use async-aware
//! read-write locks for concurrent access and are meant for development, tests and demos.
//!
//! # Features
//!
//! - **Catalog** - Atomic reset, upsert and sweep over connection, database and collection rows
//! - **Servers** - Named databases and collections of BSON documents kept in insertion order
//! - **Queries** - Selector matching, sorting, skip/limit and projection
//! - **Fault injection** - Unreachable servers and failing collection listings
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docscope_core::{catalog::{CatalogStore, ConnectionRecord}, reconcile::SchemaReconciler};
//! use docscope_memory::{InMemoryCatalog, InMemoryConnector, InMemoryServer};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = InMemoryServer::new();
//!     server.insert_documents("shop", "orders", vec![doc! { "total": 12 }]).await;
//!
//!     let connector = InMemoryConnector::new();
//!     connector.register("memory://local", server).await;
//!
//!     let catalog = InMemoryCatalog::new();
//!     let connection = ConnectionRecord::new("local", "memory://local");
//!     catalog.insert_connection(connection.clone()).await?;
//!
//!     let reconciler = SchemaReconciler::new(Arc::new(catalog), Arc::new(connector));
//!     reconciler.try_reconcile_connection(&connection.id).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docscope_memory;

pub mod catalog;
mod evaluator;
pub mod store;

pub use catalog::InMemoryCatalog;
pub use store::{InMemoryConnector, InMemoryConnectorBuilder, InMemoryHandle, InMemoryServer};
