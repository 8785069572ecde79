//! Catalog reconciliation and generic document access over remote document stores.
//!
//! This crate is the core of the docscope project and provides:
//!
//! - **Catalog model** ([`catalog`]) - Connection, database and collection records and the
//!   [`CatalogStore`](catalog::CatalogStore) persistence trait
//! - **Store abstraction** ([`backend`]) - Traits for reaching remote stores and running queries
//! - **Schema reconciliation** ([`reconcile`]) - Mark-and-sweep sync of the catalog with live stores
//! - **Query building** ([`query`], [`literal`]) - Safe parsing of operator-typed filters into bounded queries
//! - **Document access** ([`access`]) - Paginated listing and mutation of documents by catalog id
//! - **Settings** ([`settings`]) - Process-wide defaults such as the page size
//! - **Error handling** ([`error`]) - Error kinds and result types
//!
//! # Example
//!
//! ```ignore
//! use docscope::prelude::*;
//! use docscope::memory::{InMemoryCatalog, InMemoryConnector};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let connector = Arc::new(InMemoryConnector::new());
//!
//! let reconciler = SchemaReconciler::new(catalog.clone(), connector.clone());
//! reconciler.reconcile_all().await?;
//!
//! let access = DocumentAccess::new(catalog, connector, QueryBuilder::new(Settings::from_env()));
//! let page = access.list_documents(&collection_id, "{age: {$gte: 18}}", 1).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docscope_core;

pub mod access;
pub mod backend;
pub mod catalog;
pub mod document;
pub mod error;
pub mod literal;
pub mod page;
pub mod query;
pub mod reconcile;
pub mod settings;
