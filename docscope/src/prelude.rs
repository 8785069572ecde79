//! Convenient re-exports of commonly used types from docscope.
//!
//! ```ignore
//! use docscope::prelude::*;
//! ```
//!
//! This provides access to:
//! - Catalog records and the catalog store trait
//! - Store connectors, handles and their builders
//! - Reconciliation and document access
//! - Query building, pages and settings
//! - Error types

pub use docscope_core::{
    access::{DocumentAccess, ResolvedCollection},
    backend::{QueryOptions, StoreConnector, StoreConnectorBuilder, StoreHandle},
    catalog::{CatalogStore, CollectionRecord, ConnectionRecord, DatabaseRecord},
    document::{DOCUMENT_INDEX_FIELD, ID_FIELD},
    error::{CatalogKind, DocumentStoreError, DocumentStoreResult},
    page::{DocumentPage, Pagination},
    query::{QueryBuilder, ResolvedQuery},
    reconcile::{ReconcileReport, SchemaReconciler},
    settings::Settings,
};
