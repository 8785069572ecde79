//! Error types and result types for catalog and document operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`]. The variants are
//! split so callers can tell a missing catalog entry from an unreachable store, a rejected
//! filter, or a document that vanished before it could be removed.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// The kind of catalog record a lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Connection,
    Database,
    Collection,
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogKind::Connection => write!(f, "connection"),
            CatalogKind::Database => write!(f, "database"),
            CatalogKind::Collection => write!(f, "collection"),
        }
    }
}

/// Represents all possible errors raised while reconciling the catalog or accessing documents.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// A catalog identifier did not resolve to a record.
    /// The first argument is the record kind, the second the identifier.
    #[error("No {0} with id {1} in the catalog")]
    CatalogNotFound(CatalogKind, String),
    /// The remote store could not be reached or refused to enumerate its contents.
    #[error("Store unreachable: {0}")]
    StoreUnreachable(String),
    /// The filter expression could not be parsed or contained something other than literals.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    /// The targeted document does not exist in the remote collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document {0} not found in collection {1}")]
    DocumentNotFound(String, String),
    /// The document payload has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during connector construction.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error occurred in the underlying store driver.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    pub fn connection_not_found(id: impl ToString) -> Self {
        DocumentStoreError::CatalogNotFound(CatalogKind::Connection, id.to_string())
    }

    pub fn database_not_found(id: impl ToString) -> Self {
        DocumentStoreError::CatalogNotFound(CatalogKind::Database, id.to_string())
    }

    pub fn collection_not_found(id: impl ToString) -> Self {
        DocumentStoreError::CatalogNotFound(CatalogKind::Collection, id.to_string())
    }

    /// Returns true for errors raised before any store I/O took place.
    pub fn is_rejected_early(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::CatalogNotFound(..) | DocumentStoreError::InvalidFilter(_)
        )
    }
}

/// A specialized `Result` type for catalog and document operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
