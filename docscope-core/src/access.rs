//! Generic document access for catalogued collections.
//!
//! [`DocumentAccess`] resolves a catalog collection id to its database and connection, opens a
//! [`StoreHandle`] scoped to that database, runs one operation and closes the handle again on
//! every exit path. Catalog lookups and filter parsing happen before the handle is opened, so
//! [`DocumentStoreError::CatalogNotFound`] and [`DocumentStoreError::InvalidFilter`] are
//! always raised without touching the store.
//!
//! # Example
//!
//! ```ignore
//! let access = DocumentAccess::new(catalog, connector, QueryBuilder::new(Settings::default()));
//!
//! let page = access.list_documents(&collection_id, "{status: 'open'}, {sort: {at: -1}}", 2).await?;
//! for doc in &page.docs {
//!     println!("{} {:?}", doc.get_i64("$index")?, doc.get("_id"));
//! }
//! ```

use bson::{Bson, Document, doc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    backend::{StoreConnector, StoreHandle, release},
    catalog::{CatalogStore, CollectionRecord, ConnectionRecord, DatabaseRecord},
    document::{
        DOCUMENT_INDEX_FIELD, ID_FIELD, annotate_indices, display_id, normalize_id, objectify_id,
        strip_immutable_fields,
    },
    error::{DocumentStoreError, DocumentStoreResult},
    page::DocumentPage,
    query::{QueryBuilder, ResolvedQuery},
};

/// A collection resolved through the catalog down to its connection.
#[derive(Debug, Clone)]
pub struct ResolvedCollection {
    pub connection: ConnectionRecord,
    pub database: DatabaseRecord,
    pub collection: CollectionRecord,
}

#[derive(Debug, Clone)]
pub struct DocumentAccess {
    catalog: Arc<dyn CatalogStore>,
    connector: Arc<dyn StoreConnector>,
    query_builder: QueryBuilder,
}

impl DocumentAccess {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        connector: Arc<dyn StoreConnector>,
        query_builder: QueryBuilder,
    ) -> Self {
        Self {
            catalog,
            connector,
            query_builder,
        }
    }

    pub fn query_builder(&self) -> &QueryBuilder {
        &self.query_builder
    }

    /// Resolves a collection id to the collection, its database and its connection.
    pub async fn resolve_collection(&self, collection_id: &Uuid) -> DocumentStoreResult<ResolvedCollection> {
        let collection = self
            .catalog
            .get_collection(collection_id)
            .await?
            .ok_or_else(|| DocumentStoreError::collection_not_found(collection_id))?;
        let (connection, database) = self.resolve_database(&collection.database_id).await?;

        Ok(ResolvedCollection {
            connection,
            database,
            collection,
        })
    }

    async fn resolve_database(&self, database_id: &Uuid) -> DocumentStoreResult<(ConnectionRecord, DatabaseRecord)> {
        let database = self
            .catalog
            .get_database(database_id)
            .await?
            .ok_or_else(|| DocumentStoreError::database_not_found(database_id))?;
        let connection = self
            .catalog
            .get_connection(&database.connection_id)
            .await?
            .ok_or_else(|| DocumentStoreError::connection_not_found(database.connection_id))?;

        Ok((connection, database))
    }

    async fn open(&self, connection: &ConnectionRecord, database: &DatabaseRecord) -> DocumentStoreResult<Box<dyn StoreHandle>> {
        self.connector.open(connection, &database.name).await
    }

    /// Lists one page of documents of a collection.
    ///
    /// `filter` is either a document id or up to two literal mappings (selector, options); see
    /// [`crate::query`]. `page` is 1-based. Each returned document has its `_id` normalized and
    /// carries a transient display index under
    /// [`DOCUMENT_INDEX_FIELD`], starting at `skip + 1`.
    pub async fn list_documents(
        &self,
        collection_id: &Uuid,
        filter: &str,
        page: u64,
    ) -> DocumentStoreResult<DocumentPage> {
        let resolved = self.resolve_collection(collection_id).await?;
        let query = self
            .query_builder
            .build(filter, &resolved.collection, page)?;

        let handle = self.open(&resolved.connection, &resolved.database).await?;
        let result = fetch_page(handle.as_ref(), &resolved.collection.name, query).await;
        release(handle).await;

        let page = result?;
        debug!(
            collection = %resolved.collection.name,
            page = page.page,
            total_count = page.total_count,
            "Listed documents"
        );

        Ok(page)
    }

    /// Inserts a document and returns its identifier.
    pub async fn insert_document(&self, collection_id: &Uuid, data: Document) -> DocumentStoreResult<Bson> {
        let resolved = self.resolve_collection(collection_id).await?;
        let mut data = data;
        data.remove(DOCUMENT_INDEX_FIELD);

        let handle = self.open(&resolved.connection, &resolved.database).await?;
        let result = handle.insert(&resolved.collection.name, data).await;
        release(handle).await;

        let inserted_id = result?;
        info!(collection = %resolved.collection.name, id = %display_id(&inserted_id), "Document inserted");

        Ok(inserted_id)
    }

    /// Writes `data` over the document `document_id` and returns the matched count.
    ///
    /// The identifier and the display index are stripped from the payload first: identifiers
    /// are immutable and the index is never persisted.
    pub async fn update_document(
        &self,
        collection_id: &Uuid,
        document_id: &str,
        data: Document,
    ) -> DocumentStoreResult<u64> {
        let resolved = self.resolve_collection(collection_id).await?;
        let mut data = data;
        strip_immutable_fields(&mut data);

        let handle = self.open(&resolved.connection, &resolved.database).await?;
        let result = handle
            .update(&resolved.collection.name, doc! { ID_FIELD: objectify_id(document_id) }, data)
            .await;
        release(handle).await;

        let matched = result?;
        info!(collection = %resolved.collection.name, id = %document_id, matched, "Document updated");

        Ok(matched)
    }

    /// Removes the document `document_id` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] when no document matched.
    pub async fn remove_document(&self, collection_id: &Uuid, document_id: &str) -> DocumentStoreResult<Document> {
        let resolved = self.resolve_collection(collection_id).await?;
        let id = objectify_id(document_id);

        let handle = self.open(&resolved.connection, &resolved.database).await?;
        let result = handle
            .find_and_remove(&resolved.collection.name, doc! { ID_FIELD: id.clone() })
            .await;
        release(handle).await;

        match result? {
            Some(removed) => {
                info!(collection = %resolved.collection.name, id = %display_id(&id), "Document removed");
                Ok(removed)
            }
            None => Err(DocumentStoreError::DocumentNotFound(
                display_id(&id),
                resolved.collection.name,
            )),
        }
    }

    /// Removes every document of a collection and returns how many were removed.
    pub async fn drop_all_documents(&self, collection_id: &Uuid) -> DocumentStoreResult<u64> {
        let resolved = self.resolve_collection(collection_id).await?;

        let handle = self.open(&resolved.connection, &resolved.database).await?;
        let result = handle.remove(&resolved.collection.name, Document::new()).await;
        release(handle).await;

        let removed = result?;
        info!(collection = %resolved.collection.name, removed, "Collection emptied");

        Ok(removed)
    }

    /// Finds which live collection of a database holds the document `document_id`.
    ///
    /// Collections are probed in the order the store lists them; the first match wins.
    pub async fn find_collection_for_document_id(
        &self,
        database_id: &Uuid,
        document_id: &str,
    ) -> DocumentStoreResult<Option<String>> {
        let (connection, database) = self.resolve_database(database_id).await?;
        let selector = doc! { ID_FIELD: objectify_id(document_id) };

        let handle = self.open(&connection, &database).await?;
        let result = probe_collections(handle.as_ref(), selector).await;
        release(handle).await;

        result
    }
}

async fn fetch_page(handle: &dyn StoreHandle, collection: &str, query: ResolvedQuery) -> DocumentStoreResult<DocumentPage> {
    let first_index = query.first_index();
    let skip = query.options.skip.unwrap_or(0);

    let total_count = handle.count(collection, &query.selector).await?;
    let mut docs = handle
        .find(collection, query.selector, query.options)
        .await?;

    docs.iter_mut().for_each(normalize_id);
    annotate_indices(&mut docs, first_index);

    Ok(DocumentPage::builder(docs)
        .with_total_count(total_count)
        .with_pagination(query.pagination.page, query.pagination.per_page)
        .with_skip(skip)
        .build())
}

async fn probe_collections(handle: &dyn StoreHandle, selector: Document) -> DocumentStoreResult<Option<String>> {
    for name in handle.list_collection_names().await? {
        if handle.find_one(&name, selector.clone()).await?.is_some() {
            return Ok(Some(name));
        }
    }

    Ok(None)
}
