//! In-memory document servers and the connector that opens handles on them.
//!
//! An [`InMemoryServer`] stands in for one remote deployment: named databases holding named
//! collections of BSON documents in insertion order. An [`InMemoryConnector`] maps connection
//! URIs to servers, so several catalog connections can point at separate servers.
//!
//! Servers can be told to misbehave, which is how reconciliation is exercised against
//! unreachable stores and flaky collection listings.
//!
//! # Example
//!
//! ```ignore
//! use docscope_memory::{InMemoryConnector, InMemoryServer};
//! use bson::doc;
//!
//! let server = InMemoryServer::new();
//! server.insert_documents("shop", "orders", vec![doc! { "total": 12 }]).await;
//!
//! let connector = InMemoryConnector::new();
//! connector.register("memory://primary", server.clone()).await;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::trace;

use docscope_core::{
    backend::{QueryOptions, StoreConnector, StoreConnectorBuilder, StoreHandle, is_operator_update},
    catalog::ConnectionRecord,
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::{Comparable, DocumentEvaluator, project, sort_documents};

type CollectionMap = BTreeMap<String, Vec<Document>>;
type DatabaseMap = BTreeMap<String, CollectionMap>;

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    failing_listings: HashSet<String>,
}

/// A thread-safe, in-memory stand-in for one remote document store deployment.
///
/// Clones share the same underlying data.
#[derive(Default, Clone, Debug)]
pub struct InMemoryServer {
    databases: Arc<RwLock<DatabaseMap>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self {
            databases: Arc::new(RwLock::new(DatabaseMap::new())),
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }

    /// Creates an empty collection, creating its database on the way.
    pub async fn create_collection(&self, database: &str, collection: &str) {
        self.databases
            .write()
            .await
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    /// Appends documents to a collection as-is, creating it if needed.
    pub async fn insert_documents(&self, database: &str, collection: &str, documents: Vec<Document>) {
        self.databases
            .write()
            .await
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Drops a collection. A database left without collections disappears with it.
    pub async fn drop_collection(&self, database: &str, collection: &str) {
        let mut databases = self.databases.write().await;

        if let Some(collections) = databases.get_mut(database) {
            collections.remove(collection);

            if collections.is_empty() {
                databases.remove(database);
            }
        }
    }

    pub async fn drop_database(&self, database: &str) {
        self.databases.write().await.remove(database);
    }

    /// Returns a snapshot of a collection's documents in natural order.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.databases
            .read()
            .await
            .get(database)
            .and_then(|collections| collections.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every connection attempt fail until cleared.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.faults.write().await.unreachable = unreachable;
    }

    /// Makes listing the collections of `database` fail until cleared.
    pub async fn fail_listing(&self, database: &str, failing: bool) {
        let mut faults = self.faults.write().await;

        if failing {
            faults.failing_listings.insert(database.to_string());
        } else {
            faults.failing_listings.remove(database);
        }
    }

    async fn ensure_reachable(&self, uri: &str) -> DocumentStoreResult<()> {
        if self.faults.read().await.unreachable {
            return Err(DocumentStoreError::StoreUnreachable(format!(
                "connection to {} refused",
                uri
            )));
        }

        Ok(())
    }

    async fn database_names(&self) -> Vec<String> {
        self.databases.read().await.keys().cloned().collect()
    }
}

/// Opens handles on [`InMemoryServer`]s registered under connection URIs.
///
/// The connector counts the handles it has handed out and not yet seen closed, which makes
/// leaked handles observable.
#[derive(Default, Clone, Debug)]
pub struct InMemoryConnector {
    servers: Arc<RwLock<HashMap<String, InMemoryServer>>>,
    open_handles: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            open_handles: Arc::new(AtomicUsize::new(0)),
            opened_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn builder() -> InMemoryConnectorBuilder {
        InMemoryConnectorBuilder::default()
    }

    /// Serves `uri` from `server`, replacing any previous registration.
    pub async fn register(&self, uri: impl Into<String>, server: InMemoryServer) {
        self.servers.write().await.insert(uri.into(), server);
    }

    /// Number of handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Number of handles opened since the connector was created.
    pub fn handles_opened(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    async fn server(&self, connection: &ConnectionRecord) -> DocumentStoreResult<InMemoryServer> {
        let server = self
            .servers
            .read()
            .await
            .get(&connection.uri)
            .cloned()
            .ok_or_else(|| {
                DocumentStoreError::StoreUnreachable(format!("no server listening at {}", connection.uri))
            })?;

        server.ensure_reachable(&connection.uri).await?;

        Ok(server)
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn list_database_names(&self, connection: &ConnectionRecord) -> DocumentStoreResult<Vec<String>> {
        Ok(self.server(connection).await?.database_names().await)
    }

    async fn open(&self, connection: &ConnectionRecord, database: &str) -> DocumentStoreResult<Box<dyn StoreHandle>> {
        let server = self.server(connection).await?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        trace!(uri = %connection.uri, database = %database, "Opened in-memory handle");

        Ok(Box::new(InMemoryHandle {
            server,
            database: database.to_string(),
            open_handles: self.open_handles.clone(),
        }))
    }
}

/// Builder for [`InMemoryConnector`], seeding it with servers up front.
#[derive(Default, Debug)]
pub struct InMemoryConnectorBuilder {
    servers: Vec<(String, InMemoryServer)>,
}

impl InMemoryConnectorBuilder {
    pub fn with_server(mut self, uri: impl Into<String>, server: InMemoryServer) -> Self {
        self.servers.push((uri.into(), server));
        self
    }
}

#[async_trait]
impl StoreConnectorBuilder for InMemoryConnectorBuilder {
    type Connector = InMemoryConnector;

    async fn build(self) -> DocumentStoreResult<Self::Connector> {
        let connector = InMemoryConnector::new();

        for (uri, server) in self.servers {
            connector.register(uri, server).await;
        }

        Ok(connector)
    }
}

/// A handle scoped to one database of an [`InMemoryServer`].
#[derive(Debug)]
pub struct InMemoryHandle {
    server: InMemoryServer,
    database: String,
    open_handles: Arc<AtomicUsize>,
}

impl InMemoryHandle {
    async fn matching(&self, collection: &str, selector: &Document) -> DocumentStoreResult<Vec<Document>> {
        let databases = self.server.databases.read().await;

        match databases.get(&self.database).and_then(|c| c.get(collection)) {
            Some(documents) => DocumentEvaluator::filter_documents(documents, selector),
            None => Ok(vec![]),
        }
    }

    fn position(documents: &[Document], selector: &Document) -> DocumentStoreResult<Option<usize>> {
        for (index, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(selector)? {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl StoreHandle for InMemoryHandle {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_collection_names(&self) -> DocumentStoreResult<Vec<String>> {
        if self.server.faults.read().await.failing_listings.contains(&self.database) {
            return Err(DocumentStoreError::Backend(format!(
                "listing collections of {} timed out",
                self.database
            )));
        }

        Ok(self
            .server
            .databases
            .read()
            .await
            .get(&self.database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut databases = self.server.databases.write().await;
        let collections = databases.entry(self.database.clone()).or_default();

        if collections.contains_key(name) {
            return Err(DocumentStoreError::Backend(format!(
                "collection {}.{} already exists",
                self.database, name
            )));
        }

        collections.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn count(&self, collection: &str, selector: &Document) -> DocumentStoreResult<u64> {
        Ok(self.matching(collection, selector).await?.len() as u64)
    }

    async fn find(
        &self,
        collection: &str,
        selector: Document,
        options: QueryOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = self.matching(collection, &selector).await?;

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort);
        }

        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match options.limit {
            Some(0) | None => usize::MAX,
            Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
        };

        Ok(documents
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &options.fields {
                Some(fields) => project(document, fields),
                None => document,
            })
            .collect())
    }

    async fn find_one(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>> {
        Ok(self.matching(collection, &selector).await?.into_iter().next())
    }

    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        let mut document = document;
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = Document::new();
                with_id.insert(ID_FIELD, id.clone());
                with_id.extend(document);
                document = with_id;
                id
            }
        };

        let mut databases = self.server.databases.write().await;
        let documents = databases
            .entry(self.database.clone())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let duplicate = documents
            .iter()
            .filter_map(|existing| existing.get(ID_FIELD))
            .any(|existing| Comparable::from(existing) == Comparable::from(&id));

        if duplicate {
            return Err(DocumentStoreError::Backend(format!(
                "duplicate key {} in {}.{}",
                id, self.database, collection
            )));
        }

        documents.push(document);
        Ok(id)
    }

    async fn update(&self, collection: &str, selector: Document, update: Document) -> DocumentStoreResult<u64> {
        let mut databases = self.server.databases.write().await;
        let Some(documents) = databases
            .get_mut(&self.database)
            .and_then(|c| c.get_mut(collection))
        else {
            return Ok(0);
        };

        let Some(index) = Self::position(documents, &selector)? else {
            return Ok(0);
        };

        let target = &mut documents[index];

        if is_operator_update(&update) {
            // All operators land together or not at all.
            let mut updated = target.clone();
            apply_operators(&mut updated, update)?;
            *target = updated;
        } else {
            let mut replacement = Document::new();
            if let Some(id) = target.get(ID_FIELD) {
                replacement.insert(ID_FIELD, id.clone());
            }
            replacement.extend(update.into_iter().filter(|(key, _)| key != ID_FIELD));
            *target = replacement;
        }

        Ok(1)
    }

    async fn find_and_remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>> {
        let mut databases = self.server.databases.write().await;
        let Some(documents) = databases
            .get_mut(&self.database)
            .and_then(|c| c.get_mut(collection))
        else {
            return Ok(None);
        };

        Ok(Self::position(documents, &selector)?
            .map(|index| documents.remove(index)))
    }

    async fn remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<u64> {
        let mut databases = self.server.databases.write().await;
        let Some(documents) = databases
            .get_mut(&self.database)
            .and_then(|c| c.get_mut(collection))
        else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(documents.len());
        let mut removed = 0;

        for document in documents.drain(..) {
            if DocumentEvaluator::new(&document).matches(&selector)? {
                removed += 1;
            } else {
                kept.push(document);
            }
        }

        *documents = kept;
        Ok(removed)
    }

    async fn close(self: Box<Self>) -> DocumentStoreResult<()> {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn apply_operators(target: &mut Document, update: Document) -> DocumentStoreResult<()> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocumentStoreError::Backend(format!("{} takes a document", op)));
        };

        for (field, value) in fields {
            if field == ID_FIELD {
                return Err(DocumentStoreError::Backend("the _id field is immutable".to_string()));
            }

            match op.as_str() {
                "$set" => set_path(target, &field, value)?,
                "$unset" => {
                    unset_path(target, &field);
                }
                "$inc" => {
                    let current = get_path(target, &field).cloned().unwrap_or(Bson::Int32(0));
                    set_path(target, &field, add(&current, &value)?)?;
                }
                other => {
                    return Err(DocumentStoreError::Backend(format!(
                        "unsupported update operator {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(())
}

fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match (document.get(head), rest) {
        (Some(value), None) => Some(value),
        (Some(Bson::Document(inner)), Some(rest)) => get_path(inner, rest),
        _ => None,
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));

            match entry {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => Err(DocumentStoreError::Backend(format!(
                    "cannot create field {} inside a non-document value",
                    path
                ))),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => unset_path(inner, rest),
            _ => None,
        },
    }
}

fn add(current: &Bson, delta: &Bson) -> DocumentStoreResult<Bson> {
    let sum = match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b))),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a).checked_add(*b).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(i64::from(*b)).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64),
        (Bson::Double(a), Bson::Double(b)) => Some(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Some(Bson::Double(a + f64::from(*b))),
        (Bson::Double(a), Bson::Int64(b)) => Some(Bson::Double(a + *b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Some(Bson::Double(f64::from(*a) + b)),
        (Bson::Int64(a), Bson::Double(b)) => Some(Bson::Double(*a as f64 + b)),
        _ => {
            return Err(DocumentStoreError::Backend(
                "$inc applies to numeric fields only".to_string(),
            ));
        }
    };

    sum.ok_or_else(|| DocumentStoreError::Backend(format!("$inc overflows {} + {}", current, delta)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn handle(server: &InMemoryServer) -> (InMemoryConnector, Box<dyn StoreHandle>) {
        let connector = InMemoryConnector::new();
        connector.register("memory://test", server.clone()).await;
        let connection = ConnectionRecord::new("test", "memory://test");
        let handle = connector.open(&connection, "shop").await.unwrap();
        (connector, handle)
    }

    #[tokio::test]
    async fn insert_generates_leading_id() {
        let server = InMemoryServer::new();
        let (_, handle) = handle(&server).await;

        let id = handle.insert("orders", doc! { "total": 3 }).await.unwrap();
        let stored = server.documents("shop", "orders").await;

        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(stored[0].keys().next().map(String::as_str), Some("_id"));
        assert!(handle.insert("orders", doc! { "_id": id }).await.is_err());
    }

    #[tokio::test]
    async fn find_applies_options_in_order() {
        let server = InMemoryServer::new();
        server
            .insert_documents("shop", "orders", (1..=5).map(|n| doc! { "_id": n, "n": n }).collect())
            .await;
        let (_, handle) = handle(&server).await;

        let options = QueryOptions {
            fields: Some(doc! { "_id": 0, "n": 1 }),
            sort: Some(doc! { "n": -1 }),
            skip: Some(1),
            limit: Some(2),
        };
        let docs = handle.find("orders", doc! {}, options).await.unwrap();

        assert_eq!(docs, vec![doc! { "n": 4 }, doc! { "n": 3 }]);
    }

    #[tokio::test]
    async fn update_replaces_or_modifies() {
        let server = InMemoryServer::new();
        server
            .insert_documents("shop", "orders", vec![doc! { "_id": 1, "a": 1, "b": 2 }])
            .await;
        let (_, handle) = handle(&server).await;

        assert_eq!(handle.update("orders", doc! { "_id": 1 }, doc! { "c": 3 }).await.unwrap(), 1);
        assert_eq!(server.documents("shop", "orders").await, vec![doc! { "_id": 1, "c": 3 }]);

        handle
            .update("orders", doc! { "_id": 1 }, doc! { "$set": { "d.e": 1 }, "$inc": { "c": 2 }, "$unset": { "x": "" } })
            .await
            .unwrap();
        assert_eq!(server.documents("shop", "orders").await, vec![doc! { "_id": 1, "c": 5, "d": { "e": 1 } }]);

        assert_eq!(handle.update("orders", doc! { "_id": 9 }, doc! { "c": 1 }).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_operator_update_changes_nothing() {
        let server = InMemoryServer::new();
        server
            .insert_documents("shop", "orders", vec![doc! { "_id": 1, "a": 1, "b": "text" }])
            .await;
        let (_, handle) = handle(&server).await;

        let outcome = handle
            .update("orders", doc! { "_id": 1 }, doc! { "$set": { "a": 99 }, "$inc": { "b": 1 } })
            .await;

        assert!(matches!(outcome, Err(DocumentStoreError::Backend(_))));
        assert_eq!(server.documents("shop", "orders").await, vec![doc! { "_id": 1, "a": 1, "b": "text" }]);
    }

    #[tokio::test]
    async fn inc_overflow_is_an_error() {
        let server = InMemoryServer::new();
        server
            .insert_documents("shop", "orders", vec![doc! { "_id": 1, "n": i64::MAX, "m": i32::MAX }])
            .await;
        let (_, handle) = handle(&server).await;

        let outcome = handle.update("orders", doc! { "_id": 1 }, doc! { "$inc": { "n": 1 } }).await;
        assert!(matches!(outcome, Err(DocumentStoreError::Backend(_))));

        handle
            .update("orders", doc! { "_id": 1 }, doc! { "$inc": { "m": 1 } })
            .await
            .unwrap();
        assert_eq!(
            server.documents("shop", "orders").await,
            vec![doc! { "_id": 1, "n": i64::MAX, "m": i64::from(i32::MAX) + 1 }]
        );
    }

    #[tokio::test]
    async fn remove_variants() {
        let server = InMemoryServer::new();
        server
            .insert_documents("shop", "orders", (1..=4).map(|n| doc! { "_id": n, "odd": n % 2 == 1 }).collect())
            .await;
        let (_, handle) = handle(&server).await;

        let removed = handle.find_and_remove("orders", doc! { "_id": 2 }).await.unwrap();
        assert_eq!(removed, Some(doc! { "_id": 2, "odd": false }));
        assert_eq!(handle.find_and_remove("orders", doc! { "_id": 2 }).await.unwrap(), None);

        assert_eq!(handle.remove("orders", doc! { "odd": true }).await.unwrap(), 2);
        assert_eq!(handle.count("orders", &doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn handles_are_counted_until_closed() {
        let server = InMemoryServer::new();
        let (connector, handle) = handle(&server).await;

        assert_eq!(connector.open_handles(), 1);
        handle.close().await.unwrap();
        assert_eq!(connector.open_handles(), 0);
        assert_eq!(connector.handles_opened(), 1);
    }

    #[tokio::test]
    async fn faults_surface_as_errors() {
        let server = InMemoryServer::new();
        server.create_collection("shop", "orders").await;
        let (connector, handle) = handle(&server).await;

        server.fail_listing("shop", true).await;
        assert!(handle.list_collection_names().await.is_err());
        server.fail_listing("shop", false).await;
        assert_eq!(handle.list_collection_names().await.unwrap(), vec!["orders".to_string()]);

        server.set_unreachable(true).await;
        let connection = ConnectionRecord::new("test", "memory://test");
        assert!(matches!(
            connector.list_database_names(&connection).await,
            Err(DocumentStoreError::StoreUnreachable(_))
        ));

        let unknown = ConnectionRecord::new("other", "memory://nowhere");
        assert!(matches!(
            connector.list_database_names(&unknown).await,
            Err(DocumentStoreError::StoreUnreachable(_))
        ));
    }
}
