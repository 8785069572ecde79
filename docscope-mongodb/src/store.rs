use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOptions},
};
use std::time::Duration;
use tracing::debug;

use docscope_core::{
    backend::{QueryOptions, StoreConnector, StoreConnectorBuilder, StoreHandle, is_operator_update},
    catalog::ConnectionRecord,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Opens MongoDB clients for catalog connections.
///
/// Every handle owns its own [`Client`], created from the connection's URI and shut down when
/// the handle is closed.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector {
    app_name: Option<String>,
    server_selection_timeout: Option<Duration>,
}

impl MongoConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MongoConnectorBuilder {
        MongoConnectorBuilder::default()
    }

    async fn client(&self, connection: &ConnectionRecord) -> DocumentStoreResult<Client> {
        let mut options = ClientOptions::parse(&connection.uri)
            .await
            .map_err(|e| DocumentStoreError::StoreUnreachable(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name.clone();
        }
        if self.server_selection_timeout.is_some() {
            options.server_selection_timeout = self.server_selection_timeout;
        }

        Client::with_options(options).map_err(|e| DocumentStoreError::StoreUnreachable(e.to_string()))
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn list_database_names(&self, connection: &ConnectionRecord) -> DocumentStoreResult<Vec<String>> {
        let client = self.client(connection).await?;
        let listed = client
            .list_database_names()
            .await
            .map_err(|e| DocumentStoreError::StoreUnreachable(e.to_string()));

        client.shutdown().await;

        listed
    }

    async fn open(&self, connection: &ConnectionRecord, database: &str) -> DocumentStoreResult<Box<dyn StoreHandle>> {
        let client = self.client(connection).await?;
        debug!(connection = %connection.name, database = %database, "Opened MongoDB handle");

        Ok(Box::new(MongoHandle::new(client, database.to_string())))
    }
}

#[derive(Debug, Default)]
pub struct MongoConnectorBuilder {
    app_name: Option<String>,
    server_selection_timeout: Option<Duration>,
}

impl MongoConnectorBuilder {
    /// Name reported to the server in its connection logs.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// How long to wait for a suitable server before an operation fails.
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl StoreConnectorBuilder for MongoConnectorBuilder {
    type Connector = MongoConnector;

    async fn build(self) -> DocumentStoreResult<Self::Connector> {
        if self.server_selection_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(DocumentStoreError::Initialization(
                "server selection timeout must be positive".to_string(),
            ));
        }

        Ok(MongoConnector {
            app_name: self.app_name,
            server_selection_timeout: self.server_selection_timeout,
        })
    }
}

/// A MongoDB client scoped to one database.
#[derive(Debug)]
pub struct MongoHandle {
    client: Client,
    database: String,
}

impl MongoHandle {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn find_options(options: QueryOptions) -> FindOptions {
    let mut find = FindOptions::default();

    find.projection = options.fields;
    find.sort = options.sort;
    find.skip = options.skip;
    find.limit = options
        .limit
        .filter(|limit| *limit > 0)
        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));

    find
}

#[async_trait]
impl StoreHandle for MongoHandle {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_collection_names(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn count(&self, collection: &str, selector: &Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(selector.clone())
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn find(
        &self,
        collection: &str,
        selector: Document,
        options: QueryOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(selector)
            .with_options(find_options(options))
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn find_one(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(selector)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        Ok(self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .inserted_id)
    }

    async fn update(&self, collection: &str, selector: Document, update: Document) -> DocumentStoreResult<u64> {
        let collection = self.get_collection(collection);

        let result = if is_operator_update(&update) {
            collection.update_one(selector, update).await
        } else {
            collection.replace_one(selector, update).await
        };

        Ok(result
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .matched_count)
    }

    async fn find_and_remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_delete(selector)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn remove(&self, collection: &str, selector: Document) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(selector)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .deleted_count)
    }

    async fn close(self: Box<Self>) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}
