#![allow(dead_code)]

use std::sync::Arc;

use docscope::{
    memory::{InMemoryCatalog, InMemoryConnector, InMemoryServer},
    prelude::*,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One in-memory server behind one catalog connection, plus the services under test.
pub struct Fixture {
    pub server: InMemoryServer,
    pub connector: Arc<InMemoryConnector>,
    pub catalog: Arc<InMemoryCatalog>,
    pub connection: ConnectionRecord,
    pub reconciler: SchemaReconciler,
    pub access: DocumentAccess,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_page_size(20).await
    }

    pub async fn with_page_size(per_page: i64) -> Self {
        init_tracing();

        let server = InMemoryServer::new();
        let connector = Arc::new(InMemoryConnector::new());
        connector.register("memory://primary", server.clone()).await;

        let catalog = Arc::new(InMemoryCatalog::new());
        let connection = ConnectionRecord::new("primary", "memory://primary");
        catalog
            .insert_connection(connection.clone())
            .await
            .expect("connection inserted");

        let reconciler = SchemaReconciler::new(catalog.clone(), connector.clone());
        let settings = Settings::builder().with_documents_per_page(per_page).build();
        let access = DocumentAccess::new(catalog.clone(), connector.clone(), QueryBuilder::new(settings));

        Self {
            server,
            connector,
            catalog,
            connection,
            reconciler,
            access,
        }
    }

    /// Adds a second connection backed by its own server.
    pub async fn add_connection(&self, uri: &str) -> (ConnectionRecord, InMemoryServer) {
        let server = InMemoryServer::new();
        self.connector.register(uri, server.clone()).await;

        let connection = ConnectionRecord::new(uri, uri);
        self.catalog
            .insert_connection(connection.clone())
            .await
            .expect("connection inserted");

        (connection, server)
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.reconciler
            .try_reconcile_connection(&self.connection.id)
            .await
            .expect("reconciliation succeeds")
    }

    pub async fn database(&self, name: &str) -> Option<DatabaseRecord> {
        self.catalog
            .list_databases(&self.connection.id)
            .await
            .expect("databases listed")
            .into_iter()
            .find(|database| database.name == name)
    }

    pub async fn collection(&self, database: &str, name: &str) -> Option<CollectionRecord> {
        let database = self.database(database).await?;

        self.catalog
            .list_collections(&database.id)
            .await
            .expect("collections listed")
            .into_iter()
            .find(|collection| collection.name == name)
    }

    pub async fn collection_id(&self, database: &str, name: &str) -> Uuid {
        self.collection(database, name)
            .await
            .map(|collection| collection.id)
            .expect("collection catalogued")
    }

    /// `(database, collection)` name pairs currently in the catalog for the fixture connection.
    pub async fn catalog_names(&self) -> Vec<(String, String)> {
        let mut names = Vec::new();

        for database in self.catalog.list_databases(&self.connection.id).await.expect("databases listed") {
            let collections = self.catalog.list_collections(&database.id).await.expect("collections listed");

            if collections.is_empty() {
                names.push((database.name.clone(), String::new()));
            }

            for collection in collections {
                names.push((database.name.clone(), collection.name));
            }
        }

        names
    }
}

pub fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(database, collection)| (database.to_string(), collection.to_string()))
        .collect()
}
