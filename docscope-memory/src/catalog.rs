//! In-memory [`CatalogStore`].
//!
//! All rows live behind one async read-write lock, so every trait method is applied as a
//! single critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

use docscope_core::{
    catalog::{CatalogStore, CollectionRecord, ConnectionRecord, DatabaseRecord},
    error::{DocumentStoreError, DocumentStoreResult},
};

#[derive(Debug, Default)]
struct CatalogState {
    connections: Vec<ConnectionRecord>,
    databases: HashMap<Uuid, DatabaseRecord>,
    collections: HashMap<Uuid, CollectionRecord>,
}

/// Thread-safe catalog kept entirely in memory. Clones share the same rows.
#[derive(Default, Clone, Debug)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CatalogState::default())),
        }
    }

    /// Every database row, ordered by connection then name.
    pub async fn all_databases(&self) -> Vec<DatabaseRecord> {
        let mut databases = self.state.read().await.databases.values().cloned().collect::<Vec<_>>();
        databases.sort_by(|a, b| (a.connection_id, &a.name).cmp(&(b.connection_id, &b.name)));
        databases
    }

    /// Every collection row, ordered by database then name.
    pub async fn all_collections(&self) -> Vec<CollectionRecord> {
        let mut collections = self.state.read().await.collections.values().cloned().collect::<Vec<_>>();
        collections.sort_by(|a, b| (a.database_id, &a.name).cmp(&(b.database_id, &b.name)));
        collections
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn insert_connection(&self, connection: ConnectionRecord) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        if state.connections.iter().any(|c| c.id == connection.id) {
            return Err(DocumentStoreError::Backend(format!(
                "connection {} already exists",
                connection.id
            )));
        }

        state.connections.push(connection);
        Ok(())
    }

    async fn get_connection(&self, id: &Uuid) -> DocumentStoreResult<Option<ConnectionRecord>> {
        Ok(self
            .state
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == *id)
            .cloned())
    }

    async fn list_connections(&self) -> DocumentStoreResult<Vec<ConnectionRecord>> {
        Ok(self.state.read().await.connections.clone())
    }

    async fn get_database(&self, id: &Uuid) -> DocumentStoreResult<Option<DatabaseRecord>> {
        Ok(self.state.read().await.databases.get(id).cloned())
    }

    async fn list_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<Vec<DatabaseRecord>> {
        let mut databases = self
            .state
            .read()
            .await
            .databases
            .values()
            .filter(|d| d.connection_id == *connection_id)
            .cloned()
            .collect::<Vec<_>>();

        databases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(databases)
    }

    async fn reset_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<usize> {
        let mut state = self.state.write().await;
        let mut touched = 0;

        for database in state.databases.values_mut().filter(|d| d.connection_id == *connection_id) {
            database.keep = false;
            touched += 1;
        }

        Ok(touched)
    }

    async fn upsert_database(
        &self,
        connection_id: &Uuid,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> DocumentStoreResult<DatabaseRecord> {
        let mut state = self.state.write().await;

        let existing = state
            .databases
            .values_mut()
            .find(|d| d.connection_id == *connection_id && d.name == name);

        let record = match existing {
            Some(database) => {
                database.keep = true;
                database.updated_at = seen_at;
                database.clone()
            }
            None => {
                let database = DatabaseRecord {
                    id: Uuid::new_v4(),
                    connection_id: *connection_id,
                    name: name.to_string(),
                    updated_at: seen_at,
                    keep: true,
                };
                state.databases.insert(database.id, database.clone());
                database
            }
        };

        Ok(record)
    }

    async fn sweep_databases(&self, connection_id: &Uuid) -> DocumentStoreResult<Vec<DatabaseRecord>> {
        let mut state = self.state.write().await;

        let stale = state
            .databases
            .values()
            .filter(|d| d.connection_id == *connection_id && !d.keep)
            .map(|d| d.id)
            .collect::<Vec<_>>();

        let mut removed = Vec::with_capacity(stale.len());

        for id in stale {
            if let Some(database) = state.databases.remove(&id) {
                state.collections.retain(|_, c| c.database_id != id);
                removed.push(database);
            }
        }

        removed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(removed)
    }

    async fn insert_collection(&self, collection: CollectionRecord) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        let duplicate = state
            .collections
            .values()
            .any(|c| c.id == collection.id || (c.database_id == collection.database_id && c.name == collection.name));

        if duplicate {
            return Err(DocumentStoreError::Backend(format!(
                "collection {} already exists in database {}",
                collection.name, collection.database_id
            )));
        }

        state.collections.insert(collection.id, collection);
        Ok(())
    }

    async fn get_collection(&self, id: &Uuid) -> DocumentStoreResult<Option<CollectionRecord>> {
        Ok(self.state.read().await.collections.get(id).cloned())
    }

    async fn list_collections(&self, database_id: &Uuid) -> DocumentStoreResult<Vec<CollectionRecord>> {
        let mut collections = self
            .state
            .read()
            .await
            .collections
            .values()
            .filter(|c| c.database_id == *database_id)
            .cloned()
            .collect::<Vec<_>>();

        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    async fn reset_collections(&self, database_id: &Uuid) -> DocumentStoreResult<usize> {
        let mut state = self.state.write().await;
        let mut touched = 0;

        for collection in state.collections.values_mut().filter(|c| c.database_id == *database_id) {
            collection.keep = false;
            touched += 1;
        }

        Ok(touched)
    }

    async fn upsert_collection(
        &self,
        database_id: &Uuid,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> DocumentStoreResult<CollectionRecord> {
        let mut state = self.state.write().await;

        if !state.databases.contains_key(database_id) {
            return Err(DocumentStoreError::database_not_found(database_id));
        }

        let existing = state
            .collections
            .values_mut()
            .find(|c| c.database_id == *database_id && c.name == name);

        let record = match existing {
            Some(collection) => {
                collection.keep = true;
                collection.updated_at = seen_at;
                collection.clone()
            }
            None => {
                let mut collection = CollectionRecord::new(*database_id, name);
                collection.updated_at = seen_at;
                state.collections.insert(collection.id, collection.clone());
                collection
            }
        };

        Ok(record)
    }

    async fn sweep_collections(&self, database_id: &Uuid) -> DocumentStoreResult<Vec<CollectionRecord>> {
        let mut state = self.state.write().await;

        let stale = state
            .collections
            .values()
            .filter(|c| c.database_id == *database_id && !c.keep)
            .map(|c| c.id)
            .collect::<Vec<_>>();

        let mut removed = stale
            .iter()
            .filter_map(|id| state.collections.remove(id))
            .collect::<Vec<_>>();

        removed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(removed)
    }

    async fn set_pagination_limit(&self, collection_id: &Uuid, limit: Option<i64>) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        let collection = state
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| DocumentStoreError::collection_not_found(collection_id))?;

        collection.pagination_limit = limit;
        Ok(())
    }
}
