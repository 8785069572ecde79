//! Schema reconciliation: keeps the catalog in step with the live stores.
//!
//! A pass over one connection is a two-level mark-and-sweep:
//!
//! 1. reset the `keep` flag of every database row of the connection,
//! 2. upsert every live database with `keep = true`,
//! 3. per database, list the live collections; if that works, reset the collection rows,
//!    upsert the live ones and sweep the rest right away,
//! 4. sweep the database rows that were not revived, with their collections.
//!
//! Passes over the same connection are serialized by a per-connection token, so a reset of
//! one pass can never interleave with the sweep of another. Passes over different connections
//! run concurrently.
//!
//! A failure to list the collections of one database is soft: that database's collection rows
//! are left exactly as the previous pass left them and the database is reported in
//! [`ReconcileReport::failed_databases`]. A transient listing failure therefore never deletes
//! catalog rows.

use chrono::Utc;
use futures::future::join_all;
use mea::mutex::Mutex;
use serde::Serialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{StoreConnector, release},
    catalog::{CatalogStore, ConnectionRecord, DatabaseRecord},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// What one reconciliation pass observed and changed.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub connection_id: Uuid,
    /// Live databases upserted.
    pub databases_seen: usize,
    /// Names of the database rows swept.
    pub databases_removed: Vec<String>,
    /// Live collections upserted, across all databases.
    pub collections_seen: usize,
    /// Collection rows swept, across all databases.
    pub collections_removed: usize,
    /// Databases whose collections could not be listed and were left untouched.
    pub failed_databases: Vec<String>,
}

impl ReconcileReport {
    fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            databases_seen: 0,
            databases_removed: Vec::new(),
            collections_seen: 0,
            collections_removed: 0,
            failed_databases: Vec::new(),
        }
    }

    /// True when every database's collections were reconciled.
    pub fn is_complete(&self) -> bool {
        self.failed_databases.is_empty()
    }
}

/// Per-connection mutual exclusion tokens.
struct ConnectionLocks {
    tokens: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ConnectionLocks {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    async fn token(&self, connection_id: &Uuid) -> Arc<Mutex<()>> {
        self.tokens
            .lock()
            .await
            .entry(*connection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Hands a token back, forgetting it once no other pass holds or waits on it.
    ///
    /// Clones are only taken under the map lock, so the strong count seen here is exact.
    async fn release(&self, connection_id: &Uuid, token: Arc<Mutex<()>>) {
        let mut tokens = self.tokens.lock().await;
        drop(token);

        if tokens
            .get(connection_id)
            .is_some_and(|shared| Arc::strong_count(shared) == 1)
        {
            tokens.remove(connection_id);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }
}

/// Reconciles the catalog against the live stores reachable through a [`StoreConnector`].
pub struct SchemaReconciler {
    catalog: Arc<dyn CatalogStore>,
    connector: Arc<dyn StoreConnector>,
    locks: ConnectionLocks,
}

impl fmt::Debug for SchemaReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaReconciler")
            .field("catalog", &self.catalog)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl SchemaReconciler {
    pub fn new(catalog: Arc<dyn CatalogStore>, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            catalog,
            connector,
            locks: ConnectionLocks::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Reconciles every known connection concurrently.
    ///
    /// One connection failing never stops the others; each outcome is returned alongside its
    /// connection id, in catalog order.
    pub async fn reconcile_all(&self) -> DocumentStoreResult<Vec<(Uuid, DocumentStoreResult<ReconcileReport>)>> {
        let connections = self.catalog.list_connections().await?;

        let outcomes = join_all(
            connections
                .iter()
                .map(|connection| self.try_reconcile_connection(&connection.id)),
        )
        .await;

        for (connection, outcome) in connections.iter().zip(&outcomes) {
            if let Err(e) = outcome {
                warn!(connection_id = %connection.id, error = %e, "Reconciliation failed");
            }
        }

        Ok(connections
            .into_iter()
            .map(|connection| connection.id)
            .zip(outcomes)
            .collect())
    }

    /// Reconciles one connection, returning false if it could not be resolved or reached.
    pub async fn reconcile_connection(&self, connection_id: &Uuid) -> bool {
        match self.try_reconcile_connection(connection_id).await {
            Ok(_) => true,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Reconciliation failed");
                false
            }
        }
    }

    /// Reconciles one connection.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::CatalogNotFound`] if the connection is not in the catalog
    /// - [`DocumentStoreError::StoreUnreachable`] if its databases cannot be listed
    ///
    /// Neither case mutates the catalog. Catalog write failures mid-pass propagate as-is.
    pub async fn try_reconcile_connection(&self, connection_id: &Uuid) -> DocumentStoreResult<ReconcileReport> {
        let connection = self
            .catalog
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| DocumentStoreError::connection_not_found(connection_id))?;

        let token = self.locks.token(connection_id).await;
        let outcome = {
            let _pass = token.lock().await;
            self.run_pass(&connection).await
        };
        self.locks.release(connection_id, token).await;

        outcome
    }

    async fn run_pass(&self, connection: &ConnectionRecord) -> DocumentStoreResult<ReconcileReport> {
        let connection_id = &connection.id;

        let database_names = self
            .connector
            .list_database_names(connection)
            .await
            .map_err(as_unreachable)?;

        debug!(
            connection_id = %connection_id,
            databases = database_names.len(),
            "Reconciling connection"
        );

        let mut report = ReconcileReport::new(*connection_id);

        self.catalog.reset_databases(connection_id).await?;

        for name in &database_names {
            let database = self
                .catalog
                .upsert_database(connection_id, name, Utc::now())
                .await?;
            report.databases_seen += 1;

            match self.list_live_collections(connection, &database).await {
                Ok(collection_names) => {
                    let (seen, removed) = self.sync_collections(&database, &collection_names).await?;
                    report.collections_seen += seen;
                    report.collections_removed += removed;
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection_id,
                        database = %name,
                        error = %e,
                        "Could not list collections, keeping previous catalog rows"
                    );
                    report.failed_databases.push(name.clone());
                }
            }
        }

        report.databases_removed = self
            .catalog
            .sweep_databases(connection_id)
            .await?
            .into_iter()
            .map(|database| database.name)
            .collect();

        info!(
            connection_id = %connection_id,
            databases = report.databases_seen,
            databases_removed = report.databases_removed.len(),
            collections = report.collections_seen,
            collections_removed = report.collections_removed,
            failed = report.failed_databases.len(),
            "Connection reconciled"
        );

        Ok(report)
    }

    /// Creates a collection on the live store and seeds its catalog row.
    ///
    /// The seed row carries `keep = true` and is subject to the next pass like any other row.
    pub async fn create_collection(&self, database_id: &Uuid, name: &str) -> DocumentStoreResult<Uuid> {
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

        // Keep a concurrent pass from resetting and sweeping the seed row between its steps.
        let token = self.locks.token(&connection.id).await;
        let outcome = {
            let _pass = token.lock().await;
            self.seed_collection(&connection, &database, name).await
        };
        self.locks.release(&connection.id, token).await;

        outcome
    }

    async fn seed_collection(
        &self,
        connection: &ConnectionRecord,
        database: &DatabaseRecord,
        name: &str,
    ) -> DocumentStoreResult<Uuid> {
        let handle = self.connector.open(connection, &database.name).await?;
        let created = handle.create_collection(name).await;
        release(handle).await;
        created?;

        let collection = self
            .catalog
            .upsert_collection(&database.id, name, Utc::now())
            .await?;

        info!(database = %database.name, collection = %name, "Collection created");

        Ok(collection.id)
    }

    async fn list_live_collections(
        &self,
        connection: &ConnectionRecord,
        database: &DatabaseRecord,
    ) -> DocumentStoreResult<Vec<String>> {
        let handle = self.connector.open(connection, &database.name).await?;
        let listed = handle.list_collection_names().await;
        release(handle).await;
        listed
    }

    async fn sync_collections(
        &self,
        database: &DatabaseRecord,
        collection_names: &[String],
    ) -> DocumentStoreResult<(usize, usize)> {
        self.catalog.reset_collections(&database.id).await?;

        for name in collection_names {
            self.catalog
                .upsert_collection(&database.id, name, Utc::now())
                .await?;
        }

        let removed = self.catalog.sweep_collections(&database.id).await?;

        debug!(
            database = %database.name,
            collections = collection_names.len(),
            removed = removed.len(),
            "Collections reconciled"
        );

        Ok((collection_names.len(), removed.len()))
    }
}

fn as_unreachable(err: DocumentStoreError) -> DocumentStoreError {
    match err {
        DocumentStoreError::StoreUnreachable(_) => err,
        other => DocumentStoreError::StoreUnreachable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_are_forgotten_when_idle() {
        let locks = ConnectionLocks::new();
        let id = Uuid::new_v4();

        let first = locks.token(&id).await;
        let second = locks.token(&id).await;
        assert!(Arc::ptr_eq(&first, &second));

        locks.release(&id, first).await;
        assert_eq!(locks.len().await, 1);

        locks.release(&id, second).await;
        assert_eq!(locks.len().await, 0);
    }

    #[tokio::test]
    async fn other_connections_keep_their_tokens() {
        let locks = ConnectionLocks::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let held = locks.token(&a).await;
        let done = locks.token(&b).await;
        locks.release(&b, done).await;

        assert_eq!(locks.len().await, 1);
        assert!(Arc::ptr_eq(&held, &locks.token(&a).await));
    }
}
