mod common;

use common::{Fixture, pairs};
use docscope::prelude::*;
use uuid::Uuid;

#[tokio::test]
async fn mirrors_live_structure() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("a", "x").await;
    fixture.server.create_collection("b", "y").await;
    fixture.server.create_collection("b", "z").await;

    let report = fixture.reconcile().await;

    assert_eq!(report.databases_seen, 2);
    assert_eq!(report.collections_seen, 3);
    assert!(report.is_complete());
    assert_eq!(
        fixture.catalog_names().await,
        pairs(&[("a", "x"), ("b", "y"), ("b", "z")])
    );

    let all = fixture.catalog.all_databases().await;
    assert!(all.iter().all(|database| database.keep));
    assert!(fixture.catalog.all_collections().await.iter().all(|collection| collection.keep));
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.server.create_collection("shop", "customers").await;
    fixture.server.create_collection("logs", "events").await;

    fixture.reconcile().await;
    let databases = fixture.catalog.all_databases().await;
    let collections = fixture.catalog.all_collections().await;

    let report = fixture.reconcile().await;

    assert!(report.databases_removed.is_empty());
    assert_eq!(report.collections_removed, 0);

    let ids = |records: &[DatabaseRecord]| records.iter().map(|r| (r.id, r.name.clone(), r.keep)).collect::<Vec<_>>();
    assert_eq!(ids(&fixture.catalog.all_databases().await), ids(&databases));

    let ids = |records: &[CollectionRecord]| records.iter().map(|r| (r.id, r.name.clone(), r.keep)).collect::<Vec<_>>();
    assert_eq!(ids(&fixture.catalog.all_collections().await), ids(&collections));
}

#[tokio::test]
async fn sweeps_what_disappeared() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.server.create_collection("shop", "archive").await;
    fixture.server.create_collection("logs", "events").await;
    fixture.reconcile().await;

    let logs = fixture.database("logs").await.expect("logs catalogued");

    fixture.server.drop_collection("shop", "archive").await;
    fixture.server.drop_database("logs").await;

    let report = fixture.reconcile().await;

    assert_eq!(report.databases_removed, vec!["logs".to_string()]);
    assert_eq!(report.collections_removed, 1);
    assert_eq!(fixture.catalog_names().await, pairs(&[("shop", "orders")]));

    // The swept database takes its collections with it.
    assert!(fixture.catalog.list_collections(&logs.id).await.unwrap().is_empty());
    assert!(
        fixture
            .catalog
            .all_collections()
            .await
            .iter()
            .all(|collection| collection.database_id != logs.id)
    );
}

#[tokio::test]
async fn revived_rows_keep_their_identity_and_settings() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.reconcile().await;

    let orders = fixture.collection("shop", "orders").await.unwrap();
    fixture.catalog.set_pagination_limit(&orders.id, Some(7)).await.unwrap();

    fixture.reconcile().await;

    let revived = fixture.collection("shop", "orders").await.unwrap();
    assert_eq!(revived.id, orders.id);
    assert_eq!(revived.pagination_limit, Some(7));
    assert!(revived.updated_at >= orders.updated_at);
}

#[tokio::test]
async fn other_connections_are_untouched() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;

    let (other, other_server) = fixture.add_connection("memory://secondary").await;
    other_server.create_collection("shop", "orders").await;

    fixture.reconcile().await;
    fixture.reconciler.try_reconcile_connection(&other.id).await.unwrap();

    fixture.server.drop_database("shop").await;
    fixture.reconcile().await;

    assert!(fixture.catalog_names().await.is_empty());

    let other_databases = fixture.catalog.list_databases(&other.id).await.unwrap();
    assert_eq!(other_databases.len(), 1);
    assert!(other_databases[0].keep);
    assert_eq!(fixture.catalog.list_collections(&other_databases[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn listing_failure_keeps_previous_rows() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.server.create_collection("shop", "customers").await;
    fixture.server.create_collection("logs", "events").await;
    fixture.reconcile().await;

    fixture.server.drop_collection("shop", "customers").await;
    fixture.server.create_collection("logs", "audit").await;
    fixture.server.fail_listing("shop", true).await;

    let report = fixture.reconcile().await;

    assert!(!report.is_complete());
    assert_eq!(report.failed_databases, vec!["shop".to_string()]);
    assert_eq!(
        fixture.catalog_names().await,
        pairs(&[("logs", "audit"), ("logs", "events"), ("shop", "customers"), ("shop", "orders")])
    );

    fixture.server.fail_listing("shop", false).await;
    fixture.reconcile().await;

    assert_eq!(
        fixture.catalog_names().await,
        pairs(&[("logs", "audit"), ("logs", "events"), ("shop", "orders")])
    );
}

#[tokio::test]
async fn unreachable_store_changes_nothing() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.reconcile().await;
    let before = fixture.catalog.all_databases().await;

    fixture.server.set_unreachable(true).await;

    let outcome = fixture.reconciler.try_reconcile_connection(&fixture.connection.id).await;
    assert!(matches!(outcome, Err(DocumentStoreError::StoreUnreachable(_))));
    assert!(!fixture.reconciler.reconcile_connection(&fixture.connection.id).await);

    assert_eq!(fixture.catalog.all_databases().await, before);
    assert_eq!(fixture.catalog_names().await, pairs(&[("shop", "orders")]));
}

#[tokio::test]
async fn unknown_connection_is_rejected() {
    let fixture = Fixture::new().await;

    let outcome = fixture.reconciler.try_reconcile_connection(&Uuid::new_v4()).await;

    assert!(matches!(
        outcome,
        Err(DocumentStoreError::CatalogNotFound(CatalogKind::Connection, _))
    ));
    assert!(!fixture.reconciler.reconcile_connection(&Uuid::new_v4()).await);
    assert_eq!(fixture.connector.handles_opened(), 0);
}

#[tokio::test]
async fn concurrent_passes_converge() {
    let fixture = Fixture::new().await;
    for database in ["a", "b", "c"] {
        for collection in ["x", "y"] {
            fixture.server.create_collection(database, collection).await;
        }
    }

    let id = fixture.connection.id;
    let (first, second) = futures::join!(
        fixture.reconciler.try_reconcile_connection(&id),
        fixture.reconciler.try_reconcile_connection(&id),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(fixture.catalog.all_databases().await.len(), 3);
    assert_eq!(fixture.catalog.all_collections().await.len(), 6);
    assert!(fixture.catalog.all_collections().await.iter().all(|collection| collection.keep));
    assert_eq!(fixture.connector.open_handles(), 0);
}

#[tokio::test]
async fn reconcile_all_isolates_failures() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;

    let (other, other_server) = fixture.add_connection("memory://secondary").await;
    other_server.set_unreachable(true).await;

    let outcomes = fixture.reconciler.reconcile_all().await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, fixture.connection.id);
    assert!(outcomes[0].1.is_ok());
    assert_eq!(outcomes[1].0, other.id);
    assert!(matches!(outcomes[1].1, Err(DocumentStoreError::StoreUnreachable(_))));
    assert_eq!(fixture.catalog_names().await, pairs(&[("shop", "orders")]));
}

#[tokio::test]
async fn created_collection_is_catalogued_and_survives() {
    let fixture = Fixture::new().await;
    fixture.server.create_collection("shop", "orders").await;
    fixture.reconcile().await;
    let shop = fixture.database("shop").await.unwrap();

    let id = fixture.reconciler.create_collection(&shop.id, "invoices").await.unwrap();

    let created = fixture.catalog.get_collection(&id).await.unwrap().unwrap();
    assert_eq!(created.name, "invoices");
    assert!(created.keep);
    assert!(fixture.server.documents("shop", "invoices").await.is_empty());

    fixture.reconcile().await;
    assert_eq!(fixture.collection_id("shop", "invoices").await, id);

    assert!(fixture.reconciler.create_collection(&shop.id, "invoices").await.is_err());
    assert!(matches!(
        fixture.reconciler.create_collection(&Uuid::new_v4(), "x").await,
        Err(DocumentStoreError::CatalogNotFound(CatalogKind::Database, _))
    ));
    assert_eq!(fixture.connector.open_handles(), 0);
}
