mod common;

use bson::{Bson, Document, doc, oid::ObjectId};
use common::Fixture;
use docscope::{document::display_id, prelude::*};
use uuid::Uuid;

async fn seeded(per_page: i64, count: i32) -> (Fixture, Uuid) {
    let fixture = Fixture::with_page_size(per_page).await;
    fixture
        .server
        .insert_documents("shop", "orders", (1..=count).map(|n| doc! { "n": n }).collect())
        .await;
    fixture.server.create_collection("shop", "customers").await;
    fixture.reconcile().await;

    let orders = fixture.collection_id("shop", "orders").await;
    (fixture, orders)
}

fn indices(docs: &[Document]) -> Vec<i64> {
    docs.iter()
        .map(|doc| doc.get_i64(DOCUMENT_INDEX_FIELD).expect("display index"))
        .collect()
}

fn values(docs: &[Document]) -> Vec<i32> {
    docs.iter().map(|doc| doc.get_i32("n").expect("n")).collect()
}

#[tokio::test]
async fn pages_carry_display_indices() {
    let (fixture, orders) = seeded(3, 7).await;

    let first = fixture.access.list_documents(&orders, "", 1).await.unwrap();
    assert_eq!(indices(&first.docs), vec![1, 2, 3]);
    assert_eq!(values(&first.docs), vec![1, 2, 3]);
    assert_eq!(first.total_count, 7);
    assert_eq!(first.next_page, Some(2));
    assert_eq!(first.previous_page, None);

    let last = fixture.access.list_documents(&orders, "{}", 3).await.unwrap();
    assert_eq!(indices(&last.docs), vec![7]);
    assert_eq!(last.next_page, None);
    assert_eq!(last.previous_page, Some(2));

    let beyond = fixture.access.list_documents(&orders, "{}", 9).await.unwrap();
    assert!(beyond.docs.is_empty());
    assert_eq!(beyond.total_count, 7);
    assert_eq!(beyond.next_page, None);
}

#[tokio::test]
async fn selector_and_options_are_applied() {
    let (fixture, orders) = seeded(20, 10).await;

    let page = fixture
        .access
        .list_documents(&orders, "{n: {$gt: 3}}, {sort: {n: -1}, skip: 2, limit: 3, fields: {n: 1, _id: 0}}", 1)
        .await
        .unwrap();

    assert_eq!(values(&page.docs), vec![8, 7, 6]);
    assert_eq!(indices(&page.docs), vec![3, 4, 5]);
    assert_eq!(page.total_count, 7);
    assert!(page.docs.iter().all(|doc| !doc.contains_key(ID_FIELD)));
}

#[tokio::test]
async fn zero_limit_uses_page_size() {
    let (fixture, orders) = seeded(4, 10).await;

    let page = fixture.access.list_documents(&orders, "{}, {limit: 0}", 2).await.unwrap();

    assert_eq!(values(&page.docs), vec![5, 6, 7, 8]);
    assert_eq!(indices(&page.docs), vec![5, 6, 7, 8]);
}

#[tokio::test]
async fn collection_page_size_overrides_settings() {
    let (fixture, orders) = seeded(20, 10).await;
    fixture.catalog.set_pagination_limit(&orders, Some(2)).await.unwrap();

    let page = fixture.access.list_documents(&orders, "", 2).await.unwrap();

    assert_eq!(values(&page.docs), vec![3, 4]);
    assert_eq!(page.per_page, 2);
}

#[tokio::test]
async fn unsafe_filters_never_reach_the_store() {
    let (fixture, orders) = seeded(20, 3).await;
    let opened = fixture.connector.handles_opened();

    let filters = [
        "{$where: function() { return true }}",
        "{$where: 'sleep(100000) || true'}",
        "{$expr: {$function: {body: 'return true', args: [], lang: 'js'}}}",
        "{}, {skip: 1e20}",
        "{a: this.constructor}",
        "{a: db.dropDatabase()}",
        "{}, {}, {}",
        "{}, {hint: {n: 1}}",
        "{a: 1",
    ];

    for filter in filters {
        let outcome = fixture.access.list_documents(&orders, filter, 1).await;
        assert!(
            matches!(outcome, Err(DocumentStoreError::InvalidFilter(_))),
            "accepted {}",
            filter
        );
    }

    assert_eq!(fixture.connector.handles_opened(), opened);
    assert_eq!(fixture.server.documents("shop", "orders").await.len(), 3);
}

#[tokio::test]
async fn far_skip_returns_an_empty_page() {
    let (fixture, orders) = seeded(20, 3).await;

    let page = fixture
        .access
        .list_documents(&orders, "{}, {skip: 9223372036854775807}", 1)
        .await
        .unwrap();

    assert!(page.docs.is_empty());
    assert_eq!(page.total_count, 3);
    assert_eq!(page.next_page, None);
}

#[tokio::test]
async fn unknown_collection_is_rejected_early() {
    let (fixture, _) = seeded(20, 1).await;
    let opened = fixture.connector.handles_opened();
    let missing = Uuid::new_v4();

    let outcomes = [
        fixture.access.list_documents(&missing, "", 1).await.map(|_| ()),
        fixture.access.insert_document(&missing, doc! {}).await.map(|_| ()),
        fixture.access.update_document(&missing, "x", doc! {}).await.map(|_| ()),
        fixture.access.remove_document(&missing, "x").await.map(|_| ()),
        fixture.access.drop_all_documents(&missing).await.map(|_| ()),
    ];

    for outcome in outcomes {
        let err = outcome.expect_err("missing collection");
        assert!(matches!(err, DocumentStoreError::CatalogNotFound(CatalogKind::Collection, _)));
        assert!(err.is_rejected_early());
    }

    assert!(matches!(
        fixture.access.find_collection_for_document_id(&missing, "x").await,
        Err(DocumentStoreError::CatalogNotFound(CatalogKind::Database, _))
    ));
    assert_eq!(fixture.connector.handles_opened(), opened);
}

#[tokio::test]
async fn inserted_ids_round_trip() {
    let (fixture, orders) = seeded(20, 2).await;
    let shop = fixture.database("shop").await.unwrap();

    let id = fixture
        .access
        .insert_document(&orders, doc! { "status": "open", DOCUMENT_INDEX_FIELD: 9 })
        .await
        .unwrap();
    let Bson::ObjectId(oid) = id.clone() else {
        panic!("expected a generated ObjectId, got {:?}", id);
    };
    let hex = display_id(&id);
    assert_eq!(hex, oid.to_hex());

    let located = fixture.access.find_collection_for_document_id(&shop.id, &hex).await.unwrap();
    assert_eq!(located.as_deref(), Some("orders"));

    let page = fixture.access.list_documents(&orders, &hex, 1).await.unwrap();
    assert_eq!(page.docs.len(), 1);
    assert_eq!(page.docs[0].get_object_id(ID_FIELD).unwrap(), oid);
    assert_eq!(page.docs[0].get_str("status").unwrap(), "open");

    let stored = fixture.server.documents("shop", "orders").await;
    assert!(stored.iter().all(|doc| !doc.contains_key(DOCUMENT_INDEX_FIELD)));

    let unknown = ObjectId::new().to_hex();
    assert_eq!(fixture.access.find_collection_for_document_id(&shop.id, &unknown).await.unwrap(), None);
}

#[tokio::test]
async fn string_ids_stay_strings() {
    let (fixture, _) = seeded(20, 0).await;
    let customers = fixture.collection_id("shop", "customers").await;
    let shop = fixture.database("shop").await.unwrap();

    let id = fixture
        .access
        .insert_document(&customers, doc! { "_id": "alice", "tier": "gold" })
        .await
        .unwrap();
    assert_eq!(id, Bson::String("alice".to_string()));

    let located = fixture.access.find_collection_for_document_id(&shop.id, "alice").await.unwrap();
    assert_eq!(located.as_deref(), Some("customers"));
}

#[tokio::test]
async fn extended_json_ids_are_normalized() {
    let (fixture, orders) = seeded(20, 0).await;
    let oid = ObjectId::new();
    fixture
        .server
        .insert_documents("shop", "orders", vec![doc! { "_id": { "$oid": oid.to_hex() }, "n": 1 }])
        .await;

    let page = fixture.access.list_documents(&orders, "", 1).await.unwrap();

    assert_eq!(page.docs[0].get_object_id(ID_FIELD).unwrap(), oid);
}

#[tokio::test]
async fn updates_never_touch_the_identifier() {
    let (fixture, orders) = seeded(20, 0).await;
    let id = fixture.access.insert_document(&orders, doc! { "status": "open" }).await.unwrap();
    let hex = display_id(&id);

    let matched = fixture
        .access
        .update_document(
            &orders,
            &hex,
            doc! { "_id": ObjectId::new(), DOCUMENT_INDEX_FIELD: 1, "status": "closed", "total": 12 },
        )
        .await
        .unwrap();
    assert_eq!(matched, 1);

    let stored = fixture.server.documents("shop", "orders").await;
    assert_eq!(stored, vec![doc! { "_id": id.clone(), "status": "closed", "total": 12 }]);

    fixture
        .access
        .update_document(&orders, &hex, doc! { "$set": { "status": "paid" } })
        .await
        .unwrap();
    let stored = fixture.server.documents("shop", "orders").await;
    assert_eq!(stored, vec![doc! { "_id": id, "status": "paid", "total": 12 }]);

    let missing = ObjectId::new().to_hex();
    assert_eq!(fixture.access.update_document(&orders, &missing, doc! { "a": 1 }).await.unwrap(), 0);
}

#[tokio::test]
async fn remove_reports_missing_documents() {
    let (fixture, orders) = seeded(20, 0).await;
    let id = fixture.access.insert_document(&orders, doc! { "n": 1 }).await.unwrap();
    let hex = display_id(&id);

    let removed = fixture.access.remove_document(&orders, &hex).await.unwrap();
    assert_eq!(removed.get(ID_FIELD), Some(&id));

    match fixture.access.remove_document(&orders, &hex).await {
        Err(DocumentStoreError::DocumentNotFound(document, collection)) => {
            assert_eq!(document, hex);
            assert_eq!(collection, "orders");
        }
        other => panic!("expected DocumentNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn drop_all_empties_the_collection() {
    let (fixture, orders) = seeded(20, 5).await;

    assert_eq!(fixture.access.drop_all_documents(&orders).await.unwrap(), 5);

    let page = fixture.access.list_documents(&orders, "", 1).await.unwrap();
    assert!(page.docs.is_empty());
    assert_eq!(page.total_count, 0);
    assert!(fixture.collection("shop", "orders").await.is_some());
}

#[tokio::test]
async fn handles_are_released_on_failure() {
    let (fixture, orders) = seeded(20, 3).await;

    let outcome = fixture.access.list_documents(&orders, "{n: {$regex: '1'}}", 1).await;
    assert!(matches!(outcome, Err(DocumentStoreError::Backend(_))));

    fixture.access.insert_document(&orders, doc! { "_id": "a" }).await.unwrap();
    assert!(fixture.access.insert_document(&orders, doc! { "_id": "a" }).await.is_err());

    fixture.server.set_unreachable(true).await;
    assert!(matches!(
        fixture.access.list_documents(&orders, "", 1).await,
        Err(DocumentStoreError::StoreUnreachable(_))
    ));

    assert!(fixture.connector.handles_opened() > 0);
    assert_eq!(fixture.connector.open_handles(), 0);
}
