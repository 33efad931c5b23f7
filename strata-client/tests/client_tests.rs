//! End-to-end client tests against an in-process router node.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_client::{ClientConfig, CoreClient, StoreData};
use strata_expr::Expr;
use strata_router::{RouterConfig, RouterNode};
use strata_types::{CoreError, NamedValueSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestData {
    field1: String,
    field2: i32,
}

impl TestData {
    fn new(field1: &str, field2: i32) -> Self {
        Self {
            field1: field1.into(),
            field2,
        }
    }
}

fn start_node() -> RouterNode {
    RouterNode::start(RouterConfig {
        env_name: "UTT".into(),
        housekeep_secs: None,
        ..RouterConfig::default()
    })
}

fn forever() -> chrono::Duration {
    chrono::Duration::MAX
}

#[tokio::test]
async fn save_and_load_round_trip() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    let data = TestData::new("test", 2);
    let mut props = NamedValueSet::new();
    props.set("Category", 10).unwrap();
    let id = client
        .save_object(&data, "Test", Some(&props), forever())
        .await
        .unwrap();

    // by name
    let item = client.load_item("Test").await.unwrap().unwrap();
    assert_eq!(item.id(), id);
    assert_eq!(item.app_props().get_i64("Category", 0), 10);
    assert_eq!(
        item.data_as::<TestData>(client.crypto()).unwrap().unwrap(),
        data
    );
    // names are case-insensitive
    assert!(client.load_item("test").await.unwrap().is_some());
    // by id
    let item = client.load_item_by_id(id).await.unwrap().unwrap();
    assert!(item.is_current());
    // by query
    let found = client
        .load_items(&Expr::field_eq("Category", 10))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), id);
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn update_moves_the_current_pointer() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    let id1 = client
        .save_object(&TestData::new("test", 2), "Test", None, forever())
        .await
        .unwrap();
    let id2 = client
        .save_object(&TestData::new("test", 3), "Test", None, forever())
        .await
        .unwrap();

    let current = client.load_item("Test").await.unwrap().unwrap();
    assert_eq!(current.id(), id2);
    assert_eq!(current.sequence(), 2);
    // the old version is still addressable and still current-for-id
    let old = client.load_item_by_id(id1).await.unwrap().unwrap();
    assert_eq!(old.sequence(), 1);
    // query sees exactly one current version
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn logical_delete() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    client
        .save_object(&TestData::new("test", 2), "Test", None, forever())
        .await
        .unwrap();
    let item = client.load_item("Test").await.unwrap().unwrap();
    let tombstone_id = client.delete_item(&item).await.unwrap();

    assert!(client.load_item("Test").await.unwrap().is_none());
    assert!(client.load_items(&Expr::all()).await.unwrap().is_empty());
    // the tombstone is loadable by id and reports deleted
    let tombstone = client.load_item_by_id(tombstone_id).await.unwrap().unwrap();
    assert!(tombstone.is_deleted());
    assert!(!tombstone.is_current());
    assert!(tombstone
        .data_as::<TestData>(client.crypto())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn delete_objects_clears_matching_items() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();
    for i in 0..3 {
        client
            .save_object(&TestData::new("bulk", i), &format!("Bulk{i}"), None, forever())
            .await
            .unwrap();
    }
    client
        .save_object(&TestData::new("keep", 9), "Keeper", None, forever())
        .await
        .unwrap();

    let deleted = client
        .delete_objects(&Expr::field_starts_with("$ItemName", "Bulk"))
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 1);
    assert!(client.load_item("Keeper").await.unwrap().is_some());
}

#[tokio::test]
async fn expiry_boundary() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    let id = client
        .save_object(
            &TestData::new("test", 2),
            "Test",
            None,
            chrono::Duration::milliseconds(150),
        )
        .await
        .unwrap();

    // before expiry: visible by name and query
    assert!(client.load_item("Test").await.unwrap().is_some());
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    // after expiry: gone from name and query, still loadable by id
    assert!(client.load_item("Test").await.unwrap().is_none());
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 0);
    let by_id = client.load_item_by_id(id).await.unwrap().unwrap();
    assert!(!by_id.is_current());
}

#[tokio::test]
async fn app_scope_isolation() {
    let node = start_node();
    let scope_a = "HL.AU.Syd.AppA";
    let scope_b = "HL.AU.Syd.AppB";
    let client_a = CoreClient::connect_with(
        &node,
        ClientConfig {
            default_app_scopes: vec![scope_a.to_string()],
            ..ClientConfig::default()
        },
    )
    .unwrap();
    let client_b = CoreClient::connect_with(
        &node,
        ClientConfig {
            default_app_scopes: vec![scope_b.to_string()],
            ..ClientConfig::default()
        },
    )
    .unwrap();

    let id_a = client_a
        .save_object(&TestData::new("AppA", 1), "Test", None, forever())
        .await
        .unwrap();
    let id_b = client_b
        .save_object(&TestData::new("AppB", 2), "Test", None, forever())
        .await
        .unwrap();
    assert_ne!(id_a, id_b);

    let seen_a = client_a.load_items(&Expr::all()).await.unwrap();
    assert_eq!(seen_a.len(), 1);
    assert_eq!(seen_a[0].id(), id_a);
    assert_eq!(seen_a[0].app_scope(), scope_a);

    let seen_b = client_b.load_items(&Expr::all()).await.unwrap();
    assert_eq!(seen_b.len(), 1);
    assert_eq!(seen_b[0].id(), id_b);
    assert_eq!(seen_b[0].app_scope(), scope_b);
}

#[tokio::test]
async fn polymorphic_payloads_keep_their_runtime_type() {
    // the application's base trait; StoreData as a supertrait keeps
    // the concrete type tag visible through base-typed references
    trait Instrument: StoreData {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct VanillaSwap {
        notional: f64,
        tenor_years: u32,
    }
    impl Instrument for VanillaSwap {}

    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();
    client.registry().register::<VanillaSwap>();

    let swap = VanillaSwap {
        notional: 25_000_000.0,
        tenor_years: 5,
    };
    // save through the base-typed reference
    let as_base: &dyn Instrument = &swap;
    client
        .save_object(as_base, "Swap.1", None, forever())
        .await
        .unwrap();

    // load through the untyped surface; the registry restores the
    // concrete runtime type recorded at save
    let item = client.load_item("Swap.1").await.unwrap().unwrap();
    assert_eq!(item.data_type_name(), std::any::type_name::<VanillaSwap>());
    let decoded = item
        .data_dyn(client.crypto(), client.registry())
        .unwrap()
        .unwrap();
    let recovered = decoded.downcast::<VanillaSwap>().expect("runtime type lost");
    assert_eq!(*recovered, swap);
}

#[tokio::test]
async fn interface_typed_saves_are_rejected() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();
    client.registry().register_abstract("demo.Instrument");

    let err = client
        .make_item_from_text("demo.Instrument", "{}", "Bad", None)
        .unwrap_err();
    assert!(matches!(err, CoreError::Argument(_)));

    // the check also guards the save path itself
    let mut item = client
        .make_item_from_text("demo.Concrete", "{}", "Sneaky", None)
        .unwrap();
    item.set_text("{}", "demo.Instrument").unwrap();
    let err = client.save_item(&mut item).await.unwrap_err();
    assert!(matches!(err, CoreError::Argument(_)));
}

#[tokio::test]
async fn untyped_payload_needs_a_supplied_or_registered_type() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    let data = TestData::new("test", 2);
    let text = serde_json::to_string(&data).unwrap();
    let mut item = client
        .make_item_from_text("demo.TestData", &text, "Test", None)
        .unwrap();
    client.save_item(&mut item).await.unwrap();

    let loaded = client.load_item("Test").await.unwrap().unwrap();
    // untyped access fails: the tag was never registered
    let err = loaded
        .data_dyn(client.crypto(), client.registry())
        .unwrap_err();
    assert!(matches!(err, CoreError::Serialization(_)));
    // supplying the type succeeds
    assert_eq!(
        loaded.data_as::<TestData>(client.crypto()).unwrap().unwrap(),
        data
    );
    // registering the tag makes untyped access work too
    client.registry().register_as::<TestData>("demo.TestData");
    let decoded = loaded
        .data_dyn(client.crypto(), client.registry())
        .unwrap()
        .unwrap();
    assert!(decoded.downcast::<TestData>().is_ok());
}

#[tokio::test]
async fn evaluation_errors_surface_from_the_server() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();

    let poisoned = Expr::and([Expr::all(), Expr::Error("unknown op".into())]);
    let err = client.load_items(&poisoned).await.unwrap_err();
    assert!(matches!(err, CoreError::Evaluation(_)));
    let err = client.count_items(&poisoned).await.unwrap_err();
    assert!(matches!(err, CoreError::Evaluation(_)));
}

#[tokio::test]
async fn paged_queries_agree_with_headers() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();
    for i in 0..10 {
        client
            .save_object(
                &TestData::new("page", i),
                &format!("Item{i:02}"),
                None,
                forever(),
            )
            .await
            .unwrap();
    }

    let mut paged_names = Vec::new();
    for page in 0..5 {
        let rows = client
            .load_items_paged(&Expr::all(), None, page * 2, Some(2))
            .await
            .unwrap();
        paged_names.extend(rows.iter().map(|item| item.name().to_string()));
    }
    let headers = client.load_item_infos(&Expr::all()).await.unwrap();
    let header_names: Vec<String> = headers.iter().map(|h| h.name.clone()).collect();

    assert_eq!(paged_names.len(), 10);
    assert_eq!(paged_names, header_names);
}

#[tokio::test]
async fn begin_end_requests_queue_beyond_the_limit() {
    let node = start_node();
    let client = CoreClient::connect_with(
        &node,
        ClientConfig {
            max_request_count: 2,
            ..ClientConfig::default()
        },
    )
    .unwrap();
    assert_eq!(client.max_request_count(), 2);

    // far more concurrent begins than the limit: all must complete
    let mut pending = Vec::new();
    for i in 0..20 {
        pending.push(client.begin_save_object(
            TestData::new("async", i),
            format!("Async{i:02}"),
            None,
            forever(),
        ));
    }
    for request in pending {
        request.end().await.unwrap();
    }
    assert_eq!(client.count_items(&Expr::all()).await.unwrap(), 20);

    // abandoned begins still complete and free capacity
    let abandoned = client.begin_load_items(Expr::all());
    abandoned.abandon();
    let follow_up = client.begin_count_items(Expr::all());
    assert_eq!(follow_up.end().await.unwrap(), 20);
}

#[tokio::test]
async fn load_by_id_async_form() {
    let node = start_node();
    let client = CoreClient::connect(&node).unwrap();
    let id = client
        .save_object(&TestData::new("test", 2), "Test", None, forever())
        .await
        .unwrap();

    let request = client.begin_load_item_by_id(id);
    let item = request.end().await.unwrap().unwrap();
    assert_eq!(item.id(), id);
    assert_eq!(
        item.data_as::<TestData>(client.crypto()).unwrap().unwrap(),
        TestData::new("test", 2)
    );
}
