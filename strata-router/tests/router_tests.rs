//! Router node integration tests: sessions, durable write-behind,
//! restore, and the redirect hook.

use std::sync::Arc;
use std::time::Duration;
use strata_router::{
    ConnectOutcome, RedirectPolicy, Request, Response, RouterConfig, RouterNode, SubscribeSpec,
    SubscriptionMode,
};
use strata_store::{DurableStore, InMemoryDurableStore};
use strata_types::{ClientId, Item, ItemId, ItemKind, NamedValueSet, DEFAULT_APP_SCOPE};

fn config() -> RouterConfig {
    RouterConfig {
        env_name: "UTT".into(),
        housekeep_secs: None,
        ..RouterConfig::default()
    }
}

fn make_item(name: &str) -> Item {
    let now = chrono::Utc::now();
    Item {
        id: ItemId::new(),
        kind: ItemKind::Object,
        name: name.into(),
        data_type_name: "demo.TestData".into(),
        payload: Some(b"{}".to_vec()),
        app_props: NamedValueSet::new(),
        app_scope: DEFAULT_APP_SCOPE.into(),
        created: now,
        expires: now + chrono::Duration::days(1),
        sequence: 0,
        transp_key_id: None,
        sender_key_id: None,
        recver_key_id: None,
        signature: None,
    }
}

fn session(node: &RouterNode) -> strata_router::SessionHandle {
    match node.connect(ClientId::new()) {
        ConnectOutcome::Session(session) => session,
        ConnectOutcome::Redirect(address) => panic!("unexpected redirect to {address}"),
    }
}

fn all_filter_xml() -> String {
    strata_expr::serialize(&strata_expr::Expr::all()).unwrap()
}

#[tokio::test]
async fn save_load_through_a_session() {
    let node = RouterNode::start(config());
    let session = session(&node);

    let item = make_item("Test");
    let saved_id = match session.submit(Request::SaveItem(item)).await.unwrap() {
        Response::Saved { id, sequence, .. } => {
            assert_eq!(sequence, 1);
            id
        }
        other => panic!("unexpected response: {other:?}"),
    };

    match session.submit(Request::LoadById(saved_id)).await.unwrap() {
        Response::MaybeItem(Some(item)) => assert_eq!(item.id, saved_id),
        other => panic!("unexpected response: {other:?}"),
    }
    match session
        .submit(Request::Query {
            scopes: vec![DEFAULT_APP_SCOPE.to_string()],
            filter_xml: all_filter_xml(),
            order_xml: None,
            start_row: 0,
            row_count: None,
        })
        .await
        .unwrap()
    {
        Response::Items(items) => assert_eq!(items.len(), 1),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_filter_xml_is_rejected() {
    let node = RouterNode::start(config());
    let session = session(&node);
    let result = session
        .submit(Request::Count {
            scopes: vec![DEFAULT_APP_SCOPE.to_string()],
            filter_xml: "not xml".into(),
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn durable_write_behind_and_restore() {
    let durable = Arc::new(InMemoryDurableStore::new());

    {
        let node = RouterNode::start_with_durable(config(), durable.clone())
            .await
            .unwrap();
        let session = session(&node);
        session
            .submit(Request::SaveItem(make_item("Persisted")))
            .await
            .unwrap();
        // write-behind runs off the commit path; give the pump a beat
        for _ in 0..100 {
            if durable.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(durable.len(), 1);
        node.shutdown();
    }

    // a fresh node restores the persisted state
    let node = RouterNode::start_with_durable(config(), durable.clone())
        .await
        .unwrap();
    let session = session(&node);
    match session
        .submit(Request::LoadByName {
            scope: DEFAULT_APP_SCOPE.to_string(),
            name: "Persisted".to_string(),
        })
        .await
        .unwrap()
    {
        Response::MaybeItem(Some(item)) => assert_eq!(item.name, "Persisted"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn restored_sequences_continue() {
    let durable = Arc::new(InMemoryDurableStore::new());
    {
        let node = RouterNode::start_with_durable(config(), durable.clone())
            .await
            .unwrap();
        let session = session(&node);
        for _ in 0..3 {
            session
                .submit(Request::SaveItem(make_item("Versioned")))
                .await
                .unwrap();
        }
        for _ in 0..100 {
            if durable.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        node.shutdown();
    }

    let node = RouterNode::start_with_durable(config(), durable).await.unwrap();
    let session = session(&node);
    match session.submit(Request::SaveItem(make_item("Versioned"))).await.unwrap() {
        Response::Saved { sequence, .. } => assert_eq!(sequence, 4),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn subscription_stream_follows_commits() {
    let node = RouterNode::start(config());
    let session = session(&node);

    let mut stream = session
        .subscribe(SubscribeSpec {
            scopes: vec![DEFAULT_APP_SCOPE.to_string()],
            filter_xml: all_filter_xml(),
            mode: SubscriptionMode::NewOnly,
            data_type_name: None,
        })
        .await
        .unwrap();

    for _ in 0..3 {
        session
            .submit(Request::SaveItem(make_item("Streamed")))
            .await
            .unwrap();
    }
    for expected in 1..=3 {
        let event = tokio::time::timeout(Duration::from_secs(2), stream.events.recv())
            .await
            .expect("event within the delay window")
            .expect("stream open");
        assert_eq!(event.sequence(), Some(expected));
    }
    session.cancel_subscription(stream.id).await;
    assert_eq!(node.subscription_count(), 0);
}

struct AlwaysRedirect;

impl RedirectPolicy for AlwaysRedirect {
    fn redirect_for(&self, _client_id: ClientId) -> Option<String> {
        Some("router-2.example:9113".to_string())
    }
}

#[tokio::test]
async fn redirect_policy_answers_connects() {
    let mut node = RouterNode::start(config());
    node.set_redirect_policy(Arc::new(AlwaysRedirect));
    match node.connect(ClientId::new()) {
        ConnectOutcome::Redirect(address) => assert_eq!(address, "router-2.example:9113"),
        ConnectOutcome::Session(_) => panic!("expected a redirect"),
    }
}

#[tokio::test]
async fn config_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("router.json");
    let config = RouterConfig {
        env_name: "SIT".into(),
        port: 9214,
        housekeep_secs: Some(5),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let loaded = RouterConfig::load(&path).unwrap();
    assert_eq!(loaded.env_name, "SIT");
    assert_eq!(loaded.port, 9214);
    assert_eq!(loaded.housekeep_secs, Some(5));
}
