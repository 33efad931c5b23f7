//! Application-layer security tests: signing and encryption of item
//! payloads across two clients sharing one router.

use serde::{Deserialize, Serialize};
use strata_client::CoreClient;
use strata_router::{RouterConfig, RouterNode};
use strata_types::CoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestData {
    field1: String,
    field2: i32,
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
async fn crypto_gating_across_two_clients() {
    let node = start_node();
    let sender = CoreClient::connect(&node).unwrap();
    let reader = CoreClient::connect(&node).unwrap();

    // both clients generate keys; only public keys are exchanged
    let sender_key = sender.crypto().generate_new_keys();
    let reader_key = reader.crypto().generate_new_keys();
    reader
        .crypto()
        .set_public_key(&sender_key, &sender.crypto().get_public_key(&sender_key).unwrap())
        .unwrap();
    sender
        .crypto()
        .set_public_key(&reader_key, &reader.crypto().get_public_key(&reader_key).unwrap())
        .unwrap();

    // the sender publishes a signed, transport-encrypted payload
    let data = TestData {
        field1: "classified".into(),
        field2: 7,
    };
    let mut item = sender.make_object(&data, "Secret.Report", None).unwrap();
    item.set_transp_key_id(&sender_key).unwrap();
    item.set_sender_key_id(&sender_key).unwrap();
    sender.save_item(&mut item).await.unwrap();

    // the reader sees a signed, secret item
    let received = reader.load_item("Secret.Report").await.unwrap().unwrap();
    assert!(received.is_secret());
    assert!(received.is_signed(reader.crypto()));

    // reading the data fails until the transport key is imported
    let err = received.data_as::<TestData>(reader.crypto()).unwrap_err();
    assert!(matches!(err, CoreError::Security(_)));

    // import the key and retry the identical read, without reloading
    let exported = sender.crypto().get_transport_key(&sender_key).unwrap();
    reader
        .crypto()
        .set_transport_key(&sender_key, &exported)
        .unwrap();
    assert_eq!(
        received.data_as::<TestData>(reader.crypto()).unwrap().unwrap(),
        data
    );
}

#[tokio::test]
async fn transport_key_bootstraps_through_the_store() {
    let node = start_node();
    let sender = CoreClient::connect(&node).unwrap();
    let reader = CoreClient::connect(&node).unwrap();

    let sender_key = sender.crypto().generate_new_keys();
    let reader_key = reader.crypto().generate_new_keys();
    reader
        .crypto()
        .set_public_key(&sender_key, &sender.crypto().get_public_key(&sender_key).unwrap())
        .unwrap();
    sender
        .crypto()
        .set_public_key(&reader_key, &reader.crypto().get_public_key(&reader_key).unwrap())
        .unwrap();

    // the sender ships its transport key as a signed payload sealed
    // to the reader — the usual bootstrap over the store itself
    let key_material = sender.crypto().get_transport_key(&sender_key).unwrap();
    let mut envelope = sender
        .make_object(&key_material, &format!("Keys.{sender_key}"), None)
        .unwrap();
    envelope.set_recver_key_id(&reader_key).unwrap();
    envelope.set_sender_key_id(&sender_key).unwrap();
    sender.save_item(&mut envelope).await.unwrap();

    // an actual secret payload follows
    let data = TestData {
        field1: "payload-after-bootstrap".into(),
        field2: 11,
    };
    let mut item = sender.make_object(&data, "Secret.Data", None).unwrap();
    item.set_transp_key_id(&sender_key).unwrap();
    sender.save_item(&mut item).await.unwrap();

    // the reader unwraps the key envelope with its own secret key,
    // verifying the sender's signature on the way
    let received_envelope = reader
        .load_item(&format!("Keys.{sender_key}"))
        .await
        .unwrap()
        .unwrap();
    assert!(received_envelope.is_signed(reader.crypto()));
    let imported: String = received_envelope
        .data_as(reader.crypto())
        .unwrap()
        .unwrap();
    reader
        .crypto()
        .set_transport_key(&sender_key, &imported)
        .unwrap();

    // and can now read the secret payload
    let received = reader.load_item("Secret.Data").await.unwrap().unwrap();
    assert_eq!(
        received.data_as::<TestData>(reader.crypto()).unwrap().unwrap(),
        data
    );
}

#[tokio::test]
async fn tampered_payloads_do_not_verify() {
    let node = start_node();
    let sender = CoreClient::connect(&node).unwrap();
    let reader = CoreClient::connect(&node).unwrap();
    let sender_key = sender.crypto().generate_new_keys();
    reader
        .crypto()
        .set_public_key(&sender_key, &sender.crypto().get_public_key(&sender_key).unwrap())
        .unwrap();

    let mut item = sender
        .make_object(
            &TestData {
                field1: "signed".into(),
                field2: 1,
            },
            "Signed.Report",
            None,
        )
        .unwrap();
    item.set_sender_key_id(&sender_key).unwrap();
    sender.save_item(&mut item).await.unwrap();

    // unaltered: verifies
    let received = reader.load_item("Signed.Report").await.unwrap().unwrap();
    assert!(received.is_signed(reader.crypto()));

    // altered payload: signature no longer verifies
    let mut wire = received.to_item().unwrap();
    if let Some(payload) = wire.payload.as_mut() {
        payload[0] ^= 0xFF;
    }
    let tampered = strata_client::ClientItem::from_item(wire);
    assert!(!tampered.is_signed(reader.crypto()));
}
