mod common;

use bytes::Bytes;
use common::{FakeDataChannel, Harness};
use roomcast_sfu::{PeerId, RoomId};

#[tokio::test]
async fn test_broadcast_excludes_sender() {
    let h = Harness::new();
    let (alice, alice_dc) = h.join_with_channel("lobby", "alice").await;
    let (_bob, bob_dc) = h.join_with_channel("lobby", "bob").await;
    let (_carol, carol_dc) = h.join_with_channel("lobby", "carol").await;

    alice
        .handler()
        .on_data_message(Bytes::from_static(b"{\"pos\":[1,2,3]}"))
        .await;

    assert!(alice_dc.sent().is_empty());
    assert_eq!(bob_dc.sent(), vec![Bytes::from_static(b"{\"pos\":[1,2,3]}")]);
    assert_eq!(carol_dc.sent(), vec![Bytes::from_static(b"{\"pos\":[1,2,3]}")]);
}

#[tokio::test]
async fn test_departed_peer_is_skipped() {
    let h = Harness::new();
    let (alice, _) = h.join_with_channel("lobby", "alice").await;
    let (_bob, bob_dc) = h.join_with_channel("lobby", "bob").await;
    let (_carol, carol_dc) = h.join_with_channel("lobby", "carol").await;

    let room_id = RoomId::from("lobby");
    assert!(h.registry.leave(&room_id, &PeerId::from("bob"), None).await);

    let room = h.registry.room(&room_id).expect("room should exist");
    let delivered = room
        .broadcast_data(&PeerId::from("alice"), Bytes::from_static(b"hello"))
        .await;
    assert_eq!(delivered, 1);

    alice.handler().on_data_message(Bytes::from_static(b"again")).await;

    assert!(bob_dc.sent().is_empty());
    assert_eq!(carol_dc.sent().len(), 2);
}

#[tokio::test]
async fn test_failed_send_does_not_block_others() {
    let h = Harness::new();
    let (alice, _) = h.join_with_channel("lobby", "alice").await;
    let bob = h.join("lobby", "bob").await;
    bob.handler()
        .on_data_channel(FakeDataChannel::failing("game-sync"))
        .await;
    let (_carol, carol_dc) = h.join_with_channel("lobby", "carol").await;

    alice.handler().on_data_message(Bytes::from_static(b"tick")).await;

    assert_eq!(carol_dc.sent().len(), 1);

    let stats = h.registry.room(&RoomId::from("lobby")).expect("room").get_stats();
    let bob_stats = stats
        .peers
        .iter()
        .find(|p| p.peer_id == PeerId::from("bob"))
        .expect("bob stats");
    assert_eq!(bob_stats.send_failures, 1);
    assert_eq!(stats.messages_relayed, 1);
}

#[tokio::test]
async fn test_peer_without_channel_is_skipped() {
    let h = Harness::new();
    let (_alice, _) = h.join_with_channel("lobby", "alice").await;
    let _bob = h.join("lobby", "bob").await;

    let room = h.registry.room(&RoomId::from("lobby")).expect("room should exist");
    let delivered = room
        .broadcast_data(&PeerId::from("alice"), Bytes::from_static(b"x"))
        .await;

    assert_eq!(delivered, 0);
}
