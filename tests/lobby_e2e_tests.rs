//! End-to-end lobby scenarios over a real WebSocket connection.


use serde_json::json;
use serial_test::serial;
use test_helpers::{connect_lobby, recv_json, send_json, spawn_lobby};

fn create_alpha(netplay_version: &str) -> serde_json::Value {
    json!({
        "type": "request_create_room",
        "room_name": "alpha",
        "game_name": "Gopher Kart 64",
        "player_name": "pA",
        "emulator": "m64p",
        "netplay_version": netplay_version,
        "MD5": "deadbeef",
        "client_sha": "1111",
        "features": {"cheats": "off"},
    })
}

#[tokio::test]
#[serial]
async fn two_player_happy_path() {
    let (addr, _server) = spawn_lobby(47000, 2).await;

    // Client A creates the room.
    let (mut write_a, mut read_a) = connect_lobby(addr).await;
    send_json(&mut write_a, create_alpha("MPN-4")).await;

    let reply = recv_json(&mut read_a).await;
    assert_eq!(reply["type"], "reply_create_room");
    assert_eq!(reply["accept"], 0);
    assert_eq!(reply["room_name"], "alpha");
    assert_eq!(reply["port"], 47001);
    assert_eq!(reply["features"]["cheats"], "off");
    let room_port = reply["port"].as_u64().unwrap();

    // Client B joins by port with matching digest and build.
    let (mut write_b, mut read_b) = connect_lobby(addr).await;
    send_json(
        &mut write_b,
        json!({
            "type": "request_join_room",
            "port": room_port,
            "player_name": "pB",
            "MD5": "deadbeef",
            "client_sha": "1111",
        }),
    )
    .await;

    let reply = recv_json(&mut read_b).await;
    assert_eq!(reply["type"], "reply_join_room");
    assert_eq!(reply["accept"], 0);
    assert_eq!(reply["room_name"], "alpha");

    // A starts the game; both seats get reply_begin_game with the port.
    send_json(
        &mut write_a,
        json!({"type": "request_begin_game", "port": room_port}),
    )
    .await;

    for reader in [&mut read_a, &mut read_b] {
        let reply = recv_json(reader).await;
        assert_eq!(reply["type"], "reply_begin_game");
        assert_eq!(reply["accept"], 0);
        assert_eq!(reply["port"], room_port);
    }
}

#[tokio::test]
#[serial]
async fn wrong_netplay_version_is_rejected_over_the_wire() {
    let (addr, _server) = spawn_lobby(47010, 2).await;

    let (mut write, mut read) = connect_lobby(addr).await;
    send_json(&mut write, create_alpha("MPN-3")).await;

    let reply = recv_json(&mut read).await;
    assert_eq!(reply["type"], "reply_create_room");
    assert_eq!(reply["accept"], 2);
}

#[tokio::test]
#[serial]
async fn chat_reaches_every_seat() {
    let (addr, _server) = spawn_lobby(47020, 2).await;

    let (mut write_a, mut read_a) = connect_lobby(addr).await;
    send_json(&mut write_a, create_alpha("MPN-4")).await;
    let reply = recv_json(&mut read_a).await;
    let room_port = reply["port"].as_u64().unwrap();

    let (mut write_b, mut read_b) = connect_lobby(addr).await;
    send_json(
        &mut write_b,
        json!({
            "type": "request_join_room",
            "port": room_port,
            "player_name": "pB",
            "MD5": "deadbeef",
            "client_sha": "1111",
        }),
    )
    .await;
    recv_json(&mut read_b).await;

    send_json(
        &mut write_b,
        json!({
            "type": "request_chat_message",
            "port": room_port,
            "player_name": "pB",
            "message": "ready when you are",
        }),
    )
    .await;

    for reader in [&mut read_a, &mut read_b] {
        let reply = recv_json(reader).await;
        assert_eq!(reply["type"], "reply_chat_message");
        assert_eq!(reply["message"], "pB: ready when you are");
    }
}

#[tokio::test]
#[serial]
async fn version_is_served_before_auth_and_motd_after() {
    let (addr, _server) = spawn_lobby(47030, 1).await;
    let (mut write, mut read) = connect_lobby(addr).await;

    send_json(&mut write, json!({"type": "request_version"})).await;
    let reply = recv_json(&mut read).await;
    assert_eq!(reply["type"], "reply_version");
    assert_eq!(reply["accept"], 0);

    // Unauthenticated motd is refused.
    send_json(&mut write, json!({"type": "request_motd"})).await;
    let reply = recv_json(&mut read).await;
    assert_eq!(reply["type"], "reply_motd");
    assert_eq!(reply["accept"], 8);

    // get_rooms authenticates the connection (auth disabled), then motd works.
    send_json(
        &mut write,
        json!({"type": "request_get_rooms", "emulator": "m64p"}),
    )
    .await;
    let terminator = recv_json(&mut read).await;
    assert_eq!(terminator["type"], "reply_get_rooms");
    assert_eq!(terminator["room_name"], "");

    send_json(&mut write, json!({"type": "request_motd"})).await;
    let reply = recv_json(&mut read).await;
    assert_eq!(reply["type"], "reply_motd");
    assert_eq!(reply["accept"], 0);
    assert_eq!(reply["message"], "MPN Beta");
}

#[tokio::test]
#[serial]
async fn creator_disconnect_frees_the_room_for_a_new_name() {
    let (addr, server) = spawn_lobby(47040, 1).await;

    let (mut write_a, mut read_a) = connect_lobby(addr).await;
    send_json(&mut write_a, create_alpha("MPN-4")).await;
    let reply = recv_json(&mut read_a).await;
    assert_eq!(reply["accept"], 0);

    // Dropping the socket is the disconnect signal.
    drop(write_a);
    drop(read_a);

    // The registry empties once the server notices the close.
    for _ in 0..50 {
        if server.room_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(server.room_count(), 0, "room destroyed on lobby disconnect");

    // The port range of one is usable again.
    let (mut write_b, mut read_b) = connect_lobby(addr).await;
    let mut request = create_alpha("MPN-4");
    request["room_name"] = json!("beta");
    send_json(&mut write_b, request).await;
    let reply = recv_json(&mut read_b).await;
    assert_eq!(reply["accept"], 0);
    assert_eq!(reply["port"], 47041);
}
