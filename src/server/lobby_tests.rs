use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::config::ServerConfig;
use crate::protocol::{Accept, LobbyReply, LobbyRequest};
use crate::room::ClientHandle;

use super::GameServer;

fn test_server(base_port: u16, max_games: u16) -> Arc<GameServer> {
    GameServer::new(ServerConfig {
        server_name: "test".to_string(),
        base_port,
        max_games,
        ..ServerConfig::default()
    })
}

fn connect() -> (ClientHandle, mpsc::Receiver<LobbyReply>) {
    let (tx, rx) = mpsc::channel(32);
    (ClientHandle::new(tx), rx)
}

async fn recv(rx: &mut mpsc::Receiver<LobbyReply>) -> LobbyReply {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("reply within deadline")
        .expect("channel open")
}

struct CreateBuilder {
    room_name: String,
    player_name: String,
    password: String,
    emulator: String,
    netplay_version: String,
}

impl CreateBuilder {
    fn new(room_name: &str, player_name: &str) -> Self {
        Self {
            room_name: room_name.to_string(),
            player_name: player_name.to_string(),
            password: String::new(),
            emulator: "m64p".to_string(),
            netplay_version: "MPN-4".to_string(),
        }
    }

    fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    fn emulator(mut self, emulator: &str) -> Self {
        self.emulator = emulator.to_string();
        self
    }

    fn version(mut self, version: &str) -> Self {
        self.netplay_version = version.to_string();
        self
    }

    fn build(self) -> LobbyRequest {
        LobbyRequest::CreateRoom {
            room_name: self.room_name,
            game_name: "Gopher Kart 64".to_string(),
            player_name: self.player_name,
            password: self.password,
            md5: "deadbeef".to_string(),
            client_sha: "1111".to_string(),
            emulator: self.emulator,
            netplay_version: self.netplay_version,
            features: HashMap::new(),
            auth_time: String::new(),
            auth: String::new(),
        }
    }
}

fn join_request(port: u16, player_name: &str) -> LobbyRequest {
    LobbyRequest::JoinRoom {
        port,
        player_name: player_name.to_string(),
        password: String::new(),
        md5: "deadbeef".to_string(),
        client_sha: "1111".to_string(),
    }
}

async fn create_accept(
    server: &Arc<GameServer>,
    conn: &ClientHandle,
    rx: &mut mpsc::Receiver<LobbyReply>,
    authed: &mut bool,
    request: LobbyRequest,
) -> (Accept, u16) {
    server.handle_request(conn, "127.0.0.1", authed, request).await;
    let LobbyReply::CreateRoom { accept, port, .. } = recv(rx).await else {
        panic!("expected reply_create_room");
    };
    (accept, port)
}

async fn create_room(
    server: &Arc<GameServer>,
    room_name: &str,
) -> (ClientHandle, mpsc::Receiver<LobbyReply>, u16) {
    let (conn, mut rx) = connect();
    let mut authed = false;
    let (accept, port) = create_accept(
        server,
        &conn,
        &mut rx,
        &mut authed,
        CreateBuilder::new(room_name, "pA").build(),
    )
    .await;
    assert_eq!(accept, Accept::Accepted);
    assert!(authed, "create_room promotes the connection");
    (conn, rx, port)
}

#[tokio::test]
async fn create_room_allocates_the_lowest_port() {
    let server = test_server(46100, 2);
    let (_conn, _rx, port) = create_room(&server, "alpha").await;
    assert_eq!(port, 46101);
    assert!(server.room_by_name("alpha").is_some());
    assert!(server.room_by_port(46101).is_some());
}

#[tokio::test]
async fn create_room_validation_order_is_fixed() {
    let server = test_server(46110, 2);
    let (_held, _held_rx, _port) = create_room(&server, "alpha").await;

    let (conn, mut rx) = connect();
    let mut authed = false;

    // Duplicate name wins over every later check, even the version check.
    let (accept, _) = create_accept(
        &server,
        &conn,
        &mut rx,
        &mut authed,
        CreateBuilder::new("alpha", "pB").version("MPN-3").build(),
    )
    .await;
    assert_eq!(accept, Accept::DuplicateName);

    // Wrong version on a fresh name.
    let (accept, _) = create_accept(
        &server,
        &conn,
        &mut rx,
        &mut authed,
        CreateBuilder::new("beta", "pB").version("MPN-3").build(),
    )
    .await;
    assert_eq!(accept, Accept::MismatchVersion);
}

#[tokio::test]
async fn empty_names_and_emulator_are_rejected() {
    let server = test_server(46120, 2);
    let cases = [
        (CreateBuilder::new("", "pA"), Accept::BadName),
        (CreateBuilder::new("alpha", ""), Accept::BadName),
        (
            CreateBuilder::new("alpha", "pA").emulator(""),
            Accept::BadEmulator,
        ),
    ];
    for (builder, expected) in cases {
        let (conn, mut rx) = connect();
        let mut authed = false;
        let (accept, _) =
            create_accept(&server, &conn, &mut rx, &mut authed, builder.build()).await;
        assert_eq!(accept, expected);
    }
}

#[tokio::test]
async fn port_exhaustion_replies_other() {
    let server = test_server(46130, 1);
    let (_conn, _rx, _port) = create_room(&server, "alpha").await;

    let (conn, mut rx) = connect();
    let mut authed = false;
    let (accept, _) = create_accept(
        &server,
        &conn,
        &mut rx,
        &mut authed,
        CreateBuilder::new("beta", "pB").build(),
    )
    .await;
    assert_eq!(accept, Accept::Other);
}

#[tokio::test]
async fn join_validation_order_is_fixed() {
    let server = test_server(46140, 2);
    let (_creator, _creator_rx, port) = create_room(&server, "alpha").await;

    let cases = [
        // Unknown port.
        (port + 1, "pB", "deadbeef", "1111", Accept::RoomDeleted),
        // Client build mismatch beats the digest mismatch.
        (port, "pB", "feedface", "2222", Accept::MismatchVersion),
        // ROM digest mismatch alone.
        (port, "pB", "feedface", "1111", Accept::MismatchVersion),
        // Empty player name.
        (port, "", "deadbeef", "1111", Accept::BadName),
        // Duplicate player name (the creator's).
        (port, "pA", "deadbeef", "1111", Accept::DuplicateName),
    ];
    for (port, player, md5, sha, expected) in cases {
        let (conn, mut rx) = connect();
        let mut authed = true;
        server
            .handle_request(
                &conn,
                "127.0.0.1",
                &mut authed,
                LobbyRequest::JoinRoom {
                    port,
                    player_name: player.to_string(),
                    password: String::new(),
                    md5: md5.to_string(),
                    client_sha: sha.to_string(),
                },
            )
            .await;
        let LobbyReply::JoinRoom { accept, .. } = recv(&mut rx).await else {
            panic!("expected reply_join_room");
        };
        assert_eq!(accept, expected);
    }

    let room = server.room_by_port(port).expect("room untouched");
    assert_eq!(room.seats.lock().await.len(), 1, "failed joins left no seat");
}

#[tokio::test]
async fn password_mismatch_is_rejected() {
    let server = test_server(46150, 2);
    let (conn, mut rx) = connect();
    let mut authed = false;
    let (accept, port) = create_accept(
        &server,
        &conn,
        &mut rx,
        &mut authed,
        CreateBuilder::new("alpha", "pA").password("sekrit").build(),
    )
    .await;
    assert_eq!(accept, Accept::Accepted);

    let (joiner, mut joiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(
            &joiner,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::JoinRoom {
                port,
                player_name: "pB".to_string(),
                password: "wrong".to_string(),
                md5: "deadbeef".to_string(),
                client_sha: "1111".to_string(),
            },
        )
        .await;
    let LobbyReply::JoinRoom { accept, .. } = recv(&mut joiner_rx).await else {
        panic!("expected reply_join_room");
    };
    assert_eq!(accept, Accept::BadPassword);
}

#[tokio::test]
async fn fifth_joiner_gets_room_full() {
    let server = test_server(46160, 2);
    let (_creator, _creator_rx, port) = create_room(&server, "alpha").await;

    for player in ["pB", "pC", "pD"] {
        let (conn, mut rx) = connect();
        let mut authed = true;
        server
            .handle_request(&conn, "127.0.0.1", &mut authed, join_request(port, player))
            .await;
        let LobbyReply::JoinRoom { accept, .. } = recv(&mut rx).await else {
            panic!("expected reply_join_room");
        };
        assert_eq!(accept, Accept::Accepted);
    }

    let (conn, mut rx) = connect();
    let mut authed = true;
    server
        .handle_request(&conn, "127.0.0.1", &mut authed, join_request(port, "pE"))
        .await;
    let LobbyReply::JoinRoom { accept, .. } = recv(&mut rx).await else {
        panic!("expected reply_join_room");
    };
    assert_eq!(accept, Accept::RoomFull);

    let room = server.room_by_port(port).expect("room still there");
    assert_eq!(room.seats.lock().await.len(), 4);
}

#[tokio::test]
async fn seats_are_distinct_and_lowest_free() {
    let server = test_server(46170, 2);
    let (_creator, _creator_rx, port) = create_room(&server, "alpha").await;

    let (joiner, mut joiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(&joiner, "127.0.0.1", &mut authed, join_request(port, "pB"))
        .await;
    recv(&mut joiner_rx).await;

    let room = server.room_by_port(port).expect("room exists");
    let mut numbers: Vec<u8> = room
        .seats
        .lock()
        .await
        .iter()
        .map(|seat| seat.number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![0, 1]);

    // Seat 1 leaves; the next joiner reclaims the lowest free number.
    server.handle_disconnect(joiner.id).await;
    let (rejoiner, mut rejoiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(&rejoiner, "127.0.0.1", &mut authed, join_request(port, "pC"))
        .await;
    recv(&mut rejoiner_rx).await;
    let mut numbers: Vec<u8> = room
        .seats
        .lock()
        .await
        .iter()
        .map(|seat| seat.number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![0, 1]);
}

#[tokio::test]
async fn begin_game_broadcasts_the_port_to_every_seat() {
    let server = test_server(46180, 2);
    let (creator, mut creator_rx, port) = create_room(&server, "alpha").await;

    let (joiner, mut joiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(&joiner, "127.0.0.1", &mut authed, join_request(port, "pB"))
        .await;
    recv(&mut joiner_rx).await;

    let mut authed = true;
    server
        .handle_request(
            &creator,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::BeginGame { port },
        )
        .await;

    for rx in [&mut creator_rx, &mut joiner_rx] {
        let LobbyReply::BeginGame {
            accept,
            port: reply_port,
        } = recv(rx).await
        else {
            panic!("expected reply_begin_game");
        };
        assert_eq!(accept, Accept::Accepted);
        assert_eq!(reply_port, port);
    }

    // Idempotent: a second begin_game is logged and dropped.
    let mut authed = true;
    server
        .handle_request(
            &creator,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::BeginGame { port },
        )
        .await;
    assert!(
        timeout(Duration::from_millis(200), creator_rx.recv())
            .await
            .is_err(),
        "no further reply_begin_game frames"
    );
}

#[tokio::test]
async fn chat_is_fanned_out_with_the_sender_name() {
    let server = test_server(46190, 2);
    let (creator, mut creator_rx, port) = create_room(&server, "alpha").await;

    let (joiner, mut joiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(&joiner, "127.0.0.1", &mut authed, join_request(port, "pB"))
        .await;
    recv(&mut joiner_rx).await;

    let mut authed = true;
    server
        .handle_request(
            &creator,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::ChatMessage {
                port,
                player_name: "pA".to_string(),
                message: "gl hf".to_string(),
            },
        )
        .await;

    for rx in [&mut creator_rx, &mut joiner_rx] {
        let LobbyReply::ChatMessage { accept, message } = recv(rx).await else {
            panic!("expected reply_chat_message");
        };
        assert_eq!(accept, Accept::Accepted);
        assert_eq!(message, "pA: gl hf");
    }
}

#[tokio::test]
async fn players_roster_maps_seat_numbers_to_names() {
    let server = test_server(46200, 2);
    let (creator, mut creator_rx, port) = create_room(&server, "alpha").await;

    let (joiner, mut joiner_rx) = connect();
    let mut authed = true;
    server
        .handle_request(&joiner, "127.0.0.1", &mut authed, join_request(port, "pB"))
        .await;
    recv(&mut joiner_rx).await;

    let mut authed = true;
    server
        .handle_request(
            &creator,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::Players { port },
        )
        .await;

    let LobbyReply::Players {
        accept,
        player_names,
    } = recv(&mut creator_rx).await
    else {
        panic!("expected reply_players");
    };
    assert_eq!(accept, Accept::Accepted);
    assert_eq!(player_names, vec!["pA", "pB", "", ""]);
}

#[tokio::test]
async fn gated_requests_before_auth_reply_bad_auth() {
    let server = test_server(46210, 2);
    let (conn, mut rx) = connect();
    let mut authed = false;

    server
        .handle_request(
            &conn,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::Players { port: 1 },
        )
        .await;
    let LobbyReply::Players { accept, .. } = recv(&mut rx).await else {
        panic!("expected reply_players");
    };
    assert_eq!(accept, Accept::BadAuth);

    server
        .handle_request(&conn, "127.0.0.1", &mut authed, LobbyRequest::Motd {})
        .await;
    let LobbyReply::Motd { accept, .. } = recv(&mut rx).await else {
        panic!("expected reply_motd");
    };
    assert_eq!(accept, Accept::BadAuth);

    // request_version stays open to everyone.
    server
        .handle_request(&conn, "127.0.0.1", &mut authed, LobbyRequest::Version {})
        .await;
    let LobbyReply::Version { accept, message } = recv(&mut rx).await else {
        panic!("expected reply_version");
    };
    assert_eq!(accept, Accept::Accepted);
    assert!(message.starts_with("MPN-"));
}

#[tokio::test]
async fn get_rooms_lists_joinable_rooms_then_terminates() {
    let server = test_server(46220, 2);
    let (_creator, _creator_rx, port) = create_room(&server, "alpha").await;

    let (conn, mut rx) = connect();
    let mut authed = false;
    server
        .handle_request(
            &conn,
            "127.0.0.1",
            &mut authed,
            LobbyRequest::GetRooms {
                emulator: "m64p".to_string(),
                netplay_version: "MPN-4".to_string(),
                auth_time: String::new(),
                auth: String::new(),
            },
        )
        .await;
    assert!(authed, "get_rooms promotes the connection");

    let LobbyReply::GetRooms {
        accept,
        room_name,
        protected,
        port: listed_port,
        ..
    } = recv(&mut rx).await
    else {
        panic!("expected reply_get_rooms");
    };
    assert_eq!(accept, Accept::Accepted);
    assert_eq!(room_name, "alpha");
    assert!(!protected);
    assert_eq!(listed_port, port);

    let LobbyReply::GetRooms { room_name, .. } = recv(&mut rx).await else {
        panic!("expected terminator frame");
    };
    assert!(room_name.is_empty(), "listing ends with an empty room name");
}

#[tokio::test]
async fn empty_room_before_start_is_destroyed_and_port_reused() {
    let server = test_server(46230, 1);
    let (creator, _creator_rx, port) = create_room(&server, "alpha").await;

    server.handle_disconnect(creator.id).await;
    assert!(server.room_by_name("alpha").is_none(), "room destroyed");

    // The single port in the range is free again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_conn, _rx, reused) = create_room(&server, "beta").await;
    assert_eq!(reused, port);
}

mod auth_gate {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn enable_auth_without_secret_rejects_create_room() {
        std::env::remove_var("M64P_AUTH");
        let server = GameServer::new(ServerConfig {
            server_name: "test".to_string(),
            base_port: 46240,
            max_games: 1,
            enable_auth: true,
            ..ServerConfig::default()
        });

        let (conn, mut rx) = connect();
        let mut authed = false;
        let (accept, _) = create_accept(
            &server,
            &conn,
            &mut rx,
            &mut authed,
            CreateBuilder::new("alpha", "pA").build(),
        )
        .await;
        assert_eq!(accept, Accept::BadAuth);
        assert!(!authed);
        assert!(server.room_by_name("alpha").is_none(), "no side effects");
    }
}
