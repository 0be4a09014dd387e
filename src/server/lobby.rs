//! Lobby request handling: the per-connection JSON state machine.
//!
//! A connection is either unauthenticated or authenticated. `request_version`
//! is always allowed; `request_create_room` and `request_get_rooms` perform
//! auth and promote the connection on success; everything else requires the
//! promoted state and is otherwise answered with `BadAuth`. Replies to a
//! request are queued on the requester's writer before the next request is
//! read, so per-connection ordering holds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth;
use crate::protocol::{Accept, LobbyReply, LobbyRequest, MAX_PLAYERS, NETPLAY_VERSION};
use crate::room::{control, monitor, relay, ClientHandle, Room, RoomParams, Seat};

use super::GameServer;

impl GameServer {
    /// Dispatches one lobby request from `conn`.
    pub async fn handle_request(
        self: &Arc<Self>,
        conn: &ClientHandle,
        remote_ip: &str,
        authenticated: &mut bool,
        request: LobbyRequest,
    ) {
        match request {
            LobbyRequest::Version {} => {
                self.reply(
                    conn,
                    LobbyReply::Version {
                        accept: Accept::Accepted,
                        message: crate::config::ServerConfig::build_string(),
                    },
                )
                .await;
            }

            LobbyRequest::Motd {} if !*authenticated => {
                self.reply(conn, request_rejection(&request)).await;
            }
            LobbyRequest::Motd {} => {
                self.reply(
                    conn,
                    LobbyReply::Motd {
                        accept: Accept::Accepted,
                        message: self.config().motd.clone(),
                    },
                )
                .await;
            }

            LobbyRequest::GetRooms {
                ref emulator,
                ref auth_time,
                ref auth,
                ..
            } => {
                if let Err(err) =
                    auth::verify(self.config().enable_auth, emulator, auth_time, auth)
                {
                    tracing::warn!(%remote_ip, error = %err, "get_rooms auth failed");
                    self.reply(conn, request_rejection(&request)).await;
                    return;
                }
                *authenticated = true;
                self.send_room_listing(conn, emulator).await;
            }

            LobbyRequest::CreateRoom { .. } => {
                self.handle_create_room(conn, remote_ip, authenticated, request)
                    .await;
            }

            request if !*authenticated => {
                tracing::debug!(%remote_ip, "gated request before auth");
                self.reply(conn, request_rejection(&request)).await;
            }

            LobbyRequest::JoinRoom {
                port,
                player_name,
                password,
                md5,
                client_sha,
            } => {
                self.handle_join_room(
                    conn,
                    remote_ip,
                    port,
                    player_name,
                    password,
                    md5,
                    client_sha,
                )
                .await;
            }

            LobbyRequest::Players { port } => {
                let Some(room) = self.room_by_port(port) else {
                    self.reply(
                        conn,
                        LobbyReply::Players {
                            accept: Accept::RoomDeleted,
                            player_names: Vec::new(),
                        },
                    )
                    .await;
                    return;
                };
                room.touch_activity();
                let reply = LobbyReply::Players {
                    accept: Accept::Accepted,
                    player_names: room.roster().await,
                };
                room.broadcast(&reply).await;
            }

            LobbyRequest::ChatMessage {
                port,
                player_name,
                message,
            } => {
                let Some(room) = self.room_by_port(port) else {
                    self.reply(
                        conn,
                        LobbyReply::ChatMessage {
                            accept: Accept::RoomDeleted,
                            message: String::new(),
                        },
                    )
                    .await;
                    return;
                };
                room.touch_activity();
                let reply = LobbyReply::ChatMessage {
                    accept: Accept::Accepted,
                    message: format!("{player_name}: {message}"),
                };
                room.broadcast(&reply).await;
            }

            LobbyRequest::BeginGame { port } => {
                self.handle_begin_game(conn, port).await;
            }
        }
    }

    async fn reply(&self, conn: &ClientHandle, reply: LobbyReply) {
        if conn.tx.send(reply).await.is_err() {
            tracing::debug!(conn = %conn.id, "reply dropped, connection gone");
        }
    }

    /// One `reply_get_rooms` frame per joinable room, then a terminator
    /// frame with an empty room name. Rooms already running are not listed.
    async fn send_room_listing(&self, conn: &ClientHandle, emulator: &str) {
        for room in self.rooms_snapshot() {
            if room.is_running() || room.is_closed() {
                continue;
            }
            if !emulator.is_empty() && room.emulator != emulator {
                continue;
            }
            self.reply(
                conn,
                LobbyReply::GetRooms {
                    accept: Accept::Accepted,
                    room_name: room.name.clone(),
                    game_name: room.game_name.clone(),
                    md5: room.md5.clone(),
                    emulator: room.emulator.clone(),
                    protected: !room.password.is_empty(),
                    port: room.port,
                    features: room.features.clone(),
                },
            )
            .await;
        }
        self.reply(
            conn,
            LobbyReply::GetRooms {
                accept: Accept::Accepted,
                room_name: String::new(),
                game_name: String::new(),
                md5: String::new(),
                emulator: String::new(),
                protected: false,
                port: 0,
                features: HashMap::new(),
            },
        )
        .await;
    }

    /// Ordered validation per the admission protocol; the first failure
    /// wins and leaves no side effects.
    async fn handle_create_room(
        self: &Arc<Self>,
        conn: &ClientHandle,
        remote_ip: &str,
        authenticated: &mut bool,
        request: LobbyRequest,
    ) {
        let LobbyRequest::CreateRoom {
            room_name,
            game_name,
            player_name,
            password,
            md5,
            client_sha,
            emulator,
            netplay_version,
            features,
            auth_time,
            auth,
        } = request
        else {
            return;
        };

        let fail = |accept| LobbyReply::CreateRoom {
            accept,
            room_name: String::new(),
            game_name: String::new(),
            player_name: String::new(),
            port: 0,
            features: HashMap::new(),
        };

        // Creation is serialised: name uniqueness and port allocation stay
        // atomic with respect to concurrent create_room calls.
        let _create_guard = self.create_lock.lock().await;

        if self.room_by_name(&room_name).is_some() {
            self.reply(conn, fail(Accept::DuplicateName)).await;
            return;
        }
        if netplay_version != NETPLAY_VERSION {
            self.reply(conn, fail(Accept::MismatchVersion)).await;
            return;
        }
        if room_name.is_empty() {
            self.reply(conn, fail(Accept::BadName)).await;
            return;
        }
        if player_name.is_empty() {
            self.reply(conn, fail(Accept::BadName)).await;
            return;
        }
        if emulator.is_empty() {
            self.reply(conn, fail(Accept::BadEmulator)).await;
            return;
        }
        if let Err(err) = auth::verify(self.config().enable_auth, &emulator, &auth_time, &auth) {
            tracing::warn!(%remote_ip, error = %err, "create_room auth failed");
            self.reply(conn, fail(Accept::BadAuth)).await;
            return;
        }
        *authenticated = true;

        let (port, tcp, udp) = match self.allocate_listeners().await {
            Ok(bound) => bound,
            Err(err) => {
                tracing::warn!(%room_name, error = %err, "room creation failed");
                self.reply(conn, fail(Accept::Other)).await;
                return;
            }
        };

        let room = Arc::new(Room::new(
            RoomParams {
                name: room_name.clone(),
                game_name: game_name.clone(),
                md5,
                client_sha,
                emulator,
                password,
                features: features.clone(),
                creator: player_name.clone(),
            },
            port,
            tcp,
            udp,
        ));

        // The creator takes seat 0.
        room.seats.lock().await.push(Seat {
            number: 0,
            player_name: player_name.clone(),
            ip: remote_ip.to_string(),
            conn: conn.clone(),
        });

        self.rooms.insert(room_name.clone(), room.clone());
        control::spawn(self.clone(), room.clone());
        self.webhook.announce_room(&room);

        tracing::info!(
            room = %room_name,
            game = %game_name,
            creator = %player_name,
            port,
            "room created"
        );

        self.reply(
            conn,
            LobbyReply::CreateRoom {
                accept: Accept::Accepted,
                room_name,
                game_name,
                player_name,
                port,
                features,
            },
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_join_room(
        &self,
        conn: &ClientHandle,
        remote_ip: &str,
        port: u16,
        player_name: String,
        password: String,
        md5: String,
        client_sha: String,
    ) {
        let fail = |accept| LobbyReply::JoinRoom {
            accept,
            room_name: String::new(),
            game_name: String::new(),
            port: 0,
            features: HashMap::new(),
        };

        let Some(room) = self.room_by_port(port) else {
            self.reply(conn, fail(Accept::RoomDeleted)).await;
            return;
        };
        if room.password != password {
            self.reply(conn, fail(Accept::BadPassword)).await;
            return;
        }
        if room.client_sha != client_sha {
            self.reply(conn, fail(Accept::MismatchVersion)).await;
            return;
        }
        if room.md5 != md5 {
            self.reply(conn, fail(Accept::MismatchVersion)).await;
            return;
        }

        // Seat checks and the insert stay atomic under the seat lock.
        {
            let mut seats = room.seats.lock().await;
            if seats.len() >= MAX_PLAYERS {
                drop(seats);
                self.reply(conn, fail(Accept::RoomFull)).await;
                return;
            }
            if player_name.is_empty() {
                drop(seats);
                self.reply(conn, fail(Accept::BadName)).await;
                return;
            }
            if seats.iter().any(|seat| seat.player_name == player_name) {
                drop(seats);
                self.reply(conn, fail(Accept::DuplicateName)).await;
                return;
            }

            let taken: Vec<u8> = seats.iter().map(|seat| seat.number).collect();
            let number = (0..MAX_PLAYERS as u8)
                .find(|n| !taken.contains(n))
                .unwrap_or(0);
            seats.push(Seat {
                number,
                player_name: player_name.clone(),
                ip: remote_ip.to_string(),
                conn: conn.clone(),
            });
        }
        room.touch_activity();

        tracing::info!(room = %room.name, player = %player_name, port, "player joined room");

        self.reply(
            conn,
            LobbyReply::JoinRoom {
                accept: Accept::Accepted,
                room_name: room.name.clone(),
                game_name: room.game_name.clone(),
                port: room.port,
                features: room.features.clone(),
            },
        )
        .await;
    }

    async fn handle_begin_game(self: &Arc<Self>, conn: &ClientHandle, port: u16) {
        let Some(room) = self.room_by_port(port) else {
            self.reply(
                conn,
                LobbyReply::BeginGame {
                    accept: Accept::RoomDeleted,
                    port: 0,
                },
            )
            .await;
            return;
        };

        if !room.start() {
            tracing::warn!(room = %room.name, "begin_game on a room already running");
            return;
        }

        relay::spawn(self.clone(), room.clone());
        monitor::spawn(self.clone(), room.clone());

        tracing::info!(room = %room.name, port = room.port, "game started");

        room.broadcast(&LobbyReply::BeginGame {
            accept: Accept::Accepted,
            port: room.port,
        })
        .await;
    }
}

fn request_rejection(request: &LobbyRequest) -> LobbyReply {
    request.failure_reply(Accept::BadAuth)
}
