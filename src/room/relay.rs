//! Per-room UDP relay engine.
//!
//! A single read loop per room decodes datagrams, updates [`GameData`]
//! under its mutex, and fans replies out after the lock is released.
//! Malformed frames and frames for unregistered slots are dropped without a
//! reply.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::protocol::udp::{self, Datagram, InputEntry};
use crate::server::GameServer;

use super::Room;

/// Largest accepted datagram; sync probes are the biggest frames and stay
/// well under this.
const MAX_DATAGRAM: usize = 2048;

pub fn spawn(_server: Arc<GameServer>, room: Arc<Room>) {
    tokio::spawn(read_loop(room));
}

async fn read_loop(room: Arc<Room>) {
    let Some(socket) = room.udp_socket() else {
        return;
    };
    let cancel = room.cancelled();
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, addr)) => {
                        handle_datagram(&room, &socket, &buf[..len], addr).await;
                    }
                    Err(err) => {
                        tracing::warn!(room = %room.name, error = %err, "udp receive failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_datagram(room: &Arc<Room>, socket: &UdpSocket, frame: &[u8], addr: SocketAddr) {
    let datagram = match Datagram::decode(frame) {
        Ok(datagram) => datagram,
        Err(err) => {
            tracing::trace!(room = %room.name, %addr, error = %err, "dropped datagram");
            return;
        }
    };

    let slot = match &datagram {
        Datagram::KeyInfoClient { slot, .. }
        | Datagram::PlayerInputRequest { slot, .. }
        | Datagram::Cp0Info { slot, .. } => *slot,
    };
    let registered = room
        .registrations
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .is_registered(slot);
    if !registered {
        return;
    }

    room.touch_packet();
    room.touch_activity();

    match datagram {
        Datagram::KeyInfoClient {
            slot,
            count,
            keys,
            plugin,
        } => {
            let targets = {
                let mut data = room.game_data.lock().unwrap_or_else(|e| e.into_inner());
                data.touch(slot as usize, addr);
                data.record_input(slot as usize, count, keys, plugin);
                data.fanout_targets(slot as usize)
            };
            let gratuitous = udp::encode_gratuitous(
                slot,
                InputEntry {
                    count,
                    keys,
                    plugin,
                },
            );
            for target in targets {
                let _ = socket.send_to(&gratuitous, target).await;
            }
        }

        Datagram::PlayerInputRequest {
            slot,
            count,
            spectator,
        } => {
            let reply = {
                let mut data = room.game_data.lock().unwrap_or_else(|e| e.into_inner());
                data.touch(slot as usize, addr);
                data.input_reply(slot as usize, count, spectator != 0)
            };
            if let Some(status) = reply.log_status {
                tracing::info!(
                    room = %room.name,
                    slot,
                    buffer_size = status.buffer_size,
                    buffer_health = status.buffer_health,
                    count_lag = status.count_lag,
                    "relay buffer status"
                );
            }
            if !reply.entries.is_empty() {
                let frame = udp::encode_key_info_server(slot, &reply.entries);
                let _ = socket.send_to(&frame, addr).await;
            }
        }

        Datagram::Cp0Info { slot, count, sync } => {
            let conflict = {
                let mut data = room.game_data.lock().unwrap_or_else(|e| e.into_inner());
                data.touch(slot as usize, addr);
                data.record_sync(slot, count, sync)
            };
            if let Some((first, second)) = conflict {
                tracing::error!(
                    room = %room.name,
                    count,
                    slot_a = first,
                    slot_b = second,
                    "desync detected between slots"
                );
            }
        }
    }
}
