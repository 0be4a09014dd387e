//! Per-room TCP control engine.
//!
//! One accept loop per room, one handler task per accepted connection. On
//! accept the server hands the client a slot byte, then serves opcode
//! records until EOF, a malformed record, or room shutdown. A failing
//! connection never tears the room down, and a control-channel disconnect
//! never frees a lobby seat.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::tcp::{self, ControlOpcode, Registration};
use crate::server::GameServer;

use super::Room;

/// Upper bound on a single settings/file transfer.
const MAX_TRANSFER: u32 = 64 * 1024 * 1024;

pub fn spawn(server: Arc<GameServer>, room: Arc<Room>) {
    tokio::spawn(accept_loop(server, room));
}

async fn accept_loop(_server: Arc<GameServer>, room: Arc<Room>) {
    let Some(listener) = room.take_tcp_listener() else {
        return;
    };
    let cancel = room.cancelled();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(room = %room.name, error = %err, "control accept failed");
                        continue;
                    }
                };

                let room = room.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        result = handle_connection(&room, stream) => {
                            if let Err(err) = result {
                                tracing::debug!(
                                    room = %room.name,
                                    %peer,
                                    error = %err,
                                    "control connection ended"
                                );
                            }
                        }
                    }
                });
            }
        }
    }
}

async fn handle_connection(room: &Arc<Room>, mut stream: TcpStream) -> anyhow::Result<()> {
    let slot = {
        let mut registrations = room.registrations.lock().unwrap_or_else(|e| e.into_inner());
        registrations.next_slot()
    };
    let Some(slot) = slot else {
        bail!("no free slot for control connection");
    };
    stream
        .write_u8(slot)
        .await
        .context("slot handshake write")?;

    loop {
        let opcode = match stream.read_u8().await {
            Ok(byte) => ControlOpcode::try_from(byte)?,
            // EOF is the normal end of a control connection.
            Err(_) => return Ok(()),
        };
        room.touch_activity();

        match opcode {
            ControlOpcode::SendRegistration => {
                let reg_id = stream.read_u32().await?;
                let plugin = stream.read_u8().await?;
                let raw = stream.read_u8().await?;
                room.registrations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .register(
                        slot,
                        Registration {
                            reg_id,
                            plugin,
                            raw,
                        },
                    );
                tracing::info!(room = %room.name, slot, reg_id, "player registered");
            }

            ControlOpcode::RequestRegistration => {
                let table = room
                    .registrations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .table();
                stream
                    .write_all(&tcp::encode_registration_table(&table))
                    .await?;
            }

            ControlOpcode::UploadSettings => {
                let payload = read_blob(&mut stream).await?;
                let mut settings = room.settings.lock().unwrap_or_else(|e| e.into_inner());
                // First uploader wins; later uploads are ignored.
                if settings.is_none() {
                    *settings = Some(payload);
                }
            }

            ControlOpcode::RequestSettings => {
                let reply = {
                    let settings = room.settings.lock().unwrap_or_else(|e| e.into_inner());
                    tcp::encode_blob(settings.as_deref().unwrap_or_default())
                };
                stream.write_all(&reply).await?;
            }

            ControlOpcode::UploadFile => {
                let name = read_name(&mut stream).await?;
                let data = read_blob(&mut stream).await?;
                room.files
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(name, data);
            }

            ControlOpcode::RequestFile => {
                let name = read_name(&mut stream).await?;
                let reply = {
                    let files = room.files.lock().unwrap_or_else(|e| e.into_inner());
                    tcp::encode_blob(files.get(&name).map(Vec::as_slice).unwrap_or_default())
                };
                stream.write_all(&reply).await?;
            }

            ControlOpcode::BufferChange => {
                let depth = stream.read_u32().await?;
                room.game_data
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .set_base_buffer(depth);
                tracing::info!(room = %room.name, depth, "buffer depth changed");
            }

            ControlOpcode::DisconnectNotice => {
                let seat = stream.read_u8().await?;
                room.registrations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .mark_disconnect(seat);
                tracing::info!(room = %room.name, seat, "disconnect notice");
            }
        }
    }
}

async fn read_blob(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    if len > MAX_TRANSFER {
        bail!("transfer of {len} bytes exceeds cap");
    }
    let mut data = vec![0u8; len as usize];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

async fn read_name(stream: &mut TcpStream) -> anyhow::Result<String> {
    let raw = read_blob(stream).await?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}
