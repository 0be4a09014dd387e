//! Datagram formats for the per-room UDP input-relay channel.
//!
//! Every datagram starts with a 1-byte message type and a 1-byte player
//! slot; the payload is big-endian. Malformed frames (unknown type, slot out
//! of range, length inconsistent with the type) decode to an error and are
//! dropped silently by the relay.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use super::{FrameError, MAX_PLAYERS};

pub const KEY_INFO_CLIENT: u8 = 0;
pub const KEY_INFO_SERVER: u8 = 1;
pub const PLAYER_INPUT_REQUEST: u8 = 2;
pub const KEY_INFO_SERVER_GRATUITOUS: u8 = 3;
pub const CP0_INFO: u8 = 4;

/// One relayed frame of controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEntry {
    pub count: u32,
    pub keys: u32,
    pub plugin: u8,
}

/// Up to four consecutive frames fit in one `KeyInfoServer` reply.
pub type InputEntries = SmallVec<[InputEntry; 4]>;

/// A decoded client-to-server datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// The client executed frame `count` with input `keys`.
    KeyInfoClient {
        slot: u8,
        count: u32,
        keys: u32,
        plugin: u8,
    },
    /// The client wants input for `slot` starting at frame `count`.
    /// `spectator != 0` forbids synthesising missing frames.
    PlayerInputRequest {
        slot: u8,
        count: u32,
        spectator: u8,
    },
    /// Desync probe: an opaque sync blob for frame `count`.
    Cp0Info { slot: u8, count: u32, sync: Bytes },
}

impl Datagram {
    /// Decode a raw datagram. The slot byte is validated here; whether the
    /// slot is currently registered is the relay engine's concern.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < 2 {
            return Err(FrameError::Truncated {
                need: 2,
                have: frame.len(),
            });
        }
        let kind = frame[0];
        let slot = frame[1];
        if slot as usize >= MAX_PLAYERS {
            return Err(FrameError::SlotOutOfRange(slot));
        }
        let mut body = &frame[2..];

        match kind {
            KEY_INFO_CLIENT => {
                if body.len() != 9 {
                    return Err(FrameError::BadLength {
                        kind,
                        len: frame.len(),
                    });
                }
                Ok(Self::KeyInfoClient {
                    slot,
                    count: body.get_u32(),
                    keys: body.get_u32(),
                    plugin: body.get_u8(),
                })
            }
            PLAYER_INPUT_REQUEST => {
                if body.len() != 5 {
                    return Err(FrameError::BadLength {
                        kind,
                        len: frame.len(),
                    });
                }
                Ok(Self::PlayerInputRequest {
                    slot,
                    count: body.get_u32(),
                    spectator: body.get_u8(),
                })
            }
            CP0_INFO => {
                if body.len() < 4 {
                    return Err(FrameError::BadLength {
                        kind,
                        len: frame.len(),
                    });
                }
                let count = body.get_u32();
                Ok(Self::Cp0Info {
                    slot,
                    count,
                    sync: Bytes::copy_from_slice(body),
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

fn encode_entries(kind: u8, slot: u8, entries: &[InputEntry]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + entries.len() * 9);
    buf.put_u8(kind);
    buf.put_u8(slot);
    buf.put_u8(entries.len() as u8);
    for entry in entries {
        buf.put_u32(entry.count);
        buf.put_u32(entry.keys);
        buf.put_u8(entry.plugin);
    }
    buf.freeze()
}

/// Reply to a `PlayerInputRequest`: up to four consecutive frames.
#[must_use]
pub fn encode_key_info_server(slot: u8, entries: &[InputEntry]) -> Bytes {
    encode_entries(KEY_INFO_SERVER, slot, entries)
}

/// Unsolicited fanout of a freshly reported input so peers learn it without
/// polling.
#[must_use]
pub fn encode_gratuitous(slot: u8, entry: InputEntry) -> Bytes {
    encode_entries(KEY_INFO_SERVER_GRATUITOUS, slot, &[entry])
}

/// Decode a server-side input frame (`KeyInfoServer` or the gratuitous
/// variant). Exposed for client tooling and the end-to-end tests.
pub fn decode_key_info_server(frame: &[u8]) -> Result<(u8, InputEntries), FrameError> {
    if frame.len() < 3 {
        return Err(FrameError::Truncated {
            need: 3,
            have: frame.len(),
        });
    }
    let kind = frame[0];
    if kind != KEY_INFO_SERVER && kind != KEY_INFO_SERVER_GRATUITOUS {
        return Err(FrameError::UnknownType(kind));
    }
    let slot = frame[1];
    let n = frame[2] as usize;
    let mut body = &frame[3..];
    if body.len() != n * 9 {
        return Err(FrameError::BadLength {
            kind,
            len: frame.len(),
        });
    }
    let mut entries = InputEntries::new();
    for _ in 0..n {
        entries.push(InputEntry {
            count: body.get_u32(),
            keys: body.get_u32(),
            plugin: body.get_u8(),
        });
    }
    Ok((slot, entries))
}
