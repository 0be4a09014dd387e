//! Record formats for the per-room TCP control channel.
//!
//! After accept the server sends a single slot byte, then the client streams
//! request records: a 1-byte opcode followed by opcode-specific payload. All
//! integers are big-endian and every blob is prefixed by a 32-bit length.
//! The async reads live in the control engine; this module holds the opcode
//! table and the reply encoders so they can be tested without a socket.

use bytes::{BufMut, Bytes, BytesMut};

use super::{FrameError, MAX_PLAYERS};

/// Request opcodes on the control channel. Unknown opcodes close the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOpcode {
    SendRegistration,
    RequestRegistration,
    UploadSettings,
    RequestSettings,
    UploadFile,
    RequestFile,
    BufferChange,
    DisconnectNotice,
}

impl TryFrom<u8> for ControlOpcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SendRegistration),
            1 => Ok(Self::RequestRegistration),
            2 => Ok(Self::UploadSettings),
            3 => Ok(Self::RequestSettings),
            4 => Ok(Self::UploadFile),
            5 => Ok(Self::RequestFile),
            6 => Ok(Self::BufferChange),
            7 => Ok(Self::DisconnectNotice),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

impl From<ControlOpcode> for u8 {
    fn from(opcode: ControlOpcode) -> Self {
        match opcode {
            ControlOpcode::SendRegistration => 0,
            ControlOpcode::RequestRegistration => 1,
            ControlOpcode::UploadSettings => 2,
            ControlOpcode::RequestSettings => 3,
            ControlOpcode::UploadFile => 4,
            ControlOpcode::RequestFile => 5,
            ControlOpcode::BufferChange => 6,
            ControlOpcode::DisconnectNotice => 7,
        }
    }
}

/// A gameplay slot's registration: client-chosen 32-bit ID plus the plugin
/// and raw-input bytes announced over TCP before the game starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub reg_id: u32,
    pub plugin: u8,
    pub raw: u8,
}

/// Reply to `RequestRegistration`: four fixed-width records, zeroed for
/// unfilled slots.
#[must_use]
pub fn encode_registration_table(table: &[Option<Registration>; MAX_PLAYERS]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAX_PLAYERS * 6);
    for slot in table {
        match slot {
            Some(reg) => {
                buf.put_u32(reg.reg_id);
                buf.put_u8(reg.plugin);
                buf.put_u8(reg.raw);
            }
            None => {
                buf.put_u32(0);
                buf.put_u8(0);
                buf.put_u8(0);
            }
        }
    }
    buf.freeze()
}

/// Length-prefixed blob reply, used by `RequestSettings` and `RequestFile`.
/// An absent payload encodes as a zero length.
#[must_use]
pub fn encode_blob(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}
