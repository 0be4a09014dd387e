//! Room state: seats, registrations, relay data, and lifecycle.
//!
//! A room binds the three transports together. The lobby mutates the seat
//! list, the control channel fills the registration table and file store,
//! and the UDP engine works the [`GameData`] buffers. Each of those lives
//! behind its own lock, held only for short, await-free sections (the seat
//! list uses an async mutex because fanout snapshots are taken from async
//! context).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::tcp::Registration;
use crate::protocol::{LobbyReply, MAX_PLAYERS};

pub mod control;
pub mod game_data;
pub mod monitor;
pub mod relay;

pub use game_data::GameData;

/// Default per-slot buffer depth for a freshly created room, in frames.
pub const DEFAULT_BASE_BUFFER: u32 = 3;

/// A slot goes dead after this long without a packet; also the room-level
/// activity bound.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The lobby-side write handle of a connected client. Seat membership is
/// matched by `id` on disconnect, never by address equality.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: Uuid,
    pub tx: mpsc::Sender<LobbyReply>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<LobbyReply>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }
}

/// A lobby-connected player holding one of the four seats.
#[derive(Debug, Clone)]
pub struct Seat {
    pub number: u8,
    pub player_name: String,
    /// Host part of the remote address.
    pub ip: String,
    pub conn: ClientHandle,
}

/// Registration table for the four gameplay slots, plus the bookkeeping the
/// control channel needs: which slot bytes were already handed to a
/// connection, and which registrations a `DisconnectNotice` marked for the
/// next sweep.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    slots: [Option<Registration>; MAX_PLAYERS],
    handed_out: [bool; MAX_PLAYERS],
    marked: [bool; MAX_PLAYERS],
}

impl RegistrationTable {
    /// Slot byte for a freshly accepted control connection: the lowest slot
    /// neither registered nor already handed out.
    pub fn next_slot(&mut self) -> Option<u8> {
        let free = (0..MAX_PLAYERS).find(|&i| self.slots[i].is_none() && !self.handed_out[i])?;
        self.handed_out[free] = true;
        Some(free as u8)
    }

    /// Records a registration. The first registration for a seat wins;
    /// duplicates are ignored.
    pub fn register(&mut self, slot: u8, registration: Registration) {
        let i = slot as usize;
        if i < MAX_PLAYERS && self.slots[i].is_none() {
            self.slots[i] = Some(registration);
        }
    }

    pub fn mark_disconnect(&mut self, slot: u8) {
        if (slot as usize) < MAX_PLAYERS {
            self.marked[slot as usize] = true;
        }
    }

    /// Applies pending `DisconnectNotice` marks; called at the top of each
    /// sweep.
    pub fn take_marked(&mut self) -> Vec<u8> {
        let mut removed = Vec::new();
        for i in 0..MAX_PLAYERS {
            if self.marked[i] {
                self.marked[i] = false;
                if self.slots[i].take().is_some() {
                    self.handed_out[i] = false;
                    removed.push(i as u8);
                }
            }
        }
        removed
    }

    pub fn remove(&mut self, slot: u8) {
        let i = slot as usize;
        if i < MAX_PLAYERS {
            self.slots[i] = None;
            self.handed_out[i] = false;
        }
    }

    #[must_use]
    pub fn is_registered(&self, slot: u8) -> bool {
        (slot as usize) < MAX_PLAYERS && self.slots[slot as usize].is_some()
    }

    #[must_use]
    pub fn registered_slots(&self) -> Vec<u8> {
        (0..MAX_PLAYERS as u8)
            .filter(|&slot| self.slots[slot as usize].is_some())
            .collect()
    }

    #[must_use]
    pub fn table(&self) -> [Option<Registration>; MAX_PLAYERS] {
        self.slots
    }
}

/// One hosted multiplayer session with its own port, listeners, and state.
pub struct Room {
    pub name: String,
    pub game_name: String,
    pub md5: String,
    pub client_sha: String,
    pub emulator: String,
    pub password: String,
    pub features: HashMap<String, String>,
    pub creator: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,

    running: AtomicBool,
    start_time: StdMutex<Option<DateTime<Utc>>>,
    last_activity: StdMutex<Instant>,
    last_packet: StdMutex<Instant>,

    pub seats: Mutex<Vec<Seat>>,
    pub registrations: StdMutex<RegistrationTable>,
    pub game_data: StdMutex<GameData>,

    /// Per-room file store and uploaded settings blob, exchanged over TCP.
    pub files: StdMutex<HashMap<String, Vec<u8>>>,
    pub settings: StdMutex<Option<Vec<u8>>>,

    /// The bound listeners, parked here until their loops claim them.
    tcp_listener: StdMutex<Option<TcpListener>>,
    udp_socket: StdMutex<Option<std::sync::Arc<UdpSocket>>>,

    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Everything `create_room` validated before allocating the port.
pub struct RoomParams {
    pub name: String,
    pub game_name: String,
    pub md5: String,
    pub client_sha: String,
    pub emulator: String,
    pub password: String,
    pub features: HashMap<String, String>,
    pub creator: String,
}

impl Room {
    #[must_use]
    pub fn new(params: RoomParams, port: u16, tcp: TcpListener, udp: UdpSocket) -> Self {
        let now = Instant::now();
        Self {
            name: params.name,
            game_name: params.game_name,
            md5: params.md5,
            client_sha: params.client_sha,
            emulator: params.emulator,
            password: params.password,
            features: params.features,
            creator: params.creator,
            port,
            created_at: Utc::now(),
            running: AtomicBool::new(false),
            start_time: StdMutex::new(None),
            last_activity: StdMutex::new(now),
            last_packet: StdMutex::new(now),
            seats: Mutex::new(Vec::new()),
            registrations: StdMutex::new(RegistrationTable::default()),
            game_data: StdMutex::new(GameData::new(DEFAULT_BASE_BUFFER)),
            files: StdMutex::new(HashMap::new()),
            settings: StdMutex::new(None),
            tcp_listener: StdMutex::new(Some(tcp)),
            udp_socket: StdMutex::new(Some(std::sync::Arc::new(udp))),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the room into the running state. Returns false when it already
    /// ran, making `begin_game` idempotent.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.touch_activity();
        self.touch_packet();
        true
    }

    /// When `begin_game` flipped the room into the running state.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn touch_activity(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn touch_packet(&self) {
        *self.last_packet.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    #[must_use]
    pub fn activity_age(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    #[must_use]
    pub fn packet_age(&self) -> Duration {
        self.last_packet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Takes the TCP listener for the accept loop. Yields once.
    pub(crate) fn take_tcp_listener(&self) -> Option<TcpListener> {
        self.tcp_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    #[must_use]
    pub fn udp_socket(&self) -> Option<std::sync::Arc<UdpSocket>> {
        self.udp_socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent close: cancels every room task, which drops the listeners
    /// and lets pending reads fail. Safe to call on a half-initialized or
    /// already-closed room.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        // Drop a listener no loop ever claimed so the port frees promptly.
        self.tcp_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.udp_socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        tracing::info!(room = %self.name, port = self.port, "room closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends a reply to every seat. The sender list is snapshotted under the
    /// lock; the sends happen after it is released.
    pub async fn broadcast(&self, reply: &LobbyReply) {
        let senders: Vec<mpsc::Sender<LobbyReply>> = {
            let seats = self.seats.lock().await;
            seats.iter().map(|seat| seat.conn.tx.clone()).collect()
        };
        for tx in senders {
            let _ = tx.send(reply.clone()).await;
        }
    }

    /// Roster array: index = seat number, empty string = unfilled.
    pub async fn roster(&self) -> Vec<String> {
        let seats = self.seats.lock().await;
        let mut names = vec![String::new(); MAX_PLAYERS];
        for seat in seats.iter() {
            names[seat.number as usize] = seat.player_name.clone();
        }
        names
    }

    /// Drops the seat owned by the closing lobby connection. Returns the
    /// seat and how many remain.
    pub async fn remove_connection(&self, conn_id: Uuid) -> Option<(Seat, usize)> {
        let mut seats = self.seats.lock().await;
        let index = seats.iter().position(|seat| seat.conn.id == conn_id)?;
        let seat = seats.remove(index);
        Some((seat, seats.len()))
    }
}
