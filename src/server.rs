//! Server orchestration: the process-wide room registry, the port
//! allocator, disconnect handling, and the global maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::room::Room;
use crate::webhook::WebhookSink;

mod lobby;
#[cfg(test)]
mod lobby_tests;

/// Interval of the belt-and-braces registry purge.
const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Rooms idle longer than this are purged regardless of their own monitors.
const PURGE_IDLE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Interval of the periodic stats log line.
const STATS_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no free room port in {0}..={1}")]
    Exhausted(u16, u16),
}

/// Process-wide server state shared by every lobby connection and room task.
pub struct GameServer {
    config: ServerConfig,
    rooms: DashMap<String, Arc<Room>>,
    /// Serialises room creation so two concurrent `create_room` calls can
    /// never claim the same name or port.
    create_lock: Mutex<()>,
    webhook: WebhookSink,
}

impl GameServer {
    #[must_use]
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            rooms: DashMap::new(),
            create_lock: Mutex::new(()),
            webhook: WebhookSink::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn room_by_name(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn room_by_port(&self, port: u16) -> Option<Arc<Room>> {
        self.rooms
            .iter()
            .find(|entry| entry.value().port == port)
            .map(|entry| entry.value().clone())
    }

    /// Registry snapshot for listings and sweeps.
    #[must_use]
    pub fn rooms_snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Scans the room port range for the lowest port whose TCP and UDP
    /// sockets both bind. Caller must hold the creation lock.
    async fn allocate_listeners(&self) -> Result<(u16, TcpListener, UdpSocket), AllocError> {
        let first = self.config.base_port.saturating_add(1);
        let last = self.config.base_port.saturating_add(self.config.max_games);
        for port in first..=last {
            if self.rooms.iter().any(|entry| entry.value().port == port) {
                continue;
            }
            let Ok(tcp) = TcpListener::bind(("0.0.0.0", port)).await else {
                continue;
            };
            match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(udp) => return Ok((port, tcp, udp)),
                Err(_) => continue,
            }
        }
        Err(AllocError::Exhausted(first, last))
    }

    /// Closes a room and releases its name and port. Safe to call twice;
    /// only the exact `Arc` still in the registry is removed.
    pub fn close_room(&self, room: &Arc<Room>) {
        room.close();
        self.rooms
            .remove_if(&room.name, |_, current| Arc::ptr_eq(current, room));
    }

    /// Lobby disconnect: free the seat owned by the closing connection. A
    /// room left with zero seats before its game started is destroyed.
    pub async fn handle_disconnect(&self, conn_id: Uuid) {
        for room in self.rooms_snapshot() {
            if let Some((seat, remaining)) = room.remove_connection(conn_id).await {
                tracing::info!(
                    room = %room.name,
                    player = %seat.player_name,
                    seat = seat.number,
                    remaining,
                    "seat left on lobby disconnect"
                );
                if remaining == 0 && !room.is_running() {
                    self.close_room(&room);
                }
            }
        }
    }

    /// Belt-and-braces purge of rooms whose last activity is stale, run
    /// every five minutes for the process lifetime.
    pub async fn purge_task(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            for room in self.rooms_snapshot() {
                if room.is_closed() || room.activity_age() > PURGE_IDLE_AFTER {
                    tracing::info!(room = %room.name, "purging inactive room");
                    self.close_room(&room);
                }
            }
        }
    }

    /// Periodic one-line census of rooms and seats.
    pub async fn stats_task(self: Arc<Self>) {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let rooms = self.rooms_snapshot();
            let mut seats = 0usize;
            for room in &rooms {
                seats += room.seats.lock().await.len();
            }
            let running = rooms
                .iter()
                .filter(|room| room.started_at().is_some())
                .count();
            tracing::info!(rooms = rooms.len(), running, seats, "server stats");
        }
    }
}
