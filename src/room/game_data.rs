//! Per-room relay state: input buffers, lead/lag accounting, adaptive
//! buffer depth, liveness flags, and desync tracking.
//!
//! `GameData` is pure state guarded by one mutex in [`Room`](super::Room).
//! Critical sections never await; the UDP engine takes the lock, mutates,
//! collects the addresses it needs, releases, and only then touches the
//! socket.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::protocol::counter;
use crate::protocol::udp::{InputEntries, InputEntry};
use crate::protocol::{INPUT_DATA_MAX, MAX_PLAYERS};

/// Retained sync probes for desync detection.
const SYNC_WINDOW: usize = 50;

/// Upper clamp for the adaptive per-slot buffer depth.
const BUFFER_SIZE_CAP: u32 = 25;

/// How many served input requests between buffer status log lines.
const STATUS_LOG_EVERY: u32 = 500;

/// Desync detected somewhere in the room. Never cleared.
pub const STATUS_DESYNC: u8 = 1;

/// Outcome of serving a `PlayerInputRequest`.
#[derive(Debug)]
pub struct InputReply {
    pub entries: InputEntries,
    /// Set every `STATUS_LOG_EVERY` served requests so the engine can emit
    /// a periodic buffer status line without tracking its own counters.
    pub log_status: Option<BufferStatus>,
}

/// Snapshot for the periodic per-slot status log.
#[derive(Debug, Clone, Copy)]
pub struct BufferStatus {
    pub buffer_size: u32,
    pub buffer_health: u32,
    pub count_lag: u32,
}

#[derive(Debug)]
pub struct GameData {
    player_addresses: [Option<SocketAddr>; MAX_PLAYERS],
    inputs: [HashMap<u32, (u32, u8)>; MAX_PLAYERS],
    pending: [Option<(u32, u8)>; MAX_PLAYERS],
    latest_seen: [Option<u32>; MAX_PLAYERS],
    count_lag: [u32; MAX_PLAYERS],
    lead_count: u32,
    buffer_size: [u32; MAX_PLAYERS],
    buffer_health: [u32; MAX_PLAYERS],
    player_alive: [bool; MAX_PLAYERS],
    status: u8,
    sync_values: HashMap<u32, (u8, Bytes)>,
    requests_served: [u32; MAX_PLAYERS],
}

impl GameData {
    #[must_use]
    pub fn new(base_buffer: u32) -> Self {
        Self {
            player_addresses: [None; MAX_PLAYERS],
            inputs: Default::default(),
            pending: [None; MAX_PLAYERS],
            latest_seen: [None; MAX_PLAYERS],
            count_lag: [0; MAX_PLAYERS],
            lead_count: 0,
            buffer_size: [0; MAX_PLAYERS],
            buffer_health: [base_buffer; MAX_PLAYERS],
            player_alive: [false; MAX_PLAYERS],
            status: 0,
            sync_values: HashMap::new(),
            requests_served: [0; MAX_PLAYERS],
        }
    }

    /// Marks the slot live and remembers its return address. Applied to
    /// every inbound datagram that names the slot.
    pub fn touch(&mut self, slot: usize, addr: SocketAddr) {
        self.player_alive[slot] = true;
        self.player_addresses[slot] = Some(addr);
    }

    /// Stores a reported input frame, advances the lead, and refreshes every
    /// slot's lag.
    pub fn record_input(&mut self, slot: usize, count: u32, keys: u32, plugin: u8) {
        self.inputs[slot].insert(count, (keys, plugin));
        self.pending[slot] = Some((keys, plugin));

        if self.inputs[slot].len() > INPUT_DATA_MAX {
            self.evict_oldest(slot);
        }

        match self.latest_seen[slot] {
            Some(latest) if !counter::newer(count, latest) => {}
            _ => self.latest_seen[slot] = Some(count),
        }
        if counter::newer(count, self.lead_count) {
            self.lead_count = count;
        }
        for i in 0..MAX_PLAYERS {
            if let Some(latest) = self.latest_seen[i] {
                self.count_lag[i] = counter::lag_behind(self.lead_count, latest);
            }
        }
    }

    fn evict_oldest(&mut self, slot: usize) {
        let oldest = self.inputs[slot]
            .keys()
            .copied()
            .reduce(|a, b| if counter::older(b, a) { b } else { a });
        if let Some(key) = oldest {
            self.inputs[slot].remove(&key);
        }
    }

    /// Serves a `PlayerInputRequest`: up to four consecutive frames starting
    /// at `start`. Missing frames are synthesised from the pending input
    /// unless the requester is a spectator, who only ever receives frames
    /// that actually exist.
    pub fn input_reply(&mut self, slot: usize, start: u32, spectator: bool) -> InputReply {
        let mut entries = InputEntries::new();
        let mut count = start;
        for _ in 0..4 {
            if let Some(&(keys, plugin)) = self.inputs[slot].get(&count) {
                entries.push(InputEntry { count, keys, plugin });
            } else if spectator {
                break;
            } else {
                let (keys, plugin) = self.pending[slot].unwrap_or((0, 0));
                entries.push(InputEntry { count, keys, plugin });
            }
            count = count.wrapping_add(1);
        }

        let mut log_status = None;
        if !entries.is_empty() {
            self.adapt_buffer(slot, start);
            self.requests_served[slot] = self.requests_served[slot].wrapping_add(1);
            if self.requests_served[slot] % STATUS_LOG_EVERY == 0 {
                log_status = Some(BufferStatus {
                    buffer_size: self.buffer_size[slot],
                    buffer_health: self.buffer_health[slot],
                    count_lag: self.count_lag[slot],
                });
            }
        }

        InputReply {
            entries,
            log_status,
        }
    }

    /// A request near the lead means the client is running hot and the
    /// buffer can shrink; a request trailing by more than the health window
    /// means it is starving and the buffer grows, up to a small cap.
    fn adapt_buffer(&mut self, slot: usize, requested: u32) {
        let lag = counter::lag_behind(self.lead_count, requested);
        if lag <= self.buffer_health[slot] {
            self.buffer_size[slot] = self.buffer_size[slot].saturating_sub(1);
        } else if self.buffer_size[slot] < BUFFER_SIZE_CAP {
            self.buffer_size[slot] += 1;
        }
    }

    /// `BufferChange` from the control channel: reset every slot to the new
    /// base depth.
    pub fn set_base_buffer(&mut self, base: u32) {
        self.buffer_size = [0; MAX_PLAYERS];
        self.buffer_health = [base; MAX_PLAYERS];
    }

    /// Records a sync probe. Returns the conflicting slot pair when the
    /// probe disagrees with an earlier one for the same counter.
    pub fn record_sync(&mut self, slot: u8, count: u32, sync: Bytes) -> Option<(u8, u8)> {
        if let Some((prev_slot, prev_sync)) = self.sync_values.get(&count) {
            if *prev_sync != sync {
                self.status |= STATUS_DESYNC;
                return Some((*prev_slot, slot));
            }
            return None;
        }

        self.sync_values.insert(count, (slot, sync));
        if self.sync_values.len() > SYNC_WINDOW {
            let oldest = self
                .sync_values
                .keys()
                .copied()
                .reduce(|a, b| if counter::older(b, a) { b } else { a });
            if let Some(key) = oldest {
                self.sync_values.remove(&key);
            }
        }
        None
    }

    /// `ManagePlayers` sweep: slots in `registered` that went silent since
    /// the previous sweep are marked disconnected. All liveness flags are
    /// cleared for the next interval. Returns the newly dead slots and
    /// whether anyone in the room is still alive.
    pub fn sweep(&mut self, registered: &[u8]) -> SweepOutcome {
        let mut dead = Vec::new();
        for &slot in registered {
            let i = slot as usize;
            if !self.player_alive[i] {
                self.status |= 1 << (slot + 1);
                dead.push(slot);
            }
        }
        let any_alive = self.player_alive.iter().any(|&alive| alive);
        self.player_alive = [false; MAX_PLAYERS];
        SweepOutcome { dead, any_alive }
    }

    /// Return addresses of every live slot other than `from` that the relay
    /// should fan a gratuitous input out to.
    #[must_use]
    pub fn fanout_targets(&self, from: usize) -> Vec<SocketAddr> {
        (0..MAX_PLAYERS)
            .filter(|&i| i != from && self.player_alive[i])
            .filter_map(|i| self.player_addresses[i])
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[must_use]
    pub fn lead_count(&self) -> u32 {
        self.lead_count
    }

    #[must_use]
    pub fn count_lag(&self, slot: usize) -> u32 {
        self.count_lag[slot]
    }

    #[must_use]
    pub fn stored_inputs(&self, slot: usize) -> usize {
        self.inputs[slot].len()
    }
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub dead: Vec<u8>,
    pub any_alive: bool,
}
