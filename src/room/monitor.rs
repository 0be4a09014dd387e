//! Per-room supervision: the player liveness sweep and the inactivity
//! monitor. Both start at `begin_game` and exit when the room closes.

use std::sync::Arc;
use std::time::Duration;

use crate::server::GameServer;

use super::{Room, DISCONNECT_TIMEOUT};

/// Room-level bound on UDP silence after game start.
const PACKET_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the inactivity monitor samples the room clocks.
const MONITOR_TICK: Duration = Duration::from_secs(1);

pub fn spawn(server: Arc<GameServer>, room: Arc<Room>) {
    tokio::spawn(manage_players(server.clone(), room.clone()));
    tokio::spawn(monitor_activity(server, room));
}

/// Every `DISCONNECT_TIMEOUT`: apply pending disconnect notices, mark slots
/// that stayed silent for the whole interval as dead, and close the room
/// once nobody is left alive. Closed rooms are not restarted.
async fn manage_players(server: Arc<GameServer>, room: Arc<Room>) {
    let cancel = room.cancelled();
    let mut interval = tokio::time::interval(DISCONNECT_TIMEOUT);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the first sweep happens one full
    // interval after game start.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let (notices, registered) = {
            let mut registrations = room.registrations.lock().unwrap_or_else(|e| e.into_inner());
            (registrations.take_marked(), registrations.registered_slots())
        };
        for slot in notices {
            tracing::info!(room = %room.name, slot, "registration removed by disconnect notice");
        }

        let outcome = room
            .game_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sweep(&registered);

        if !outcome.dead.is_empty() {
            let mut registrations = room.registrations.lock().unwrap_or_else(|e| e.into_inner());
            for &slot in &outcome.dead {
                registrations.remove(slot);
                tracing::warn!(room = %room.name, slot, "slot went silent, marked disconnected");
            }
        }

        if !outcome.any_alive {
            tracing::info!(room = %room.name, "no live players, closing room");
            server.close_room(&room);
            break;
        }
    }
}

/// Closes the room when its activity clock or its UDP packet clock goes
/// stale.
async fn monitor_activity(server: Arc<GameServer>, room: Arc<Room>) {
    let cancel = room.cancelled();
    let mut interval = tokio::time::interval(MONITOR_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if room.activity_age() > DISCONNECT_TIMEOUT || room.packet_age() > PACKET_TIMEOUT {
            tracing::info!(
                room = %room.name,
                activity_age_s = room.activity_age().as_secs(),
                packet_age_s = room.packet_age().as_secs(),
                "room inactive, closing"
            );
            server.close_room(&room);
            break;
        }
    }
}
