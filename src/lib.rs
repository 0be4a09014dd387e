#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! # MPN Relay Server
//!
//! An in-memory netplay lobby and realtime input-relay server for emulator
//! multiplayer. Clients discover and join rooms over a WebSocket lobby,
//! exchange settings and save states over a per-room TCP control channel,
//! and relay per-frame controller inputs over a per-room UDP channel.
//!
//! No database, no external services. Run the binary and connect.

/// Time-bounded shared-secret verification on lobby requests
pub mod auth;

/// LAN discovery responder
pub mod broadcast;

/// Server configuration
pub mod config;

/// Structured logging configuration
pub mod logging;

/// Wire protocol definitions for the three transports
pub mod protocol;

/// Room state and the per-room engines
pub mod room;

/// Server orchestration and the lobby state machine
pub mod server;

/// Fire-and-forget Discord announcements
pub mod webhook;

/// WebSocket connection handling
pub mod websocket;
