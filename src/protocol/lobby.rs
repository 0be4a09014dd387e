//! JSON message types for the WebSocket lobby channel.
//!
//! Every lobby frame is a single flat JSON object whose `type` field selects
//! the variant, so both enums are internally tagged. Request fields default
//! when absent and unknown fields are ignored, which keeps the server
//! tolerant of older and newer client builds. Replies always carry `type`
//! and an integer `accept` code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Accept;

/// Client-to-server lobby frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyRequest {
    /// Server build string lookup; the only request allowed before auth.
    #[serde(rename = "request_version")]
    Version {},

    /// Message-of-the-day lookup.
    #[serde(rename = "request_motd")]
    Motd {},

    /// Room listing; performs auth when enabled.
    #[serde(rename = "request_get_rooms")]
    GetRooms {
        #[serde(default)]
        emulator: String,
        #[serde(default)]
        netplay_version: String,
        #[serde(default, rename = "authTime")]
        auth_time: String,
        #[serde(default)]
        auth: String,
    },

    /// Room creation; performs auth when enabled.
    #[serde(rename = "request_create_room")]
    CreateRoom {
        #[serde(default)]
        room_name: String,
        #[serde(default)]
        game_name: String,
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        password: String,
        #[serde(default, rename = "MD5")]
        md5: String,
        #[serde(default)]
        client_sha: String,
        #[serde(default)]
        emulator: String,
        #[serde(default)]
        netplay_version: String,
        #[serde(default)]
        features: HashMap<String, String>,
        #[serde(default, rename = "authTime")]
        auth_time: String,
        #[serde(default)]
        auth: String,
    },

    /// Join an existing room, resolved by its relay port.
    #[serde(rename = "request_join_room")]
    JoinRoom {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        password: String,
        #[serde(default, rename = "MD5")]
        md5: String,
        #[serde(default)]
        client_sha: String,
    },

    /// Ask for the seat roster of a room.
    #[serde(rename = "request_players")]
    Players {
        #[serde(default)]
        port: u16,
    },

    /// Chat fanout to every seat in the room.
    #[serde(rename = "request_chat_message")]
    ChatMessage {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        message: String,
    },

    /// Creator signals game start.
    #[serde(rename = "request_begin_game")]
    BeginGame {
        #[serde(default)]
        port: u16,
    },
}

impl LobbyRequest {
    /// Reply of the matching type carrying only an accept code, with every
    /// other field left empty. Used for rejections (bad auth, bad input)
    /// where no room state was touched.
    #[must_use]
    pub fn failure_reply(&self, accept: Accept) -> LobbyReply {
        match self {
            Self::Version {} => LobbyReply::Version {
                accept,
                message: String::new(),
            },
            Self::Motd {} => LobbyReply::Motd {
                accept,
                message: String::new(),
            },
            Self::GetRooms { .. } => LobbyReply::GetRooms {
                accept,
                room_name: String::new(),
                game_name: String::new(),
                md5: String::new(),
                emulator: String::new(),
                protected: false,
                port: 0,
                features: HashMap::new(),
            },
            Self::CreateRoom { .. } => LobbyReply::CreateRoom {
                accept,
                room_name: String::new(),
                game_name: String::new(),
                player_name: String::new(),
                port: 0,
                features: HashMap::new(),
            },
            Self::JoinRoom { .. } => LobbyReply::JoinRoom {
                accept,
                room_name: String::new(),
                game_name: String::new(),
                port: 0,
                features: HashMap::new(),
            },
            Self::Players { .. } => LobbyReply::Players {
                accept,
                player_names: Vec::new(),
            },
            Self::ChatMessage { .. } => LobbyReply::ChatMessage {
                accept,
                message: String::new(),
            },
            Self::BeginGame { .. } => LobbyReply::BeginGame { accept, port: 0 },
        }
    }
}

/// Server-to-client lobby frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyReply {
    #[serde(rename = "reply_version")]
    Version { accept: Accept, message: String },

    #[serde(rename = "reply_motd")]
    Motd { accept: Accept, message: String },

    /// One frame per listed room; the terminator frame has an empty
    /// `room_name`.
    #[serde(rename = "reply_get_rooms")]
    GetRooms {
        accept: Accept,
        room_name: String,
        game_name: String,
        #[serde(rename = "MD5")]
        md5: String,
        emulator: String,
        protected: bool,
        port: u16,
        features: HashMap<String, String>,
    },

    #[serde(rename = "reply_create_room")]
    CreateRoom {
        accept: Accept,
        room_name: String,
        game_name: String,
        player_name: String,
        port: u16,
        features: HashMap<String, String>,
    },

    #[serde(rename = "reply_join_room")]
    JoinRoom {
        accept: Accept,
        room_name: String,
        game_name: String,
        port: u16,
        features: HashMap<String, String>,
    },

    /// Roster fanout: index = seat number, empty string = unfilled seat.
    #[serde(rename = "reply_players")]
    Players {
        accept: Accept,
        player_names: Vec<String>,
    },

    #[serde(rename = "reply_chat_message")]
    ChatMessage { accept: Accept, message: String },

    #[serde(rename = "reply_begin_game")]
    BeginGame { accept: Accept, port: u16 },
}
