//! Fire-and-forget Discord webhook announcements.
//!
//! Room creation posts a short message to every URL configured through the
//! `<EMULATOR>_CHANNEL_0..9` environment variables; password-protected
//! rooms announce only to `<EMULATOR>_DEV_CHANNEL`. The HTTP calls run on a
//! detached task — room creation never waits for them.

use std::sync::Arc;

use serde_json::json;

use crate::room::Room;

pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Announce a freshly created room. Returns immediately; delivery
    /// failures are logged and otherwise ignored.
    pub fn announce_room(&self, room: &Arc<Room>) {
        let urls = channel_urls(&room.emulator, !room.password.is_empty());
        if urls.is_empty() {
            return;
        }

        let content = format!(
            "{} created room `{}` for {} (port {})",
            room.creator, room.name, room.game_name, room.port
        );
        let client = self.client.clone();
        tokio::spawn(async move {
            for url in urls {
                let result = client
                    .post(&url)
                    .json(&json!({ "content": content }))
                    .send()
                    .await;
                if let Err(err) = result {
                    tracing::warn!(error = %err, "webhook announcement failed");
                }
            }
        });
    }
}

impl Default for WebhookSink {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_urls(emulator: &str, protected: bool) -> Vec<String> {
    let prefix = emulator.to_uppercase();
    if protected {
        return std::env::var(format!("{prefix}_DEV_CHANNEL"))
            .into_iter()
            .collect();
    }
    (0..10)
        .filter_map(|i| std::env::var(format!("{prefix}_CHANNEL_{i}")).ok())
        .collect()
}
