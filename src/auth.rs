//! Optional time-bounded shared-secret verification on lobby requests.
//!
//! When `--enable-auth` is set, `create_room` and `get_rooms` must carry an
//! `authTime` (decimal Unix milliseconds, within 15 minutes of server UTC)
//! and `auth`, the lowercase hex SHA-256 of `authTime || secret`. The secret
//! is read from the `<EMULATOR>_AUTH` environment variable, upper-cased
//! emulator tag.

use std::fmt::Write as _;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Clock skew tolerated on `authTime`, in milliseconds.
const MAX_TIME_SKEW_MS: i64 = 15 * 60 * 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authTime is not a decimal millisecond timestamp")]
    BadTimestamp,
    #[error("authTime outside the accepted window ({skew_ms} ms skew)")]
    StaleTimestamp { skew_ms: i64 },
    #[error("no shared secret configured for emulator `{0}`")]
    MissingSecret(String),
    #[error("digest mismatch")]
    DigestMismatch,
}

/// Verifies an auth-bearing lobby request. Always succeeds when auth is
/// disabled.
pub fn verify(enabled: bool, emulator: &str, auth_time: &str, auth: &str) -> Result<(), AuthError> {
    if !enabled {
        return Ok(());
    }

    let stamp: i64 = auth_time
        .trim()
        .parse()
        .map_err(|_| AuthError::BadTimestamp)?;
    let skew_ms = (Utc::now().timestamp_millis() - stamp).abs();
    if skew_ms > MAX_TIME_SKEW_MS {
        return Err(AuthError::StaleTimestamp { skew_ms });
    }

    let var = format!("{}_AUTH", emulator.to_uppercase());
    let secret =
        std::env::var(&var).map_err(|_| AuthError::MissingSecret(emulator.to_string()))?;

    if digest(auth_time.trim(), &secret) == auth.to_lowercase() {
        Ok(())
    } else {
        Err(AuthError::DigestMismatch)
    }
}

fn digest(auth_time: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(auth_time.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
