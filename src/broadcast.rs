//! LAN discovery responder.
//!
//! Listens for broadcast probes on the lobby port (UDP). A datagram whose
//! first byte is `0x01` is answered with a one-entry JSON object mapping
//! the server name to its lobby WebSocket URL. The advertised IP is the
//! local address the kernel picks when dialling the prober back.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Probe byte a discovering client sends.
const DISCOVERY_PROBE: u8 = 0x01;

/// Runs the responder until the socket fails. Spawned from `main` unless
/// broadcast is disabled.
pub async fn run(server_name: String, base_port: u16) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", base_port)).await?;
    tracing::info!(port = base_port, "LAN discovery responder listening");

    let mut buf = [0u8; 64];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        if len == 0 || buf[0] != DISCOVERY_PROBE {
            continue;
        }
        let Some(local_ip) = local_ip_toward(addr).await else {
            continue;
        };

        let mut reply = serde_json::Map::new();
        reply.insert(
            server_name.clone(),
            serde_json::Value::String(format!("ws://{local_ip}:{base_port}")),
        );
        let payload = serde_json::Value::Object(reply).to_string();
        if let Err(err) = socket.send_to(payload.as_bytes(), addr).await {
            tracing::debug!(%addr, error = %err, "discovery reply failed");
        }
    }
}

/// The local address the kernel routes toward `peer`.
async fn local_ip_toward(peer: SocketAddr) -> Option<std::net::IpAddr> {
    let probe = UdpSocket::bind(("0.0.0.0", 0)).await.ok()?;
    probe.connect(peer).await.ok()?;
    probe.local_addr().ok().map(|addr| addr.ip())
}
