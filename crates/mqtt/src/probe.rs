//! TCP reachability probe.
//!
//! Opens (and immediately drops) a plain TCP connection to the broker before
//! the MQTT handshake is attempted, so an unreachable broker fails fast and
//! without a half-open client session.

use std::time::Duration;

use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

use super::error::TransferError;

/// Checks that `host:port` accepts TCP connections within `limit`.
pub async fn probe(host: &str, port: u16, limit: Duration) -> Result<(), TransferError> {
    let addr = format!("{host}:{port}");
    debug!("Probing broker reachability at {}", addr);

    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            debug!("Broker {} is reachable", addr);
            Ok(())
        }
        Ok(Err(e)) => Err(TransferError::ProbeUnreachable {
            addr,
            reason: e.to_string(),
        }),
        Err(_) => Err(TransferError::ProbeUnreachable {
            addr,
            reason: format!("timed out after {:?}", limit),
        }),
    }
}
