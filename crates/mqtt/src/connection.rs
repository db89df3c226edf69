//! Background driver for one MQTT session.
//!
//! A `ConnectionKernel` owns the rumqttc event loop of a single session and
//! runs on its own tokio task. It translates protocol events into
//! [`ConnectionState`] transitions in the shared [`StateCell`], tagged with
//! the session generation it was spawned for.
//!
//! The kernel never reconnects on its own: when the event loop reports an
//! error or the broker closes the session, the kernel records the outcome and
//! exits. Reconnection is the manager's decision, bounded by the retry budget.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager (connect / publish / disconnect)
//!     ↓ spawns, cancels
//! ConnectionKernel (polls event loop, writes state)
//!     ↓
//! rumqttc AsyncClient & EventLoop
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::state::{ConnectionState, StateCell};

/// How long a cancelled kernel keeps polling to flush its DISCONNECT.
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    state: Arc<StateCell>,
    generation: u64,
    cancel: CancellationToken,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        state: Arc<StateCell>,
        generation: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            event_loop,
            state,
            generation,
            cancel,
        }
    }

    /// Drives the event loop until the session ends or is cancelled.
    pub async fn run(mut self) {
        debug!(generation = self.generation, "Connection kernel started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.disconnect().await;
                    debug!(generation = self.generation, "Connection kernel stopped");
                    return;
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            if !self.handle_event(event) {
                                return;
                            }
                        }
                        Err(e) => {
                            self.handle_error(&e);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Processes a single event. Returns false when the session is over.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(conn_ack) => {
                    if conn_ack.code == ConnectReturnCode::Success {
                        info!("Connection acknowledged by broker");
                        self.update_state(ConnectionState::Connected);
                    } else {
                        let reason = describe_return_code(&conn_ack.code);
                        warn!("Connection refused by broker: {}", reason);
                        self.update_state(ConnectionState::Failed(reason.to_string()));
                        return false;
                    }
                }
                Packet::PubAck(ack) => {
                    debug!("Publish acknowledged (packet id {})", ack.pkid);
                }
                Packet::Disconnect => {
                    warn!("Disconnected by broker");
                    self.update_state(ConnectionState::Disconnected);
                    return false;
                }
                Packet::PingResp | Packet::PingReq => {}
                other => {
                    trace!("Incoming packet: {:?}", other);
                }
            },
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
        true
    }

    fn handle_error(&mut self, err: &ConnectionError) {
        let reason = match err {
            ConnectionError::ConnectionRefused(code) => describe_return_code(code).to_string(),
            other => get_error_message(other),
        };

        // A session that never got its CONNACK failed; an established one just dropped.
        if self.state.get().is_connecting() {
            warn!("MQTT handshake failed: {}", reason);
            self.update_state(ConnectionState::Failed(reason));
        } else {
            warn!("MQTT connection lost: {}", reason);
            self.update_state(ConnectionState::Disconnected);
        }
    }

    fn update_state(&self, state: ConnectionState) {
        if !self.state.set_for(self.generation, state) {
            trace!(
                generation = self.generation,
                "Ignoring state update from a stale session"
            );
        }
    }

    /// Best-effort DISCONNECT: queue it and poll briefly so it reaches the wire.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Error queueing disconnect packet: {:?}", e);
            return;
        }
        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            debug!("Disconnect packet not flushed within {:?}", DISCONNECT_FLUSH);
        }
    }
}

/// Human-readable meaning of a CONNACK return code.
pub fn describe_return_code(code: &ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "connection accepted",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}

/// Extracts the innermost error message from an error chain.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_descriptions() {
        assert_eq!(
            describe_return_code(&ConnectReturnCode::BadUserNamePassword),
            "bad username or password"
        );
        assert_eq!(
            describe_return_code(&ConnectReturnCode::NotAuthorized),
            "not authorized"
        );
        assert_eq!(
            describe_return_code(&ConnectReturnCode::ServiceUnavailable),
            "server unavailable"
        );
    }

    #[test]
    fn test_error_message_uses_root_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = ConnectionError::Io(io);
        assert_eq!(get_error_message(&err), "peer reset");
    }

    #[tokio::test]
    async fn test_cancelled_kernel_leaves_state_alone() {
        let (client, event_loop) =
            AsyncClient::new(rumqttc::MqttOptions::new("kernel-test", "127.0.0.1", 1), 10);
        let state = Arc::new(StateCell::new());
        let generation = state.next_generation();
        state.set(ConnectionState::Connected);

        let cancel = CancellationToken::new();
        cancel.cancel();
        ConnectionKernel::new(client, event_loop, state.clone(), generation, cancel)
            .run()
            .await;

        assert_eq!(state.get(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_unreachable_broker_marks_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (client, event_loop) =
            AsyncClient::new(rumqttc::MqttOptions::new("kernel-test", "127.0.0.1", port), 10);
        let state = Arc::new(StateCell::new());
        let generation = state.next_generation();
        state.set(ConnectionState::Connecting);

        ConnectionKernel::new(client, event_loop, state.clone(), generation, CancellationToken::new())
            .run()
            .await;

        assert!(matches!(state.get(), ConnectionState::Failed(_)));
    }
}
