//! Connection manager for the persistent transport.
//!
//! `ConnectionManager` owns the lifecycle of at most one MQTT session:
//!
//! 1. `connect()` checks the retry budget, probes the broker over TCP, builds a
//!    client, spawns a [`ConnectionKernel`] and waits a bounded settle window
//!    for the acknowledgement.
//! 2. `publish()` queues a QoS 1 message while the state is `Connected`.
//! 3. `disconnect()` tears the session down and always ends in `Disconnected`.
//!
//! Connects and teardowns are serialized by an async mutex, so at most one
//! attempt is ever in flight. The state cell is shared with the kernel, which
//! updates it out-of-band as acknowledgements and disconnects arrive.
//!
//! # Typical Usage
//!
//! ```ignore
//! let manager = ConnectionManager::new(config, "envstation_station_1a2b3c4d_1700000000");
//! if manager.connect().await {
//!     manager.publish("iot/environment/station_1a2b3c4d", payload).await?;
//! }
//! manager.disconnect().await;
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, QoS};
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    budget::RetryBudget,
    client::ClientBuilder,
    config::Config,
    connection::ConnectionKernel,
    error::TransferError,
    probe::probe,
    state::{ConnectionState, StateCell},
};

/// How long teardown waits for a kernel to finish its DISCONNECT.
const KERNEL_SHUTDOWN: Duration = Duration::from_secs(1);

/// One live MQTT session: the client handle and its background kernel.
struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        if timeout(KERNEL_SHUTDOWN, &mut self.task).await.is_err() {
            debug!("Connection kernel did not stop in time, aborting");
            self.task.abort();
        }
    }
}

pub struct ConnectionManager {
    config: Config,
    fallback_client_id: String,
    budget: RetryBudget,
    state: Arc<StateCell>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Creates a manager in `Disconnected` with a full retry budget.
    ///
    /// `fallback_client_id` is presented to brokers that neither have a
    /// configured client id nor derive one from the credentials.
    pub fn new(config: Config, fallback_client_id: impl Into<String>) -> Self {
        let budget = RetryBudget::new(config.max_connect_attempts);
        Self {
            config,
            fallback_client_id: fallback_client_id.into(),
            budget,
            state: Arc::new(StateCell::new()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn attempts(&self) -> u32 {
        self.budget.attempts()
    }

    pub fn max_attempts(&self) -> u32 {
        self.budget.max_attempts()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.budget.is_exhausted()
    }

    /// Attempts to establish a session.
    ///
    /// A no-op returning false once the budget is exhausted. Otherwise one
    /// attempt is consumed up front, and the result is true only if the
    /// broker acknowledged the session inside the settle window. Any
    /// previous session is torn down first.
    pub async fn connect(&self) -> bool {
        let mut session = self.session.lock().await;

        let attempt = match self.budget.try_consume() {
            Ok(attempt) => attempt,
            Err(e) => {
                debug!("Skipping connect: {}", e);
                return false;
            }
        };

        if let Some(previous) = session.take() {
            previous.shutdown().await;
        }

        let generation = self.state.next_generation();
        self.state.set(ConnectionState::Connecting);
        info!(
            "Connecting to MQTT broker {} (attempt {}/{})",
            self.config.address(),
            attempt,
            self.budget.max_attempts()
        );

        match self.establish(generation).await {
            Ok(established) => {
                info!("Connected to MQTT broker {}", self.config.address());
                *session = Some(established);
                true
            }
            Err(e) => {
                warn!(
                    "MQTT connect attempt {}/{} failed: {}",
                    attempt,
                    self.budget.max_attempts(),
                    e
                );
                self.state.next_generation();
                self.state.set(ConnectionState::Failed(e.to_string()));
                if self.budget.is_exhausted() {
                    warn!(
                        "MQTT retry budget exhausted after {} attempts, persistent transport abandoned",
                        self.budget.attempts()
                    );
                }
                false
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<Session, TransferError> {
        probe(&self.config.host, self.config.port, self.config.probe_timeout()).await?;

        let (client, event_loop) =
            ClientBuilder::from_config(&self.config, &self.fallback_client_id)?.build()?;

        let mut state_rx = self.state.subscribe();
        let cancel = CancellationToken::new();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            self.state.clone(),
            generation,
            cancel.clone(),
        );
        let session = Session {
            client,
            cancel,
            task: tokio::spawn(kernel.run()),
        };

        let wait = self.config.connect_wait();
        let settled = timeout(wait, state_rx.wait_for(|s| !s.is_connecting()))
            .await
            .map(|res| res.map(|state| (*state).clone()));

        let outcome = match settled {
            Ok(Ok(ConnectionState::Connected)) => return Ok(session),
            Ok(Ok(ConnectionState::Failed(reason))) => TransferError::HandshakeFailed(reason),
            Ok(Ok(other)) => TransferError::HandshakeFailed(other.to_string()),
            Ok(Err(_)) => TransferError::HandshakeFailed("state channel closed".into()),
            Err(_) => TransferError::ConnectTimeout(wait),
        };
        session.shutdown().await;
        Err(outcome)
    }

    /// Tears the session down. Idempotent; always ends in `Disconnected`.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(current) = session.take() {
            debug!("Closing MQTT session");
            current.shutdown().await;
        }
        self.state.next_generation();
        self.state.set(ConnectionState::Disconnected);
    }

    /// Queues a QoS 1 publish on the live session.
    ///
    /// Success means the message was handed to the client. On any send error
    /// the state becomes `Disconnected` so the caller renegotiates.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransferError> {
        let session = self.session.lock().await;

        let state = self.state.get();
        let client = match (state.is_connected(), session.as_ref()) {
            (true, Some(current)) => &current.client,
            _ => return Err(TransferError::NotConnected(state.to_string())),
        };

        match client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => {
                debug!("Queued publish on topic {}", topic);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                Err(TransferError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tracing_test::traced_test;

    fn local_config(port: u16) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port,
            connect_wait: 1,
            probe_timeout: 1,
            max_connect_attempts: 3,
            credentials: Some(Credentials::new("user", "pass")),
            ..Default::default()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    /// Minimal broker: answers every CONNECT with the given CONNACK return code.
    async fn fake_broker(return_code: u8) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    // The reachability probe connects and closes without sending.
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    if socket
                        .write_all(&[0x20, 0x02, 0x00, return_code])
                        .await
                        .is_err()
                    {
                        return;
                    }
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    #[traced_test]
    async fn test_budget_exhausts_after_max_failures() {
        let manager = ConnectionManager::new(local_config(closed_port().await), "test");

        for attempt in 1..=3 {
            assert!(!manager.connect().await);
            assert_eq!(manager.attempts(), attempt);
            assert!(matches!(manager.state(), ConnectionState::Failed(_)));
        }
        assert!(manager.budget_exhausted());

        assert!(!manager.connect().await);
        assert!(!manager.connect().await);
        assert_eq!(manager.attempts(), 3);
        assert!(logs_contain("retry budget exhausted"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = ConnectionManager::new(local_config(closed_port().await), "test");

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let manager = ConnectionManager::new(local_config(closed_port().await), "test");

        let err = manager.publish("topic", "payload").await.unwrap_err();
        assert!(matches!(err, TransferError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_connect_publish_disconnect_against_broker() {
        let port = fake_broker(0x00).await;
        let manager = ConnectionManager::new(local_config(port), "test");

        assert!(manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.attempts(), 1);

        assert!(manager.publish("iot/environment/s1", "{}").await.is_ok());

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_error_marks_disconnected() {
        let port = fake_broker(0x00).await;
        let manager = ConnectionManager::new(
            Config {
                request_channel_capacity: Some(1),
                ..local_config(port)
            },
            "test",
        );
        assert!(manager.connect().await);

        // Stop the kernel so the event loop, and with it the request channel, is dropped.
        {
            let mut session = manager.session.lock().await;
            let current = session.as_mut().unwrap();
            current.task.abort();
            assert!((&mut current.task).await.unwrap_err().is_cancelled());
        }
        assert_eq!(manager.state(), ConnectionState::Connected);

        let err = manager.publish("iot/environment/s1", "{}").await.unwrap_err();
        assert!(matches!(err, TransferError::ClientTransfer(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refused_connack_marks_failed() {
        let port = fake_broker(0x04).await;
        let manager = ConnectionManager::new(local_config(port), "test");

        assert!(!manager.connect().await);
        assert!(matches!(manager.state(), ConnectionState::Failed(_)));
        assert!(logs_contain("bad username or password"));
    }
}
