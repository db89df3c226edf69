//! Per-reading transport selection with fallback.
//!
//! The controller prefers the persistent MQTT path while its link reports
//! `Connected` and falls back to the HTTP update call otherwise. Each reading
//! is attempted at most once per transport and never sent twice after a
//! success:
//!
//! ```text
//! persistent configured & Connected ──► MQTT publish ──ok──► Persistent
//!          │                                 │
//!          │ not connected                   └─err─► disconnect, one connect(),
//!          ▼                                         then fall through
//!    HTTP update ──ok──► Request
//!          └─────err───► Failed (logged, never fatal)
//! ```

use std::sync::Arc;

use envstation_mqtt::{ConnectionManager, ConnectionState};
use tracing::{debug, error, info, warn};

use super::{reading::Reading, transport::Transport};

/// Lifecycle handle of a persistent connection, as seen by the controller.
#[async_trait::async_trait]
pub trait PersistentLink: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn budget_exhausted(&self) -> bool;

    /// One budgeted connection attempt; true when `Connected`.
    async fn connect(&self) -> bool;

    /// Idempotent teardown ending in `Disconnected`.
    async fn disconnect(&self);
}

#[async_trait::async_trait]
impl PersistentLink for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn budget_exhausted(&self) -> bool {
        ConnectionManager::budget_exhausted(self)
    }

    async fn connect(&self) -> bool {
        ConnectionManager::connect(self).await
    }

    async fn disconnect(&self) {
        ConnectionManager::disconnect(self).await
    }
}

/// Forced transport selection from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    /// MQTT while connected, HTTP otherwise.
    #[default]
    Auto,
    /// MQTT only; readings are dropped while disconnected.
    MqttOnly,
    /// HTTP only; no broker connection is ever attempted.
    RestOnly,
}

/// Outcome of one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Persistent,
    Request,
    Failed,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Delivery::Failed)
    }
}

struct PersistentPath {
    link: Arc<dyn PersistentLink>,
    transport: Arc<dyn Transport>,
}

pub struct FailoverController {
    fallback: Arc<dyn Transport>,
    persistent: Option<PersistentPath>,
    mode: TransportMode,
}

impl FailoverController {
    /// Controller with only the request/response transport.
    pub fn new(fallback: Arc<dyn Transport>) -> Self {
        Self {
            fallback,
            persistent: None,
            mode: TransportMode::Auto,
        }
    }

    /// Adds the persistent path; ignored in `RestOnly` mode.
    pub fn with_persistent(
        mut self,
        link: Arc<dyn PersistentLink>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.persistent = Some(PersistentPath { link, transport });
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// True when readings may go over the persistent path.
    pub fn has_persistent(&self) -> bool {
        self.active_persistent().is_some()
    }

    fn active_persistent(&self) -> Option<&PersistentPath> {
        match self.mode {
            TransportMode::RestOnly => None,
            _ => self.persistent.as_ref(),
        }
    }

    /// Opportunistic reconnect before a publish.
    ///
    /// Attempts one connect when the link is neither connected nor
    /// connecting and the budget still allows it. Returns whether the
    /// persistent path is usable afterwards.
    pub async fn maintain(&self) -> bool {
        let Some(path) = self.active_persistent() else {
            return false;
        };
        let state = path.link.state();
        if state.is_connected() {
            return true;
        }
        if state.is_connecting() || path.link.budget_exhausted() {
            return false;
        }
        debug!("Persistent transport is {}, reconnecting", state);
        path.link.connect().await
    }

    /// Delivers `reading` over the best available transport.
    pub async fn publish_with_failover(&self, reading: &Reading) -> Delivery {
        if let Some(path) = self.active_persistent() {
            let state = path.link.state();
            if state.is_connected() {
                match path.transport.publish(reading).await {
                    Ok(()) => return Delivery::Persistent,
                    Err(e) => {
                        warn!(
                            transport = %path.transport.kind(),
                            station = %reading.station_id,
                            state = %path.link.state(),
                            "Publish failed: {}", e
                        );
                        path.link.disconnect().await;
                        if path.link.connect().await {
                            info!("Persistent transport renegotiated, next reading will use it");
                        } else {
                            warn!(
                                state = %path.link.state(),
                                "Persistent transport renegotiation failed"
                            );
                        }
                    }
                }
            } else {
                debug!(
                    state = %state,
                    "Persistent transport not connected, using {}",
                    self.fallback.kind()
                );
            }
        }

        if self.mode == TransportMode::MqttOnly {
            warn!(
                station = %reading.station_id,
                "Reading dropped: persistent transport unavailable in mqtt-only mode"
            );
            return Delivery::Failed;
        }

        match self.fallback.publish(reading).await {
            Ok(()) => Delivery::Request,
            Err(e) => {
                error!(
                    transport = %self.fallback.kind(),
                    station = %reading.station_id,
                    timestamp = %reading.timestamp,
                    "Reading could not be delivered: {}", e
                );
                Delivery::Failed
            }
        }
    }

    /// Tears down the persistent link, if any.
    pub async fn shutdown(&self) {
        if let Some(path) = &self.persistent {
            path.link.disconnect().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod mocks {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;
    use crate::core::transport::{PublishError, TransportKind};

    /// Transport that replays scripted results; succeeds once the script runs out.
    pub struct MockTransport {
        kind: TransportKind,
        results: Mutex<VecDeque<bool>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new(kind: TransportKind, results: &[bool]) -> Self {
            Self {
                kind,
                results: Mutex::new(results.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
            self.calls.lock().unwrap().push(reading.station_id.clone());
            match self.results.lock().unwrap().pop_front().unwrap_or(true) {
                true => Ok(()),
                false => Err(PublishError::Rejected(0)),
            }
        }
    }

    /// Link with a scripted connect outcome and its own small budget.
    pub struct MockLink {
        state: Mutex<ConnectionState>,
        connect_succeeds: bool,
        max_attempts: u32,
        pub connects: Mutex<u32>,
        pub disconnects: Mutex<u32>,
    }

    impl MockLink {
        pub fn new(initial: ConnectionState, connect_succeeds: bool, max_attempts: u32) -> Self {
            Self {
                state: Mutex::new(initial),
                connect_succeeds,
                max_attempts,
                connects: Mutex::new(0),
                disconnects: Mutex::new(0),
            }
        }

        pub fn connect_count(&self) -> u32 {
            *self.connects.lock().unwrap()
        }

        pub fn disconnect_count(&self) -> u32 {
            *self.disconnects.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl PersistentLink for MockLink {
        fn state(&self) -> ConnectionState {
            self.state.lock().unwrap().clone()
        }

        fn budget_exhausted(&self) -> bool {
            *self.connects.lock().unwrap() >= self.max_attempts
        }

        async fn connect(&self) -> bool {
            if self.budget_exhausted() {
                return false;
            }
            *self.connects.lock().unwrap() += 1;
            let next = if self.connect_succeeds {
                ConnectionState::Connected
            } else {
                ConnectionState::Failed("scripted".into())
            };
            *self.state.lock().unwrap() = next;
            self.connect_succeeds
        }

        async fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
            *self.state.lock().unwrap() = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mocks::*, *};
    use crate::core::transport::TransportKind;
    use tracing_test::traced_test;

    fn reading() -> Reading {
        Reading {
            station_id: "station_test".into(),
            timestamp: "2026-10-16T08:30:00Z".into(),
            temperature: 20.0,
            humidity: 50.0,
            co2: 400.0,
        }
    }

    fn controller(
        link: &Arc<MockLink>,
        mqtt: &Arc<MockTransport>,
        http: &Arc<MockTransport>,
    ) -> FailoverController {
        FailoverController::new(http.clone()).with_persistent(link.clone(), mqtt.clone())
    }

    #[tokio::test]
    async fn test_connected_success_uses_only_persistent() {
        let link = Arc::new(MockLink::new(ConnectionState::Connected, true, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[true]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[]));

        let delivery = controller(&link, &mqtt, &http)
            .publish_with_failover(&reading())
            .await;

        assert_eq!(delivery, Delivery::Persistent);
        assert_eq!(mqtt.call_count(), 1);
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_persistent_failure_falls_back_once() {
        let link = Arc::new(MockLink::new(ConnectionState::Connected, false, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[false]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[true]));

        let delivery = controller(&link, &mqtt, &http)
            .publish_with_failover(&reading())
            .await;

        assert!(delivery.is_delivered());
        assert_eq!(delivery, Delivery::Request);
        assert_eq!(mqtt.call_count(), 1);
        assert_eq!(http.call_count(), 1);
        assert_eq!(link.disconnect_count(), 1);
        assert_eq!(link.connect_count(), 1);
        assert!(logs_contain("renegotiation failed"));
    }

    #[tokio::test]
    async fn test_persistent_failure_with_successful_reconnect_still_uses_http() {
        let link = Arc::new(MockLink::new(ConnectionState::Connected, true, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[false]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[true]));

        let delivery = controller(&link, &mqtt, &http)
            .publish_with_failover(&reading())
            .await;

        assert_eq!(delivery, Delivery::Request);
        assert_eq!(http.call_count(), 1);
        assert!(link.state().is_connected());
    }

    #[tokio::test]
    async fn test_disconnected_goes_straight_to_http() {
        let link = Arc::new(MockLink::new(ConnectionState::Disconnected, true, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[true]));

        let delivery = controller(&link, &mqtt, &http)
            .publish_with_failover(&reading())
            .await;

        assert_eq!(delivery, Delivery::Request);
        assert_eq!(mqtt.call_count(), 0);
        assert_eq!(link.connect_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_double_failure_is_reported_not_fatal() {
        let link = Arc::new(MockLink::new(ConnectionState::Connected, false, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[false]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[false]));

        let delivery = controller(&link, &mqtt, &http)
            .publish_with_failover(&reading())
            .await;

        assert_eq!(delivery, Delivery::Failed);
        assert!(logs_contain("Reading could not be delivered"));
    }

    #[tokio::test]
    async fn test_without_persistent_path_only_http_is_used() {
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[true, true]));
        let controller = FailoverController::new(http.clone());

        assert!(!controller.maintain().await);
        assert_eq!(
            controller.publish_with_failover(&reading()).await,
            Delivery::Request
        );
        assert!(!controller.has_persistent());
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rest_only_mode_never_touches_link() {
        let link = Arc::new(MockLink::new(ConnectionState::Disconnected, true, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[]));
        let controller = controller(&link, &mqtt, &http).with_mode(TransportMode::RestOnly);

        assert!(!controller.maintain().await);
        controller.publish_with_failover(&reading()).await;

        assert_eq!(link.connect_count(), 0);
        assert_eq!(mqtt.call_count(), 0);
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mqtt_only_mode_drops_reading_when_disconnected() {
        let link = Arc::new(MockLink::new(ConnectionState::Disconnected, false, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[]));
        let controller = controller(&link, &mqtt, &http).with_mode(TransportMode::MqttOnly);

        assert_eq!(
            controller.publish_with_failover(&reading()).await,
            Delivery::Failed
        );
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_maintain_respects_budget() {
        let link = Arc::new(MockLink::new(ConnectionState::Disconnected, false, 2));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[]));
        let controller = controller(&link, &mqtt, &http);

        for _ in 0..5 {
            assert!(!controller.maintain().await);
        }
        assert_eq!(link.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_maintain_skips_connected_link() {
        let link = Arc::new(MockLink::new(ConnectionState::Connected, true, 3));
        let mqtt = Arc::new(MockTransport::new(TransportKind::Mqtt, &[]));
        let http = Arc::new(MockTransport::new(TransportKind::Http, &[]));

        assert!(controller(&link, &mqtt, &http).maintain().await);
        assert_eq!(link.connect_count(), 0);
    }
}
