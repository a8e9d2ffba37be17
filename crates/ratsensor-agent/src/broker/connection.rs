//! The broker connection manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ratsensor_core::{RetryPolicy, RetryState};
use ratsensor_types::{OfflineReason, StatusNotice};

use super::transport::{
    BrokerConnector, BrokerSession, LastWill, QoS, SessionEvent, SessionOptions,
};
use super::{BrokerError, Topics, parse_broker_url};
use crate::config::MqttConfig;

/// Supervision tick while a session is up.
const CONNECTED_TICK: Duration = Duration::from_secs(1);
/// Upper bound on the supervision sleep while disconnected.
const DISCONNECTED_POLL: Duration = Duration::from_millis(100);

/// Connection state as seen by the rest of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Receives inbound admin commands.
///
/// Each message is handled on its own task, so an implementation may take
/// as long as it needs (or never return) without stalling the session.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// `command` is trimmed and lower-cased.
    async fn handle_command(&self, command: String);
}

/// Everything the connection manager needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub session: SessionOptions,
    pub topics: Topics,
    pub retry: RetryPolicy,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// How long [`BrokerConnection::connect`] waits for the first attempt.
    pub grace_period: Duration,
    /// How long [`BrokerConnection::disconnect`] waits for the supervisor.
    pub shutdown_timeout: Duration,
}

impl ConnectionSettings {
    /// Resolve settings for `device_id`.
    ///
    /// The client id is `{prefix}-{device_id}-{nnn}` with a random suffix so
    /// that a restarted agent never collides with its own stale session.
    pub fn from_config(config: &MqttConfig, device_id: &str) -> Result<Self, BrokerError> {
        let endpoint =
            parse_broker_url(&config.broker, config.port).map_err(BrokerError::InvalidBroker)?;
        let topics = Topics::new(config, device_id);
        let suffix: u16 = rand::rng().random_range(100..1000);
        let last_will = LastWill {
            topic: topics.status.clone(),
            payload: serde_json::to_vec(&StatusNotice::offline(
                OfflineReason::UnexpectedDisconnect,
            ))?,
            qos: QoS::AtLeastOnce,
            retain: true,
        };

        Ok(Self {
            session: SessionOptions {
                client_id: format!("{}-{}-{}", config.client_id_prefix, device_id, suffix),
                endpoint,
                username: config.username.clone(),
                password: config.password.clone(),
                keep_alive: Duration::from_secs(config.keep_alive),
                last_will: Some(last_will),
            },
            topics,
            retry: config.retry_policy(),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            grace_period: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
        })
    }
}

#[derive(Clone)]
struct ActiveSession {
    id: u64,
    session: Arc<dyn BrokerSession>,
}

/// State shared between the handle and the supervision task.
struct Shared {
    connector: Arc<dyn BrokerConnector>,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
    /// Completed connect attempts, successful or not.
    attempts: watch::Sender<u64>,
    retry: Mutex<RetryState>,
    active: RwLock<Option<ActiveSession>>,
    handler: RwLock<Option<Arc<dyn CommandHandler>>>,
    next_session_id: AtomicU64,
    /// Session id whose transport failed during a publish.
    failed_session: AtomicU64,
    failure: Notify,
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the single upstream broker session.
///
/// ```no_run
/// use std::sync::Arc;
/// use ratsensor_agent::broker::{BrokerConnection, ConnectionSettings, MqttConnector};
/// use ratsensor_agent::config::MqttConfig;
///
/// # async fn example() -> Result<(), ratsensor_agent::broker::BrokerError> {
/// let settings = ConnectionSettings::from_config(&MqttConfig::default(), "dev-1")?;
/// let connection = BrokerConnection::new(Arc::new(MqttConnector::new()), settings);
/// connection.connect().await;
/// if connection.is_connected() {
///     connection.publish("sensor/dev-1", b"{}".to_vec())?;
/// }
/// connection.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct BrokerConnection {
    shared: Arc<Shared>,
    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
}

impl BrokerConnection {
    pub fn new(connector: Arc<dyn BrokerConnector>, settings: ConnectionSettings) -> Self {
        let retry = RetryState::new(&settings.retry);
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                state: watch::Sender::new(ConnectionState::Disconnected),
                attempts: watch::Sender::new(0),
                retry: Mutex::new(retry),
                active: RwLock::new(None),
                handler: RwLock::new(None),
                next_session_id: AtomicU64::new(0),
                failed_session: AtomicU64::new(0),
                failure: Notify::new(),
            }),
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.shared.settings.topics
    }

    /// Start the supervision task if it is not running.
    ///
    /// Waits up to the grace period for the first attempt to finish and
    /// returns whether a session is up. A `false` return is not an error;
    /// the supervisor keeps retrying in the background.
    pub async fn connect(&self) -> bool {
        let mut attempts = self.shared.attempts.subscribe();
        let seen = *attempts.borrow_and_update();
        {
            let mut supervisor = self.supervisor.lock().await;
            let running = supervisor.as_ref().is_some_and(|s| !s.task.is_finished());
            if running {
                return self.is_connected();
            }

            info!(
                "Starting MQTT connection to {} as {}",
                self.shared.settings.session.endpoint, self.shared.settings.session.client_id
            );
            let cancel = CancellationToken::new();
            let task = tokio::spawn(supervise(Arc::clone(&self.shared), cancel.clone()));
            *supervisor = Some(Supervisor { cancel, task });
        }

        let settled = tokio::time::timeout(
            self.shared.settings.grace_period,
            attempts.wait_for(|n| *n > seen),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        if !settled {
            debug!("First MQTT connect attempt still pending after grace period");
        }
        self.is_connected()
    }

    /// Stop the supervisor, announce shutdown and close the session.
    ///
    /// Safe to call repeatedly and without a prior [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(Supervisor { cancel, task }) = supervisor {
            cancel.cancel();
            let abort = task.abort_handle();
            if tokio::time::timeout(self.shared.settings.shutdown_timeout, task)
                .await
                .is_err()
            {
                warn!("MQTT supervisor did not stop in time; aborting it");
                abort.abort();
            }
        }

        let was_connected = self.is_connected();
        let active = self.shared.take_active();
        self.shared.set_state(ConnectionState::Disconnected);

        let Some(active) = active else {
            return;
        };

        if was_connected {
            match serde_json::to_vec(&StatusNotice::offline(OfflineReason::Shutdown)) {
                Ok(payload) => {
                    let topic = &self.shared.settings.topics.status;
                    if let Err(e) =
                        active
                            .session
                            .try_publish(topic, payload, QoS::AtLeastOnce, true)
                    {
                        warn!("Failed to publish shutdown status: {}", e);
                    }
                }
                Err(e) => warn!("Failed to encode shutdown status: {}", e),
            }
        }

        if let Err(e) = active.session.disconnect().await {
            debug!("Error disconnecting MQTT session: {}", e);
        }
        info!("Disconnected from MQTT broker");
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the reconnect backoff.
    pub fn retry_state(&self) -> RetryState {
        self.shared.retry_snapshot()
    }

    /// Publish at QoS 0 without retain.
    ///
    /// Fails immediately with [`BrokerError::NotConnected`] when no session is
    /// up. A transport failure marks the session lost so the supervisor
    /// reconnects.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let active = self.shared.active().ok_or(BrokerError::NotConnected)?;

        active
            .session
            .try_publish(topic, payload, QoS::AtMostOnce, false)
            .inspect_err(|_| self.shared.report_failure(active.id))
    }

    /// Serialize `value` as JSON and [`publish`](Self::publish) it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.publish(topic, serde_json::to_vec(value)?)
    }

    /// Register the admin command handler and subscribe to the admin topic.
    ///
    /// The subscription is re-issued after every reconnect.
    pub async fn register_command_handler(&self, handler: Arc<dyn CommandHandler>) {
        let Some(topic) = self.shared.settings.topics.admin.clone() else {
            warn!("No admin topic configured; admin commands will not be received");
            return;
        };

        *write(&self.shared.handler) = Some(handler);
        if let Some(active) = self.shared.active() {
            subscribe_admin(&active, &topic).await;
        }
        info!("Listening for admin commands on '{}'", topic);
    }

    /// Drop the admin handler and unsubscribe if a session is up.
    pub async fn unregister_command_handler(&self) {
        let previous = write(&self.shared.handler).take();
        if previous.is_none() {
            return;
        }

        if let (Some(active), Some(topic)) =
            (self.shared.active(), self.shared.settings.topics.admin.as_deref())
        {
            if let Err(e) = active.session.unsubscribe(topic).await {
                debug!("Failed to unsubscribe from '{}': {}", topic, e);
            }
        }
        info!("Stopped listening for admin commands");
    }

    pub fn has_command_handler(&self) -> bool {
        read(&self.shared.handler).is_some()
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        if let Ok(mut supervisor) = self.supervisor.try_lock() {
            if let Some(supervisor) = supervisor.take() {
                supervisor.cancel.cancel();
            }
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn retry_snapshot(&self) -> RetryState {
        *self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Option<ActiveSession> {
        read(&self.active).clone()
    }

    fn take_active(&self) -> Option<ActiveSession> {
        write(&self.active).take()
    }

    fn report_failure(&self, session_id: u64) {
        self.failed_session.store(session_id, Ordering::SeqCst);
        self.failure.notify_one();
    }

    /// Drop session `id` if it is still the active one.
    fn mark_lost(&self, id: u64, reason: &str) {
        let mut active = write(&self.active);
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
            drop(active);
            self.set_state(ConnectionState::Disconnected);
            let retry = self.retry_snapshot();
            warn!(
                "Lost connection to MQTT broker: {}; reconnecting in {:?}",
                reason,
                retry.remaining(Instant::now())
            );
        }
    }

    /// One connect attempt. Returns the event stream of a new session.
    async fn attempt(&self, cancel: &CancellationToken) -> Option<mpsc::Receiver<SessionEvent>> {
        self.set_state(ConnectionState::Connecting);
        let started = Instant::now();
        let timeout = self.settings.connect_timeout;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.set_state(ConnectionState::Disconnected);
                return None;
            }
            result = tokio::time::timeout(timeout, self.connector.connect(&self.settings.session)) => {
                result.unwrap_or(Err(BrokerError::Timeout(timeout)))
            }
        };

        let events = match result {
            Ok(handle) => {
                let id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
                let active = ActiveSession {
                    id,
                    session: handle.session,
                };
                self.retry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_success(&self.settings.retry, Instant::now());
                *write(&self.active) = Some(active.clone());

                let has_handler = read(&self.handler).is_some();
                if let (true, Some(topic)) = (has_handler, self.settings.topics.admin.as_deref()) {
                    subscribe_admin(&active, topic).await;
                }

                self.set_state(ConnectionState::Connected);
                info!("Connected to MQTT broker at {}", self.settings.session.endpoint);
                Some(handle.events)
            }
            Err(e) => {
                let jitter = self.settings.retry.sample_jitter();
                let retry = {
                    let mut retry = self.retry.lock().unwrap_or_else(PoisonError::into_inner);
                    retry.record_failure(&self.settings.retry, started, jitter);
                    *retry
                };
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    "MQTT connection to {} failed: {}; retrying in {:?} (attempt {})",
                    self.settings.session.endpoint,
                    e,
                    retry.effective_delay(),
                    retry.consecutive_failures
                );
                None
            }
        };

        self.attempts.send_modify(|n| *n += 1);
        events
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        if self.settings.topics.admin.as_deref() != Some(topic) {
            debug!("Ignoring message on unexpected topic '{}'", topic);
            return;
        }
        let Some(handler) = read(&self.handler).clone() else {
            debug!("Admin message received with no handler registered");
            return;
        };

        let command = String::from_utf8_lossy(payload).trim().to_lowercase();
        info!("Received admin command '{}'", command);
        tokio::spawn(async move {
            handler.handle_command(command).await;
        });
    }
}

async fn subscribe_admin(active: &ActiveSession, topic: &str) {
    match active.session.subscribe(topic, QoS::AtLeastOnce).await {
        Ok(()) => debug!("Subscribed to admin topic '{}'", topic),
        Err(e) => warn!("Failed to subscribe to admin topic '{}': {}", topic, e),
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// The supervision loop: reconnect with backoff, watch the live session.
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut events: Option<mpsc::Receiver<SessionEvent>> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let active = shared.active();
        match active {
            Some(active) if events.is_some() => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = shared.failure.notified() => {
                        if shared.failed_session.load(Ordering::SeqCst) == active.id {
                            shared.mark_lost(active.id, "publish failed");
                            events = None;
                        }
                    }
                    event = next_event(&mut events) => match event {
                        Some(SessionEvent::Message { topic, payload }) => {
                            shared.dispatch(&topic, &payload);
                        }
                        Some(SessionEvent::Lost(reason)) => {
                            shared.mark_lost(active.id, &reason);
                            events = None;
                        }
                        None => {
                            shared.mark_lost(active.id, "session closed");
                            events = None;
                        }
                    },
                    _ = tokio::time::sleep(CONNECTED_TICK) => {}
                }
            }
            _ => {
                // A session without an event stream is dead.
                if let Some(active) = active {
                    shared.mark_lost(active.id, "session closed");
                }
                events = None;

                let now = Instant::now();
                let retry = shared.retry_snapshot();
                if retry.is_due(now) {
                    events = shared.attempt(&cancel).await;
                    continue;
                }

                let wait = retry.remaining(now).min(DISCONNECTED_POLL);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    debug!("MQTT supervisor stopped");
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
