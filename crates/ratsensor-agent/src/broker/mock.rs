//! In-memory broker for testing.
//!
//! [`MockConnector`] records every connect, publish and subscription, and can
//! be made unreachable, inject inbound messages or kill the live session.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ratsensor_agent::broker::mock::MockConnector;
//! use ratsensor_agent::broker::{BrokerConnection, ConnectionSettings};
//! use ratsensor_agent::config::MqttConfig;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let connector = Arc::new(MockConnector::new());
//! let settings = ConnectionSettings::from_config(&MqttConfig::default(), "dev-1").unwrap();
//! let connection = BrokerConnection::new(connector.clone(), settings);
//!
//! assert!(connection.connect().await);
//! connection.publish("sensor/dev-1", b"{}".to_vec()).unwrap();
//! assert_eq!(connector.published_to("sensor/dev-1").len(), 1);
//! connection.disconnect().await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::BrokerError;
use super::transport::{
    BrokerConnector, BrokerSession, QoS, SessionEvent, SessionHandle, SessionOptions,
};

/// A message seen by the mock broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Default)]
struct BrokerLog {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    subscribe_calls: AtomicU32,
    live_sessions: AtomicU32,
    max_live_sessions: AtomicU32,
    fail_publish: AtomicBool,
    clean_disconnects: AtomicU32,
}

/// A connector whose sessions live in memory.
#[derive(Debug)]
pub struct MockConnector {
    log: Arc<BrokerLog>,
    reachable: AtomicBool,
    connect_calls: AtomicU32,
    last_options: Mutex<Option<SessionOptions>>,
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            log: Arc::new(BrokerLog::default()),
            reachable: AtomicBool::new(true),
            connect_calls: AtomicU32::new(0),
            last_options: Mutex::new(None),
            events: Mutex::new(None),
        }
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose broker refuses every connection.
    pub fn unreachable() -> Self {
        let connector = Self::default();
        connector.set_reachable(false);
        connector
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make publishes on live sessions fail at the transport.
    pub fn set_fail_publish(&self, fail: bool) {
        self.log.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts, failed ones included.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    pub fn live_sessions(&self) -> u32 {
        self.log.live_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever open at once.
    pub fn max_live_sessions(&self) -> u32 {
        self.log.max_live_sessions.load(Ordering::SeqCst)
    }

    /// Sessions closed through [`BrokerSession::disconnect`].
    pub fn clean_disconnects(&self) -> u32 {
        self.log.clean_disconnects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log
            .published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Topics currently subscribed.
    pub fn subscriptions(&self) -> Vec<String> {
        self.log
            .subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.log.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent connect.
    pub fn last_options(&self) -> Option<SessionOptions> {
        self.last_options.lock().ok().and_then(|o| o.clone())
    }

    /// Deliver an inbound message on the live session.
    pub async fn inject_message(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(tx) = self.current_events() else {
            return false;
        };
        tx.send(SessionEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
        .is_ok()
    }

    /// Kill the live session as if the network dropped.
    pub async fn drop_connection(&self, reason: &str) -> bool {
        let Some(tx) = self.events.lock().ok().and_then(|mut e| e.take()) else {
            return false;
        };
        tx.send(SessionEvent::Lost(reason.to_string())).await.is_ok()
    }

    fn current_events(&self) -> Option<mpsc::Sender<SessionEvent>> {
        self.events.lock().ok().and_then(|e| e.clone())
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, options: &SessionOptions) -> Result<SessionHandle, BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_options.lock() {
            *last = Some(options.clone());
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        let live = self.log.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_live_sessions.fetch_max(live, Ordering::SeqCst);
        if let Ok(mut subs) = self.log.subscriptions.lock() {
            subs.clear();
        }

        let (tx, rx) = mpsc::channel(16);
        if let Ok(mut events) = self.events.lock() {
            *events = Some(tx);
        }

        Ok(SessionHandle {
            session: Arc::new(MockSession {
                log: Arc::clone(&self.log),
                open: AtomicBool::new(true),
            }),
            events: rx,
        })
    }
}

struct MockSession {
    log: Arc<BrokerLog>,
    open: AtomicBool,
}

impl MockSession {
    fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            self.log.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        was_open
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Transport("session closed".to_string()))
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    fn try_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.log.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("broken pipe".to_string()));
        }
        if let Ok(mut published) = self.log.published.lock() {
            published.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.log.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subs) = self.log.subscriptions.lock() {
            if !subs.iter().any(|s| s == topic) {
                subs.push(topic.to_string());
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if let Ok(mut subs) = self.log.subscriptions.lock() {
            subs.retain(|s| s != topic);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if self.close() {
            self.log.clean_disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
