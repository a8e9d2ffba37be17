//! The seam between the connection manager and the wire client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use rumqttc::QoS;

use super::BrokerError;

/// Where the broker listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Message the broker publishes on our behalf if the session drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything needed to open one session.
#[derive(Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub endpoint: Endpoint,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub last_will: Option<LastWill>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive", &self.keep_alive)
            .field("last_will", &self.last_will)
            .finish()
    }
}

/// Something that happened on a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An inbound publish on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// The transport failed; the session is dead.
    Lost(String),
}

/// An acknowledged session and its inbound event stream.
///
/// The stream ends (or yields [`SessionEvent::Lost`]) when the session dies.
pub struct SessionHandle {
    pub session: Arc<dyn BrokerSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Opens sessions to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect and wait for the broker's acknowledgment.
    ///
    /// Callers bound this with their own timeout; dropping the future must
    /// leave no connection behind.
    async fn connect(&self, options: &SessionOptions) -> Result<SessionHandle, BrokerError>;
}

/// Operations on one live session.
///
/// Publishing and subscribing only queue the request; delivery failures
/// surface later as [`SessionEvent::Lost`].
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Queue a publish without waiting for queue space.
    fn try_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Send a clean disconnect and let the session wind down.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}
