//! Connection to the MQTT broker.
//!
//! [`BrokerConnection`] owns the single upstream session: a background
//! supervision task connects, backs off on failure, re-subscribes the admin
//! topic after every connect and forwards inbound admin messages to the
//! registered [`CommandHandler`]. The monitoring loop only ever sees
//! [`BrokerConnection::is_connected`] and [`BrokerConnection::publish`].
//!
//! The wire client sits behind [`BrokerConnector`] / [`BrokerSession`];
//! [`MqttConnector`] is the rumqttc implementation and [`mock`] holds an
//! in-memory one for tests.
//!
//! # Topics
//!
//! | Topic (default template) | Payload | QoS | Retained |
//! |--------------------------|---------|-----|----------|
//! | `sensor/{device_id}` | [`Reading`](ratsensor_types::Reading) JSON | 0 | no |
//! | `info/{device_id}` | [`MetricsSnapshot`](ratsensor_types::MetricsSnapshot) JSON | 0 | no |
//! | `status/{device_id}` | [`StatusNotice`](ratsensor_types::StatusNotice) JSON | 1 | yes |
//! | admin topic (inbound) | plain-text command | 1 | - |

mod connection;
pub mod mock;
mod mqtt;
mod topics;
mod transport;

pub use connection::{BrokerConnection, CommandHandler, ConnectionSettings, ConnectionState};
pub use mqtt::MqttConnector;
pub use topics::{Topics, render_topic, sanitize_topic_segment};
pub use transport::{
    BrokerConnector, BrokerSession, Endpoint, LastWill, QoS, SessionEvent, SessionHandle,
    SessionOptions,
};

use std::time::Duration;

/// Errors from the broker connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// Publish attempted while no session is up.
    #[error("Not connected to the broker")]
    NotConnected,

    /// The broker setting is not a usable address.
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),

    /// The broker could not be reached or the handshake failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The broker answered the connect with a refusal.
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    /// No connection acknowledgment within the configured timeout.
    #[error("No connection acknowledgment within {0:?}")]
    Timeout(Duration),

    /// The transport rejected an operation on a live session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be encoded.
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Parse a broker setting into an [`Endpoint`].
///
/// Accepts a bare host (using `default_port`), `host:port`, or an
/// `mqtt://` / `mqtts://` URL.
pub fn parse_broker_url(broker: &str, default_port: u16) -> Result<Endpoint, String> {
    let broker = broker.trim();
    let (rest, tls, default_port) = if let Some(stripped) = broker.strip_prefix("mqtt://") {
        (stripped, false, default_port)
    } else if let Some(stripped) = broker.strip_prefix("mqtts://") {
        let port = if default_port == 1883 { 8883 } else { default_port };
        (stripped, true, port)
    } else if broker.contains("://") {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    } else {
        (broker, false, default_port)
    };

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| format!("Invalid port: {}", p))?;
            (h.to_string(), port)
        }
        None => (rest.to_string(), default_port),
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }
    if port == 0 {
        return Err("Port cannot be 0".to_string());
    }

    Ok(Endpoint { host, port, tls })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_host() {
        let endpoint = parse_broker_url("192.168.1.20", 1883).unwrap();
        assert_eq!(endpoint.host, "192.168.1.20");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);

        let endpoint = parse_broker_url("broker.local:1884", 1883).unwrap();
        assert_eq!(endpoint.port, 1884);
    }

    #[test]
    fn test_parse_mqtt_url() {
        let endpoint = parse_broker_url("mqtt://localhost:1883", 1883).unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_parse_mqtts_default_port() {
        let endpoint = parse_broker_url("mqtts://secure.example.com", 1883).unwrap();
        assert_eq!(endpoint.host, "secure.example.com");
        assert_eq!(endpoint.port, 8883);
        assert!(endpoint.tls);

        let endpoint = parse_broker_url("mqtts://secure.example.com", 9000).unwrap();
        assert_eq!(endpoint.port, 9000);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_broker_url("http://localhost:1883", 1883).is_err());
        assert!(parse_broker_url("mqtt://:1883", 1883).is_err());
        assert!(parse_broker_url("localhost:port", 1883).is_err());
        assert!(parse_broker_url("", 1883).is_err());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            BrokerError::NotConnected.to_string(),
            "Not connected to the broker"
        );
        assert!(
            BrokerError::Timeout(Duration::from_secs(5))
                .to_string()
                .contains("5s")
        );
    }
}
