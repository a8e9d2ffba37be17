//! rumqttc-backed broker sessions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::BrokerError;
use super::transport::{BrokerConnector, BrokerSession, SessionEvent, SessionHandle, SessionOptions};

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;
/// Capacity of the inbound event channel.
const EVENT_CAPACITY: usize = 32;

/// Opens real MQTT sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    fn mqtt_options(options: &SessionOptions) -> MqttOptions {
        let endpoint = &options.endpoint;
        let mut mqtt_options =
            MqttOptions::new(&options.client_id, endpoint.host.clone(), endpoint.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            mqtt_options.set_credentials(username, password);
        } else if let Some(username) = &options.username {
            mqtt_options.set_credentials(username, "");
        }

        if endpoint.tls {
            mqtt_options.set_transport(rumqttc::Transport::tls_with_config(
                rumqttc::TlsConfiguration::Native,
            ));
        }

        if let Some(will) = &options.last_will {
            mqtt_options.set_last_will(rumqttc::LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                will.qos,
                will.retain,
            ));
        }

        mqtt_options
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, options: &SessionOptions) -> Result<SessionHandle, BrokerError> {
        let (client, mut eventloop) =
            AsyncClient::new(Self::mqtt_options(options), REQUEST_CAPACITY);

        // Drive the event loop until the broker answers the CONNECT.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BrokerError::Refused(format!("{:?}", ack.code)));
                    }
                    debug!("MQTT connected to {}: {:?}", options.endpoint, ack);
                    break;
                }
                Ok(event) => trace!("MQTT event before ConnAck: {:?}", event),
                Err(e) => return Err(BrokerError::Connect(e.to_string())),
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let task = tokio::spawn(drive_event_loop(eventloop, tx));

        Ok(SessionHandle {
            session: Arc::new(MqttSession {
                client,
                task: Mutex::new(Some(task)),
            }),
            events: rx,
        })
    }
}

/// Poll the event loop until the session ends, forwarding inbound publishes.
async fn drive_event_loop(mut eventloop: EventLoop, tx: mpsc::Sender<SessionEvent>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = SessionEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = tx.try_send(SessionEvent::Lost("broker sent DISCONNECT".to_string()));
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT DISCONNECT sent");
                break;
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                trace!("MQTT ping response received");
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.try_send(SessionEvent::Lost(e.to_string()));
                break;
            }
        }
    }
}

struct MqttSession {
    client: AsyncClient,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().ok().and_then(|mut t| t.take())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(task) = self.take_task() {
            task.abort();
        }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    fn try_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()));
        // Let queued publishes and the DISCONNECT go out before the loop stops.
        if let Some(task) = self.take_task() {
            let abort = task.abort_handle();
            if tokio::time::timeout(std::time::Duration::from_secs(2), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        result
    }
}
