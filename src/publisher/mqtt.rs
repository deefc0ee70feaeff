//! MQTT publisher backed by `rumqttc`.

use super::{Message, PublishError, Publisher};
use crate::config::MqttCredentials;
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use url::Url;

/// Port used when the broker URL has none.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the client request queue; `send` waits when it is full.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Build client options from a broker URL such as `mqtt://host:1883`.
pub fn mqtt_options(
    broker_url: &str,
    credentials: Option<&MqttCredentials>,
    client_id: &str,
) -> Result<MqttOptions, PublishError> {
    let url = Url::parse(broker_url)
        .map_err(|e| PublishError::InvalidUrl(format!("{broker_url}: {e}")))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(PublishError::InvalidUrl(format!(
                "{broker_url}: unsupported scheme '{other}'"
            )));
        }
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| PublishError::InvalidUrl(format!("{broker_url}: missing host")))?;
    let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(credentials) = credentials {
        options.set_credentials(
            credentials.username.as_str(),
            credentials.password.as_deref().unwrap_or_default(),
        );
    }

    Ok(options)
}

/// Handle to the task driving the MQTT event loop.
#[derive(Debug)]
pub struct MqttConnection {
    handle: JoinHandle<Result<(), PublishError>>,
}

impl MqttConnection {
    /// Resolves when the connection ends: `Ok` after a requested disconnect,
    /// `Err` when the broker connection failed.
    pub async fn closed(self) -> Result<(), PublishError> {
        self.handle
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?
    }
}

/// Publisher sending each message with QoS 0.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    disconnected: Arc<AtomicBool>,
}

/// Connect to the broker and wait for it to accept the session.
pub async fn connect(
    broker_url: &str,
    credentials: Option<&MqttCredentials>,
) -> Result<(MqttPublisher, MqttConnection), PublishError> {
    let client_id = format!("ble-mqtt-{}", std::process::id());
    let options = mqtt_options(broker_url, credentials, &client_id)?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => break,
            Ok(event) => trace!(?event, "MQTT event before connect"),
            Err(e) => return Err(PublishError::Connection(e.to_string())),
        }
    }
    info!(broker = %broker_url, "Connected to MQTT broker");

    let disconnected = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(drive(eventloop, Arc::clone(&disconnected)));

    Ok((
        MqttPublisher {
            client,
            disconnected,
        },
        MqttConnection { handle },
    ))
}

async fn drive(
    mut eventloop: EventLoop,
    disconnected: Arc<AtomicBool>,
) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return Ok(());
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(_) if disconnected.load(Ordering::SeqCst) => return Ok(()),
            Err(e) => {
                error!(error = %e, "MQTT connection error");
                return Err(PublishError::Connection(e.to_string()));
            }
        }
    }
}

impl Publisher for MqttPublisher {
    fn send(&self, topic: String, message: Message) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            let payload = message.into_payload()?;
            self.client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| PublishError::Client(e.to_string()))
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            if self.disconnected.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            self.client
                .disconnect()
                .await
                .map_err(|e| PublishError::Client(e.to_string()))?;
            info!("Disconnected from MQTT broker");
            Ok(())
        })
    }
}
