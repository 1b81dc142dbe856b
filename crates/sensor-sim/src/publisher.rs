//! Frame publishing transports

use crate::settings::SimulationConfig;
use crate::TransportError;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound for flushing queued packets and DISCONNECT at teardown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget sink for `(topic, payload)` pairs
#[async_trait]
pub trait Publisher: Send {
    /// Hand a payload to the transport without waiting for delivery
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Release the connection
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// MQTT publisher at QoS 0.
///
/// The connection handle owns its event loop task.
/// [`disconnect`](Publisher::disconnect) lets the task flush queued publishes
/// and DISCONNECT, waiting at most [`DISCONNECT_TIMEOUT`]; dropping the
/// publisher aborts the task.
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
    broker: String,
}

impl MqttPublisher {
    /// Connect to the configured broker and wait for its acknowledgement
    pub async fn connect(config: &SimulationConfig) -> Result<Self, TransportError> {
        let broker = format!("{}:{}", config.broker_host, config.broker_port);
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Connection(format!(
                            "{} refused connection: {:?}",
                            broker, ack.code
                        )));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(TransportError::Connection(format!("{}: {}", broker, e)));
                }
            }
        }

        let event_loop = tokio::spawn(drive(eventloop));

        info!("Connected to MQTT broker: {}", broker);
        Ok(Self {
            client,
            event_loop,
            broker,
        })
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.client.disconnect().await {
            self.event_loop.abort();
            return Err(TransportError::Connection(e.to_string()));
        }
        match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.event_loop).await {
            Ok(Ok(())) => {
                info!("Disconnected from MQTT broker: {}", self.broker);
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Connection(format!("event loop failed: {}", e))),
            Err(_) => {
                self.event_loop.abort();
                Err(TransportError::Connection(format!(
                    "{} did not take DISCONNECT within {:?}",
                    self.broker, DISCONNECT_TIMEOUT
                )))
            }
        }
    }
}

/// Poll the connection until DISCONNECT is written or the client is gone.
/// Connection errors are retried by the next poll.
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT DISCONNECT flushed");
                return;
            }
            Ok(Event::Incoming(incoming)) => {
                debug!("MQTT incoming: {:?}", incoming);
            }
            Ok(Event::Outgoing(_)) => {}
            Err(ConnectionError::RequestsDone) => {
                warn!("MQTT client dropped without disconnecting");
                return;
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// In-memory publisher that keeps every message it is given
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    /// Messages in publish order
    pub messages: Vec<(String, Vec<u8>)>,
    /// Fail every n-th publish call (1-based) when set
    pub fail_every: Option<usize>,
    pub disconnected: bool,
    calls: usize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every `n`-th publish fails
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.disconnected {
            return Err(TransportError::Connection("publisher is disconnected".to_string()));
        }
        self.calls += 1;
        if self.fail_every.is_some_and(|n| n > 0 && self.calls % n == 0) {
            return Err(TransportError::Publish(format!("call {} rejected", self.calls)));
        }
        self.messages.push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one MQTT control packet and return its type nibble
    async fn read_packet_type(stream: &mut TcpStream) -> Option<u8> {
        let header = stream.read_u8().await.ok()?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.ok()?;
        Some(header >> 4)
    }

    /// Accept one client, acknowledge its CONNECT and record packet types
    /// until DISCONNECT or EOF
    async fn one_shot_broker(listener: TcpListener) -> Vec<u8> {
        let Ok((mut stream, _)) = listener.accept().await else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        while let Some(kind) = read_packet_type(&mut stream).await {
            seen.push(kind);
            match kind {
                1 => {
                    if stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.is_err() {
                        break;
                    }
                }
                14 => break,
                _ => {}
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_disconnect_flushes_queued_publishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(one_shot_broker(listener));

        let config = SimulationConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            ..SimulationConfig::default()
        };
        let mut publisher = MqttPublisher::connect(&config).await.unwrap();
        publisher.publish("hydro/test", b"{}".to_vec()).await.unwrap();
        publisher.publish("hydro/test", b"{}".to_vec()).await.unwrap();
        publisher.disconnect().await.unwrap();

        // CONNECT, two PUBLISH, DISCONNECT; keep-alive pings are ignored
        let seen: Vec<u8> = broker.await.unwrap().into_iter().filter(|&k| k != 12).collect();
        assert_eq!(seen, vec![1, 3, 3, 14]);
    }

    #[tokio::test]
    async fn test_recording_publisher() {
        let mut publisher = RecordingPublisher::failing_every(2);
        assert!(publisher.publish("t", b"a".to_vec()).await.is_ok());
        assert!(matches!(
            publisher.publish("t", b"b".to_vec()).await,
            Err(TransportError::Publish(_))
        ));
        assert!(publisher.publish("t", b"c".to_vec()).await.is_ok());
        assert_eq!(publisher.messages.len(), 2);

        publisher.disconnect().await.unwrap();
        assert!(matches!(
            publisher.publish("t", b"d".to_vec()).await,
            Err(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let config = SimulationConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            MqttPublisher::connect(&config).await,
            Err(TransportError::Connection(_))
        ));
    }
}
