//! Transport Subscriber (MQTT)
//!
//! Maintains a persistent connection to the broker, subscribes to a single
//! topic, and delivers each message to a [`MessageHandler`] in broker
//! delivery order, strictly one at a time — there is no internal queue, so
//! a slow handler backpressures consumption directly.
//!
//! Connection policy: the initial connect must succeed within the
//! configured timeout or the error is fatal (the process exits and lets a
//! supervisor restart it). After a successful subscription, reconnects are
//! the transport library's job; the loop re-subscribes on every `ConnAck`
//! so delivery resumes once the session is back.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::traits::MessageHandler;

/// Subscriber owning the MQTT client and its event loop.
pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
}

impl std::fmt::Debug for MqttSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSubscriber")
            .field("topic", &self.topic)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

impl MqttSubscriber {
    /// Connect to the broker and subscribe to the configured topic.
    ///
    /// Polls the event loop until the broker acknowledges the connection;
    /// a rejected `ConnAck`, transport error, or timeout is
    /// [`Error::TransportConnect`] — fatal at startup by design, since
    /// broker connectivity is assumed available quickly.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);

        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs as u64),
            async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            if connack.code == ConnectReturnCode::Success {
                                return Ok(());
                            }
                            return Err(Error::transport(format!(
                                "broker rejected connection: {:?}",
                                connack.code
                            )));
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            return Err(Error::transport(format!("connection failed: {}", e)))
                        }
                    }
                }
            },
        )
        .await
        .map_err(|_| {
            Error::transport(format!(
                "timed out connecting to {}:{}",
                config.host, config.port
            ))
        })??;

        client
            .subscribe(&config.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::transport(format!("subscribe failed: {}", e)))?;

        info!(
            client_id = %client_id,
            broker = %format!("{}:{}", config.host, config.port),
            topic = %config.topic,
            "connected and subscribed"
        );

        Ok(Self {
            client,
            eventloop,
            topic: config.topic.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        })
    }

    /// Block the calling task, invoking the handler once per received
    /// message in delivery order. Each message is fully handled before the
    /// next packet is polled. Transport errors after startup are logged and
    /// retried by the underlying client; this loop never returns.
    pub async fn run<H: MessageHandler>(mut self, handler: &mut H) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.handle(&publish.payload).await;
                }
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    // Seen again after an automatic reconnect; the clean
                    // session means we must re-subscribe ourselves.
                    info!(code = ?connack.code, "broker session (re)established");
                    if let Err(e) = self.client.subscribe(&self.topic, QoS::AtLeastOnce).await {
                        warn!(error = %e, topic = %self.topic, "re-subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("broker disconnected, transport will reconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "transport error, backing off before reconnect"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

fn generate_client_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("sensorflux-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_client_id_is_unique() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert!(a.starts_with("sensorflux-"));
        assert!(b.starts_with("sensorflux-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let config = BrokerConfig {
            port: 19883, // nothing listens here
            connect_timeout_secs: 1,
            ..BrokerConfig::default()
        };

        let err = MqttSubscriber::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::TransportConnect(_)));
    }
}
