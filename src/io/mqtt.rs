//! MQTT read source: one client per subscribed topic
//!
//! Each payload is parsed into reads, stamped with the gateway receipt time and
//! handed to the topic's ingest worker via `try_send`, so a slow worker never
//! stalls the MQTT eventloop. Dropped reads are counted and logged (rate-limited).

use crate::domain::types::{epoch_ms, parse_read_payload, ReadEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection settings shared by every read source
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttSourceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mqtt_host().to_string(),
            port: config.mqtt_port(),
            username: config.mqtt_username().map(str::to_string),
            password: config.mqtt_password().map(str::to_string),
        }
    }
}

/// Log a dropped read at most once per second
struct DropWarner {
    last_warn: Instant,
    dropped_since_warn: u64,
}

impl DropWarner {
    fn new() -> Self {
        Self { last_warn: Instant::now() - Duration::from_secs(2), dropped_since_warn: 0 }
    }

    fn dropped(&mut self, topic: &str) {
        self.dropped_since_warn += 1;
        if self.last_warn.elapsed() > Duration::from_secs(1) {
            warn!(topic = %topic, dropped = %self.dropped_since_warn, "mqtt_read_dropped: channel full");
            self.last_warn = Instant::now();
            self.dropped_since_warn = 0;
        }
    }
}

/// Subscribe to `topic` and forward parsed reads until shutdown
pub async fn start_read_source(
    config: MqttSourceConfig,
    topic: String,
    read_tx: mpsc::Sender<ReadEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), rumqttc::ClientError> {
    let client_id = format!("rfid-reads-{}", Uuid::now_v7().simple());
    let mut mqttoptions = MqttOptions::new(client_id, config.host.as_str(), config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_max_packet_size(1024 * 1024, 1024 * 1024);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(topic.as_str(), QoS::AtMostOnce).await?;

    info!(topic = %topic, host = %config.host, port = %config.port, "mqtt_source_subscribed");

    let mut drops = DropWarner::new();
    let mut connected_before = false;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(topic = %topic, "mqtt_source_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let reads = match parse_read_payload(&publish.payload, epoch_ms()) {
                            Ok(reads) => reads,
                            Err(e) => {
                                metrics.record_payload_error();
                                debug!(topic = %publish.topic, error = %e, "mqtt_payload_invalid");
                                continue;
                            }
                        };

                        for read in reads {
                            match read_tx.try_send(read) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    metrics.record_read_dropped();
                                    drops.dropped(&topic);
                                }
                                Err(TrySendError::Closed(_)) => {
                                    warn!(topic = %topic, "mqtt_read_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = %topic, reconnect = %connected_before, "mqtt_source_connected");
                        // Clean sessions drop subscriptions on reconnect
                        if connected_before {
                            if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                error!(topic = %topic, error = %e, "mqtt_resubscribe_failed");
                            }
                        }
                        connected_before = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(topic = %topic, error = %e, "mqtt_source_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_from_config() {
        let config = Config::from_toml_str(
            "[mqtt]\nhost = \"broker.local\"\nport = 1884\nusername = \"u\"\npassword = \"p\"\n",
            "t.toml",
        )
        .unwrap();
        let source = MqttSourceConfig::from_config(&config);
        assert_eq!(source.host, "broker.local");
        assert_eq!(source.port, 1884);
        assert_eq!(source.username.as_deref(), Some("u"));
    }

    #[test]
    fn test_drop_warner_counts_between_warnings() {
        let mut warner = DropWarner::new();
        warner.dropped("rfid/reads/dock");
        assert_eq!(warner.dropped_since_warn, 0);
        warner.dropped("rfid/reads/dock");
        warner.dropped("rfid/reads/dock");
        assert_eq!(warner.dropped_since_warn, 2);
    }
}
