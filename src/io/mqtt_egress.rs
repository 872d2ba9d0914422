//! MQTT publisher for inventory egress
//!
//! - `mqtt_egress.events_topic` - arrivals, moves, returns, departures, age-outs (QoS 1)
//! - `mqtt_egress.metrics_topic` - periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where and how a message goes out
struct Outgoing<'a> {
    topic: &'a str,
    qos: QoS,
    json: Vec<u8>,
}

/// Drains the egress channel into MQTT
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    rx: mpsc::Receiver<EgressMessage>,
    events_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("rfid-egress-{}", Uuid::now_v7().simple());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        Self {
            client,
            eventloop: Some(eventloop),
            rx,
            events_topic: config.mqtt_egress_events_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    fn route(&self, msg: &EgressMessage) -> Result<Outgoing<'_>, serde_json::Error> {
        Ok(match msg {
            EgressMessage::InventoryEvent(payload) => Outgoing {
                topic: &self.events_topic,
                qos: QoS::AtLeastOnce,
                json: serde_json::to_vec(payload)?,
            },
            EgressMessage::Metrics(payload) => Outgoing {
                topic: &self.metrics_topic,
                qos: QoS::AtMostOnce,
                json: serde_json::to_vec(payload)?,
            },
        })
    }

    async fn publish(&mut self, msg: EgressMessage) {
        let outgoing = match self.route(&msg) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                error!(error = %e, "mqtt_egress_encode_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(outgoing.topic, outgoing.qos, false, outgoing.json).await {
            match msg {
                EgressMessage::InventoryEvent(payload) => {
                    error!(error = %e, event = payload.t.as_str(), tag_id = %payload.tag, "mqtt_egress_event_failed");
                }
                EgressMessage::Metrics(_) => debug!(error = %e, "mqtt_egress_metrics_failed"),
            }
        }
    }

    /// Publish until shutdown, then flush what is already queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let Some(eventloop) = self.eventloop.take() {
            tokio::spawn(drive_eventloop(eventloop, shutdown.clone()));
        }
        info!(events = %self.events_topic, metrics = %self.metrics_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let mut flushed = 0usize;
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish(msg).await;
                            flushed += 1;
                        }
                        info!(flushed = %flushed, "mqtt_egress_shutdown");
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish(msg).await,
                        None => return,
                    }
                }
            }
        }
    }
}

/// Keep the connection alive and acknowledge QoS 1 publishes
async fn drive_eventloop(mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Give queued publishes a moment to reach the broker
                    let _ = tokio::time::timeout(Duration::from_millis(500), async {
                        while eventloop.poll().await.is_ok() {}
                    })
                    .await;
                    return;
                }
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
                    Ok(Event::Incoming(Packet::PubAck(ack))) => debug!(pkid = %ack.pkid, "mqtt_egress_puback"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
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
    use crate::infra::metrics::Metrics;
    use crate::io::egress_channel::{InventoryEventKind, InventoryEventPayload, MetricsPayload};

    fn publisher() -> MqttPublisher {
        let config = Config::from_toml_str(
            "[mqtt_egress]\nenabled = true\nevents_topic = \"site/events\"\nmetrics_topic = \"site/metrics\"\n",
            "t.toml",
        )
        .unwrap();
        let (_tx, rx) = mpsc::channel(1);
        MqttPublisher::new(&config, rx)
    }

    #[tokio::test]
    async fn test_events_route_with_qos1() {
        let publisher = publisher();
        let msg = EgressMessage::InventoryEvent(InventoryEventPayload::new(
            InventoryEventKind::Moved,
            "A",
            "L2",
            Some("Front"),
            1_767_617_600_000,
        ));
        let outgoing = publisher.route(&msg).unwrap();
        assert_eq!(outgoing.topic, "site/events");
        assert_eq!(outgoing.qos, QoS::AtLeastOnce);
        let json: serde_json::Value = serde_json::from_slice(&outgoing.json).unwrap();
        assert_eq!(json["t"], "moved");
        assert_eq!(json["tag"], "A");
    }

    #[tokio::test]
    async fn test_metrics_route_with_qos0() {
        let publisher = publisher();
        let summary = Metrics::new().report(3);
        let msg = EgressMessage::Metrics(MetricsPayload::from_summary(summary, "dc-01".to_string()));
        let outgoing = publisher.route(&msg).unwrap();
        assert_eq!(outgoing.topic, "site/metrics");
        assert_eq!(outgoing.qos, QoS::AtMostOnce);
    }
}
