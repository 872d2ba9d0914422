//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT read sources (one client per topic)
//! - `http` - Query surface and `POST /reads`
//! - `prometheus` - Prometheus text exposition
//! - `catalog` - Device catalog (location -> facility)
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for inventory events

pub mod catalog;
pub mod egress_channel;
pub mod http;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use catalog::{DeviceCatalog, HttpDeviceCatalog, StaticDeviceCatalog};
pub use egress_channel::{create_egress_channel, EgressSender, InventoryEventKind, InventoryEventPayload};
pub use http::{start_http_server, HttpState};
pub use mqtt::{start_read_source, MqttSourceConfig};
pub use mqtt_egress::MqttPublisher;
