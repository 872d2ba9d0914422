//! Embedded MQTT broker (rumqttd) for sites without their own
//!
//! Readers publish straight to the engine host; the read sources then connect
//! to it like any other broker.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::{AddrParseError, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Largest read batch a reader may publish in one message
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

const MAX_CONNECTIONS: usize = 1024;

/// How long startup waits for the listener before carrying on
const READY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub max_payload_size: usize,
}

impl BrokerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, AddrParseError> {
        let listen = format!("{}:{}", config.broker_bind_address(), config.broker_port()).parse()?;
        Ok(Self { listen, max_connections: MAX_CONNECTIONS, max_payload_size: MAX_PAYLOAD_SIZE })
    }

    fn rumqttd_config(&self) -> Config {
        let router = RouterConfig {
            max_segment_size: 100 * 1024 * 1024,
            max_segment_count: 10,
            max_connections: self.max_connections,
            max_outgoing_packet_count: 200,
            initialized_filters: None,
            ..Default::default()
        };

        let v4 = ServerSettings {
            name: "v4".to_string(),
            listen: self.listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: self.max_payload_size,
                max_inflight_count: 200,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        };

        Config {
            id: 0,
            router,
            v4: Some(HashMap::from([("v4".to_string(), v4)])),
            v5: None,
            ws: None,
            prometheus: None,
            metrics: None,
            bridge: None,
            console: None,
            cluster: None,
        }
    }
}

/// Poll until something accepts TCP connections on `addr`
fn wait_until_listening(addr: SocketAddr, timeout: Duration) -> bool {
    // An unspecified bind address is reachable through loopback
    let probe = if addr.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    } else {
        addr
    };

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&probe, Duration::from_millis(100)).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Run the broker on its own thread; `Broker::start` blocks for the process lifetime
pub fn start_embedded_broker(settings: BrokerSettings) {
    let listen = settings.listen;
    let config = settings.rumqttd_config();

    thread::spawn(move || {
        let mut broker = Broker::new(config);
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    if wait_until_listening(listen, READY_TIMEOUT) {
        info!(addr = %listen, max_connections = %settings.max_connections, "broker_started");
    } else {
        warn!(addr = %listen, "broker_not_ready");
    }
}
