//! # Broker Configuration
//!
//! Connection settings consumed by transport implementations. The bus layer
//! itself never reads these; they exist so applications can configure the
//! broker client they wire in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    /// Host name or address.
    pub host: String,
    /// AMQP port.
    pub port: u16,
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for connecting to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Known broker addresses, tried in order.
    pub addresses: Vec<BrokerAddress>,
    /// Username for the connection.
    pub username: String,
    /// Password for the connection.
    pub password: String,
    /// Virtual host to connect to.
    pub virtual_host: String,
    /// Recover the connection automatically after a failure.
    pub automatic_recovery: bool,
    /// Interval between automatic recovery attempts, in milliseconds.
    pub recovery_interval_ms: u64,
    /// Re-declare topology after a recovered connection.
    pub topology_recovery: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            addresses: vec![BrokerAddress::default()],
            username: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            automatic_recovery: true,
            recovery_interval_ms: 5000,
            topology_recovery: true,
        }
    }
}
