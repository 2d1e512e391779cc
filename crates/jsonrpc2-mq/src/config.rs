//! Configuration types for clients, servers and subscriptions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::transport::SocketPattern;

/// Default time a client waits for the socket and for the reply
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default interval at which a server wakes to check its stop flag
pub const DEFAULT_SERVER_POLL: Duration = Duration::from_millis(1000);

/// Default interval at which a subscription worker wakes
pub const DEFAULT_SUBSCRIPTION_POLL: Duration = Duration::from_millis(1000);

/// Where and how to reach (or expose) one socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `inproc://<name>` or `tcp://<host>:<port>`
    pub address: String,

    /// Socket pattern; `None` uses the variant's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<SocketPattern>,

    /// For clients: how long to wait to send and to receive. For servers:
    /// how long each poll waits before the stop flag is checked again.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl EndpointConfig {
    /// Client endpoint with the default client timeout
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            pattern: None,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Server endpoint with the default server poll interval
    pub fn server(address: impl Into<String>) -> Self {
        Self::new(address).with_timeout(DEFAULT_SERVER_POLL)
    }

    pub fn with_pattern(mut self, pattern: SocketPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured pattern, or `default` when none was set
    pub fn resolve_pattern(
        &self,
        default: Option<SocketPattern>,
    ) -> Result<SocketPattern, ConfigError> {
        self.pattern.or(default).ok_or(ConfigError::MissingPattern)
    }
}

/// Configuration for a subscription client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// The server endpoint; `timeout` bounds each call made through the
    /// subscription
    pub endpoint: EndpointConfig,

    /// How often the worker wakes to check for a stop request
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl SubscriptionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointConfig::new(address),
            poll_interval: DEFAULT_SUBSCRIPTION_POLL,
        }
    }

    pub fn with_pattern(mut self, pattern: SocketPattern) -> Self {
        self.endpoint.pattern = Some(pattern);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
