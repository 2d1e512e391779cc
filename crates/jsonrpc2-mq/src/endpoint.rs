use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::{ConfigError, TransportError};
use crate::transport::{Context, Socket, SocketPattern};

/// A configured endpoint with its pattern resolved, ready to hand out sockets.
///
/// Sockets are owned by the caller and closed when dropped.
#[derive(Debug, Clone)]
pub struct Endpoint {
    config: EndpointConfig,
    pattern: SocketPattern,
    context: Context,
}

impl Endpoint {
    /// Resolve `config` against the variant's `default_pattern`. Without a
    /// `context` the process-wide one is used.
    pub fn new(
        config: EndpointConfig,
        default_pattern: Option<SocketPattern>,
        context: Option<Context>,
    ) -> Result<Self, ConfigError> {
        let pattern = config.resolve_pattern(default_pattern)?;
        Ok(Self {
            config,
            pattern,
            context: context.unwrap_or_else(Context::global),
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn pattern(&self) -> SocketPattern {
        self.pattern
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub async fn connect(&self) -> Result<Socket, TransportError> {
        let mut socket = self.context.socket(self.pattern);
        socket.connect(&self.config.address).await?;
        Ok(socket)
    }

    pub async fn bind(&self) -> Result<Socket, TransportError> {
        let mut socket = self.context.socket(self.pattern);
        socket.bind(&self.config.address).await?;
        Ok(socket)
    }

    /// Fail unless the resolved pattern can `send` and `recv` as a role needs
    pub fn require(&self, role: &'static str, send: bool, recv: bool) -> Result<(), ConfigError> {
        let pattern = self.pattern;
        if (send && !pattern.can_send()) || (recv && !pattern.can_recv()) {
            return Err(ConfigError::UnsuitablePattern { pattern, role });
        }
        Ok(())
    }

    /// Point the endpoint at the address a bind actually resolved to
    pub(crate) fn set_address(&mut self, address: &str) {
        self.config.address = address.to_string();
    }
}
