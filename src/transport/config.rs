use std::time::Duration;

/// Settings for [`LoopClient`](super::LoopClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    connect_timeout: Duration,
    verify_certificates: bool,
    max_clients: usize,
    io_buffer_size: usize,
    user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(20),
            verify_certificates: true,
            max_clients: 10,
            io_buffer_size: 16 * 1024,
            user_agent: Some(concat!("deferred-conn/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl ClientConfig {
    /// Timeout for the TCP connect and TLS handshake.
    ///
    /// The whole exchange is additionally bounded by the request's own timeout.
    /// Defaults to 20 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether to validate server certificates on `https`.
    ///
    /// Defaults to `true`. Turning it off accepts any certificate, and is
    /// logged as a warning when the client is created.
    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Max number of exchanges in flight. Further requests wait for a slot.
    ///
    /// Defaults to 10.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max.max(1);
        self
    }

    /// Size of the socket read and write buffers.
    ///
    /// The write buffer must fit the longest request header line.
    /// Defaults to 16 KiB.
    pub fn io_buffer_size(mut self, size: usize) -> Self {
        self.io_buffer_size = size.max(1024);
        self
    }

    /// `user-agent` sent when the request doesn't set one. `None` sends none.
    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Configured connect timeout.
    pub fn get_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Configured certificate validation.
    pub fn get_verify_certificates(&self) -> bool {
        self.verify_certificates
    }

    /// Configured max in flight exchanges.
    pub fn get_max_clients(&self) -> usize {
        self.max_clients
    }

    /// Configured buffer size.
    pub fn get_io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }

    /// Configured user agent.
    pub fn get_user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_secure() {
        let config = ClientConfig::default();
        assert!(config.get_verify_certificates());
        assert_eq!(config.get_max_clients(), 10);
        assert_eq!(config.get_connect_timeout(), Duration::from_secs(20));
        assert!(config.get_user_agent().unwrap().starts_with("deferred-conn/"));
    }

    #[test]
    fn limits_are_clamped() {
        let config = ClientConfig::default().max_clients(0).io_buffer_size(10);
        assert_eq!(config.get_max_clients(), 1);
        assert_eq!(config.get_io_buffer_size(), 1024);
    }
}
