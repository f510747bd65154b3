//! Server configuration.

use crate::connection::DEFAULT_BUFFER_CAPACITY;
use crate::protocol::HEADER_LEN;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Number of reactor threads.
    pub workers: usize,
    /// Per-connection input buffer capacity; also the largest accepted request.
    pub buffer_capacity: usize,
    /// Upper bound on each reactor's readiness wait.
    pub reactor_poll_interval: Duration,
    /// Upper bound on the acceptor's wait; an idle period this long is logged.
    pub accept_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            workers: crate::DEFAULT_WORKERS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reactor_poll_interval: Duration::from_millis(1),
            accept_idle_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration for the given port with default settings.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Sets the host to bind to.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the number of reactor threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-connection buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Sets the reactor poll bound.
    pub fn with_reactor_poll_interval(mut self, interval: Duration) -> Self {
        self.reactor_poll_interval = interval;
        self
    }

    /// Sets the acceptor idle timeout.
    pub fn with_accept_idle_timeout(mut self, timeout: Duration) -> Self {
        self.accept_idle_timeout = timeout;
        self
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves the bind address to the first matching socket address.
    pub fn resolve(&self) -> Result<SocketAddr, String> {
        let address = self.bind_address();
        address
            .to_socket_addrs()
            .map_err(|e| format!("{}: {}", address, e))?
            .next()
            .ok_or_else(|| format!("{}: no addresses found", address))
    }

    /// Checks the settings a server cannot run without.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.buffer_capacity < HEADER_LEN {
            return Err(format!(
                "buffer capacity must be at least {} bytes, got {}",
                HEADER_LEN, self.buffer_capacity
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.workers, 4);
        assert_eq!(config.buffer_capacity, 1024);
        assert_eq!(config.reactor_poll_interval, Duration::from_millis(1));
        assert_eq!(config.accept_idle_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new(9000)
            .with_host("0.0.0.0")
            .with_workers(2)
            .with_buffer_capacity(4096);

        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.workers, 2);
        assert_eq!(config.buffer_capacity, 4096);
    }

    #[test]
    fn test_resolve() {
        let addr = ServerConfig::new(7000).resolve().unwrap();
        assert_eq!(addr, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ServerConfig::default().with_workers(0).validate().is_err());
        assert!(ServerConfig::default()
            .with_buffer_capacity(3)
            .validate()
            .is_err());
        assert!(ServerConfig::default()
            .with_buffer_capacity(4)
            .validate()
            .is_ok());
    }
}
