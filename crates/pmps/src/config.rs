use clap::Parser;
use pmp_common::types::{CLIENT_PORT, SERVER_PORT};
use std::net::SocketAddr;

/// CLI arguments for the dispatch server.
#[derive(Parser, Debug, Clone)]
#[command(name = "pmps")]
#[command(about = "PMP dispatch server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], SERVER_PORT)), env = "PMPS_LISTEN")]
    pub listen: SocketAddr,
    /// Port clients listen on for replies.
    #[arg(long, default_value_t = CLIENT_PORT, env = "PMPS_CLIENT_PORT")]
    pub client_port: u16,
    /// Maximum number of messages returned per history request.
    #[arg(long, default_value = "200", env = "PMPS_HISTORY_LIMIT")]
    pub history_limit: usize,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Port clients listen on for replies.
    pub client_port: u16,
    /// Maximum number of messages returned per history request.
    pub history_limit: usize,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_port == 0 {
            return Err("client_port must be greater than 0".to_string());
        }
        if self.client_port == self.listen.port() {
            return Err("client_port cannot equal the listen port".to_string());
        }

        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".to_string());
        }
        if self.history_limit > 10_000 {
            return Err("history_limit exceeds reasonable limit (10,000)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            client_port: args.client_port,
            history_limit: args.history_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:7740".parse().unwrap(),
            client_port: 7741,
            history_limit: 200,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn client_port_zero() {
        let mut c = valid_config();
        c.client_port = 0;
        assert!(c.validate().unwrap_err().contains("client_port"));
    }

    #[test]
    fn client_port_clashes_with_listen() {
        let mut c = valid_config();
        c.client_port = c.listen.port();
        assert!(c.validate().unwrap_err().contains("client_port"));
    }

    #[test]
    fn history_limit_zero() {
        let mut c = valid_config();
        c.history_limit = 0;
        assert!(c.validate().unwrap_err().contains("history_limit"));
    }

    #[test]
    fn history_limit_too_large() {
        let mut c = valid_config();
        c.history_limit = 10_001;
        assert!(c.validate().unwrap_err().contains("history_limit"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = valid_config();
        c.client_port = 1;
        c.history_limit = 1;
        assert!(c.validate().is_ok());
        c.history_limit = 10_000;
        assert!(c.validate().is_ok());
    }
}
