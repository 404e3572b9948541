use clap::Parser;
use pmp_common::types::{CLIENT_PORT, SERVER_PORT};
use std::net::SocketAddr;

/// CLI arguments for the client node.
#[derive(Parser, Debug, Clone)]
#[command(name = "pmpc")]
#[command(about = "PMP client node")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on for inbound messages.
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], CLIENT_PORT)), env = "PMPC_LISTEN")]
    pub listen: SocketAddr,
    /// Dispatch server address.
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], SERVER_PORT)), env = "PMPC_SERVER")]
    pub server: SocketAddr,
    /// Dotted IPv4 address this node is reachable at; written into the
    /// sender field of outgoing control messages.
    #[arg(long, default_value = "127.0.0.1", env = "PMPC_ADVERTISE")]
    pub advertise: String,
    /// Port other client nodes listen on.
    #[arg(long, default_value_t = CLIENT_PORT, env = "PMPC_PEER_PORT")]
    pub peer_port: u16,
    /// How long to wait for a reply before giving up, in milliseconds.
    #[arg(long, default_value = "5000", env = "PMPC_REPLY_TIMEOUT_MS")]
    pub reply_timeout_ms: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket address to listen on for inbound messages.
    pub listen: SocketAddr,
    /// Dispatch server address.
    pub server: SocketAddr,
    /// Dotted IPv4 address this node is reachable at.
    pub advertise: String,
    /// Port other client nodes listen on.
    pub peer_port: u16,
    /// How long to wait for a reply before giving up, in milliseconds.
    pub reply_timeout_ms: u64,
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if pmp_common::addr::encode_ip_addr(&self.advertise).is_err() {
            return Err(format!(
                "advertise must be a dotted IPv4 address, got {:?}",
                self.advertise
            ));
        }

        if self.peer_port == 0 {
            return Err("peer_port must be greater than 0".to_string());
        }

        if self.reply_timeout_ms == 0 {
            return Err("reply_timeout_ms must be greater than 0".to_string());
        }
        if self.reply_timeout_ms > 300_000 {
            return Err("reply_timeout_ms exceeds reasonable limit (300,000 ms)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            server: args.server,
            advertise: args.advertise,
            peer_port: args.peer_port,
            reply_timeout_ms: args.reply_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ClientConfig {
        ClientConfig {
            listen: "127.0.0.1:7741".parse().unwrap(),
            server: "127.0.0.1:7740".parse().unwrap(),
            advertise: "192.168.0.35".into(),
            peer_port: 7741,
            reply_timeout_ms: 5000,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn advertise_must_be_dotted_ipv4() {
        let mut c = valid_config();
        c.advertise = "example.com".into();
        assert!(c.validate().unwrap_err().contains("advertise"));
    }

    #[test]
    fn peer_port_zero() {
        let mut c = valid_config();
        c.peer_port = 0;
        assert!(c.validate().unwrap_err().contains("peer_port"));
    }

    #[test]
    fn reply_timeout_bounds() {
        let mut c = valid_config();
        c.reply_timeout_ms = 0;
        assert!(c.validate().unwrap_err().contains("reply_timeout_ms"));
        c.reply_timeout_ms = 300_001;
        assert!(c.validate().unwrap_err().contains("reply_timeout_ms"));
        c.reply_timeout_ms = 300_000;
        assert!(c.validate().is_ok());
    }
}
