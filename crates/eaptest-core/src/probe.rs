//! Reachability probe for the RADIUS server.
//!
//! A short timed connect runs before any authentication attempt so a down
//! server produces one fast diagnosis instead of N per-type timeouts.

use crate::config::ServerTarget;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// The server did not accept a connection within the probe timeout.
#[derive(Debug, Error)]
#[error("RADIUS server {address}:{port} is unreachable: {reason}")]
pub struct Unreachable {
    pub address: String,
    pub port: u16,
    pub reason: String,
}

/// Attempts a timed socket connect to the target.
pub async fn probe_server(target: &ServerTarget, timeout: Duration) -> Result<(), Unreachable> {
    let addr = (target.address.as_str(), target.port);
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(err)) => Err(Unreachable {
            address: target.address.clone(),
            port: target.port,
            reason: err.to_string(),
        }),
        Err(_) => Err(Unreachable {
            address: target.address.clone(),
            port: target.port,
            reason: format!("connect timed out after {}s", timeout.as_secs()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> ServerTarget {
        ServerTarget {
            address: "127.0.0.1".to_string(),
            port,
            secret: "secret".to_string(),
            identity: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn reachable_server_passes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe_server(&target(port), Duration::from_secs(2)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Bind then drop to find a port that is almost certainly closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = probe_server(&target(port), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.port, port);
    }
}
