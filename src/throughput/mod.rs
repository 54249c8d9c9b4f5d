//! Throughput test engine: payload framing, measurement, the server-side
//! receiver/acceptor pair and the client-side transmitter/orchestrator pair.

pub mod acceptor;
pub mod mode;
pub mod rate;
pub mod receiver;
pub mod report;
pub mod session;
pub mod transmitter;
pub mod window;
pub mod wire;

use std::net::SocketAddr;

use thiserror::Error;

/// Size of one payload chunk moved per transport operation.
pub const CHUNK_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ThroughputError {
    /// Bind and connect failures: the peer was never reached, so no data
    /// moved and the whole run is aborted.
    pub fn is_connection(&self) -> bool {
        matches!(self, ThroughputError::Bind { .. } | ThroughputError::Connect { .. })
    }
}
