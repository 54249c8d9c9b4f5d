//! Connection acceptor: binds the listener and spawns one receiver per
//! accepted connection.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::receiver::Receiver;
use super::report::{ReportSink, SessionTag, Side};
use super::ThroughputError;
use crate::config::ReportUnit;

pub struct Acceptor {
    listener: TcpListener,
    unit: ReportUnit,
    sink: ReportSink,
    receivers: JoinSet<()>,
}

impl Acceptor {
    /// Bind the listening socket. Failure here is fatal for the server.
    pub async fn bind(
        addr: SocketAddr,
        unit: ReportUnit,
        sink: ReportSink,
    ) -> Result<Self, ThroughputError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ThroughputError::Bind { addr, source })?;

        info!(addr = %listener.local_addr()?, "server listening");

        Ok(Self {
            listener,
            unit,
            sink,
            receivers: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Each connection gets its own receiver task; the loop resumes accepting
    /// immediately. Finished receivers are reaped as they complete. A receiver
    /// failure is logged and never affects the listener or other receivers.
    pub async fn run(mut self) -> Result<(), ThroughputError> {
        let local = self.listener.local_addr()?;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "failed to accept TCP connection");
                            continue;
                        }
                    };
                    self.spawn_receiver(stream, peer, local);
                }

                Some(joined) = self.receivers.join_next(), if !self.receivers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "receiver task panicked or was cancelled");
                    }
                }
            }
        }
    }

    fn spawn_receiver(&mut self, stream: TcpStream, peer: SocketAddr, local: SocketAddr) {
        let tag = SessionTag::new(Side::Receiver, peer);
        let session_id = tag.session_id;
        debug!(%session_id, %peer, "accepted TCP connection");
        self.sink.connected(tag, local);

        let receiver = Receiver::new(tag, self.unit, self.sink.clone());
        self.receivers.spawn(async move {
            if let Err(e) = receiver.run(stream).await {
                warn!(%session_id, %peer, error = %e, "receiver failed");
            }
        });
    }
}
