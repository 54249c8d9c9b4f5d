//! Server-side receiver: consumes one connection until the terminator,
//! reports, acknowledges and closes.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::report::{RateReport, ReportKind, ReportSink, SessionTag};
use super::window::MeasurementWindow;
use super::wire::{Frame, PerfCodec};
use super::{ThroughputError, CHUNK_SIZE};
use crate::config::ReportUnit;

/// Receives one connection's payload stream.
pub struct Receiver {
    tag: SessionTag,
    unit: ReportUnit,
    sink: ReportSink,
}

impl Receiver {
    pub fn new(tag: SessionTag, unit: ReportUnit, sink: ReportSink) -> Self {
        Self { tag, unit, sink }
    }

    /// Run the receiver to completion over `stream`.
    ///
    /// The measurement window opens when this is called and closes when the
    /// terminator frame arrives; the report goes to the sink before the
    /// acknowledgement is sent. Any read or write failure ends only this
    /// receiver.
    pub async fn run<S>(self, stream: S) -> Result<RateReport, ThroughputError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let session_id = self.tag.session_id;
        let mut framed = Framed::with_capacity(stream, PerfCodec::new(), CHUNK_SIZE);
        let mut window = MeasurementWindow::open();
        let origin = window.started_at();

        loop {
            match framed.next().await {
                Some(Ok(Frame::Payload(data))) => window.record(data.len()),
                Some(Ok(Frame::Terminator)) => break,
                Some(Ok(Frame::Ack)) => {
                    return Err(ThroughputError::Protocol(
                        "unexpected acknowledgement from transmitter".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(ThroughputError::Transport(e)),
                None => {
                    return Err(ThroughputError::Protocol(format!(
                        "connection closed after {} bytes without terminator",
                        window.bytes()
                    )));
                }
            }
        }

        let window = window.finalize();
        let report = RateReport::from_window(&window, origin, self.unit);

        info!(
            %session_id,
            peer = %self.tag.peer,
            bytes = report.bytes,
            elapsed_sec = window.elapsed().as_secs_f64(),
            rate_mbps = report.rate_mbps,
            "receiver finished"
        );
        self.sink.report(self.tag, ReportKind::Total, report);

        framed.send(Frame::Ack).await?;
        framed.close().await?;
        debug!(%session_id, "receiver closed connection");

        Ok(report)
    }
}
