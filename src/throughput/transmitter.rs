//! Client-side transmitter: one connection, one mode, one set of reports.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::mode::{interval_count, Mode};
use super::report::{RateReport, ReportKind, ReportSink, SessionTag, Side};
use super::window::{FinalizedWindow, MeasurementWindow};
use super::wire::{filler_chunk, Frame, PerfCodec};
use super::ThroughputError;
use crate::config::TestConfiguration;

/// What one transmitter sent and reported.
#[derive(Debug, Clone)]
pub struct TransmitOutcome {
    pub tag: SessionTag,
    /// Payload bytes actually written.
    pub bytes_sent: u64,
    /// Per-interval reports; empty outside interval mode.
    pub intervals: Vec<RateReport>,
    pub total: RateReport,
}

/// Write filler chunks until `keep_sending` returns false, counting every
/// chunk into `window`.
///
/// The predicate is checked before each chunk, so a predicate that is false
/// from the start sends nothing.
pub async fn send_loop<S, P>(
    framed: &mut Framed<S, PerfCodec>,
    window: &mut MeasurementWindow,
    mut keep_sending: P,
) -> Result<(), ThroughputError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: FnMut(&MeasurementWindow) -> bool,
{
    while keep_sending(window) {
        let chunk = filler_chunk();
        let len = chunk.len();
        framed.send(Frame::Payload(chunk)).await?;
        window.record(len);
    }
    Ok(())
}

/// Send the terminator, wait for the acknowledgement, close.
async fn finish<S>(framed: &mut Framed<S, PerfCodec>) -> Result<(), ThroughputError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(Frame::Terminator).await?;

    match framed.next().await {
        Some(Ok(Frame::Ack)) => {}
        Some(Ok(_)) => {
            return Err(ThroughputError::Protocol(
                "expected acknowledgement from receiver".to_string(),
            ));
        }
        Some(Err(e)) => return Err(ThroughputError::Transport(e)),
        None => {
            return Err(ThroughputError::Protocol(
                "connection closed before acknowledgement".to_string(),
            ));
        }
    }

    framed.close().await?;
    Ok(())
}

pub struct Transmitter {
    config: Arc<TestConfiguration>,
    sink: ReportSink,
}

impl Transmitter {
    pub fn new(config: Arc<TestConfiguration>, sink: ReportSink) -> Self {
        Self { config, sink }
    }

    /// Connect to the configured server and run the configured mode.
    pub async fn run(self) -> Result<TransmitOutcome, ThroughputError> {
        let addr = self.config.socket_addr();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ThroughputError::Connect { addr, source })?;
        let local = stream.local_addr()?;

        let tag = SessionTag::new(Side::Transmitter, addr);
        info!(session_id = %tag.session_id, %local, server = %addr, "connected");
        self.sink.connected(tag, local);

        self.run_on(stream, tag).await
    }

    /// Run the configured mode over an already established stream.
    pub async fn run_on<S>(
        &self,
        stream: S,
        tag: SessionTag,
    ) -> Result<TransmitOutcome, ThroughputError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, PerfCodec::new());

        let outcome = match self.config.mode {
            Mode::Duration => self.run_duration(&mut framed, tag).await?,
            Mode::FixedVolume { bytes } => self.run_fixed_volume(&mut framed, tag, bytes).await?,
            Mode::Interval { every } => self.run_intervals(&mut framed, tag, every).await?,
        };

        info!(
            session_id = %tag.session_id,
            bytes_sent = outcome.bytes_sent,
            rate_mbps = outcome.total.rate_mbps,
            "transmitter finished"
        );
        self.sink.report(tag, ReportKind::Total, outcome.total);

        Ok(outcome)
    }

    async fn run_duration<S>(
        &self,
        framed: &mut Framed<S, PerfCodec>,
        tag: SessionTag,
    ) -> Result<TransmitOutcome, ThroughputError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let duration = self.config.duration;
        let mut window = MeasurementWindow::open();
        let origin = window.started_at();

        send_loop(framed, &mut window, |w| w.elapsed() < duration).await?;
        finish(framed).await?;

        let window = window.finalize();
        Ok(TransmitOutcome {
            tag,
            bytes_sent: window.bytes_transferred,
            intervals: Vec::new(),
            total: RateReport::from_window(&window, origin, self.config.report_unit),
        })
    }

    /// Send until `target` bytes are out. The report shows `target` as the
    /// volume; the rate uses what was actually written.
    async fn run_fixed_volume<S>(
        &self,
        framed: &mut Framed<S, PerfCodec>,
        tag: SessionTag,
        target: u64,
    ) -> Result<TransmitOutcome, ThroughputError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut window = MeasurementWindow::open();
        let origin = window.started_at();

        send_loop(framed, &mut window, |w| w.bytes() < target).await?;
        finish(framed).await?;

        let window = window.finalize();
        debug!(
            session_id = %tag.session_id,
            target,
            sent = window.bytes_transferred,
            "fixed volume sent"
        );

        Ok(TransmitOutcome {
            tag,
            bytes_sent: window.bytes_transferred,
            intervals: Vec::new(),
            total: RateReport::from_window(&window, origin, self.config.report_unit)
                .with_reported_volume(target),
        })
    }

    /// Run `floor(duration / every)` back-to-back windows, reporting each,
    /// then report the whole run up to the end of the last window.
    async fn run_intervals<S>(
        &self,
        framed: &mut Framed<S, PerfCodec>,
        tag: SessionTag,
        every: std::time::Duration,
    ) -> Result<TransmitOutcome, ThroughputError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let unit = self.config.report_unit;
        let count = interval_count(self.config.duration, every);
        let test_start = Instant::now();

        let mut intervals = Vec::with_capacity(count as usize);
        let mut total_bytes: u64 = 0;
        let mut last_end = test_start;

        for _ in 0..count {
            let mut window = MeasurementWindow::starting_at(last_end);
            send_loop(framed, &mut window, |w| w.elapsed() < every).await?;
            let window = window.finalize();

            let report = RateReport::from_window(&window, test_start, unit);
            self.sink.report(tag, ReportKind::Interval, report);
            intervals.push(report);

            total_bytes += window.bytes_transferred;
            last_end = window.ended_at;
        }

        finish(framed).await?;

        // Time spent on the terminator handshake is not part of the total.
        let total_window = FinalizedWindow {
            started_at: test_start,
            ended_at: last_end,
            bytes_transferred: total_bytes,
        };

        Ok(TransmitOutcome {
            tag,
            bytes_sent: total_bytes,
            intervals,
            total: RateReport::from_window(&total_window, test_start, unit),
        })
    }
}
