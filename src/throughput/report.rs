//! Rate reports and the single output sink all handlers report through.
//!
//! Receivers and transmitters never write to stdout themselves. They send
//! [`ReportEvent`]s over a [`ReportSink`] to one printer task, so concurrent
//! sessions never interleave mid-line and every line carries its session id.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::rate;
use super::window::FinalizedWindow;
use crate::config::ReportUnit;

// ---------------------------------------------------------------------------
// RateReport
// ---------------------------------------------------------------------------

/// Start and end of a window, in seconds from the start of the test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalLabel {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl fmt::Display for IntervalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} - {:.1}", self.start_secs, self.end_secs)
    }
}

/// Volume and rate of one finalized window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateReport {
    pub label: IntervalLabel,
    /// Bytes actually moved in the window.
    pub bytes: u64,
    /// Reported volume in `unit`.
    pub volume: f64,
    pub unit: ReportUnit,
    pub rate_mbps: f64,
}

impl RateReport {
    /// Build a report for `window`, labelled relative to `origin`.
    pub fn from_window(window: &FinalizedWindow, origin: Instant, unit: ReportUnit) -> Self {
        let (start_secs, end_secs) = window.offsets_from(origin);
        let rate = rate::calculate(window.bytes_transferred, window.elapsed(), unit);
        Self {
            label: IntervalLabel { start_secs, end_secs },
            bytes: window.bytes_transferred,
            volume: rate.volume,
            unit,
            rate_mbps: rate.rate_mbps,
        }
    }

    /// Report `bytes` as the volume while keeping the measured rate.
    pub fn with_reported_volume(mut self, bytes: u64) -> Self {
        self.volume = rate::volume_in(bytes, self.unit);
        self
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Receiver,
    Transmitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Interval,
    Total,
}

/// Identity of the handler an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionTag {
    pub session_id: Uuid,
    pub side: Side,
    /// Remote end of the connection.
    pub peer: SocketAddr,
}

impl SessionTag {
    pub fn new(side: Side, peer: SocketAddr) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            side,
            peer,
        }
    }

    /// First 8 hex digits of the session id.
    pub fn short_id(&self) -> String {
        let mut id = self.session_id.simple().to_string();
        id.truncate(8);
        id
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent {
    Connected {
        #[serde(flatten)]
        tag: SessionTag,
        local: SocketAddr,
        timestamp: DateTime<Utc>,
    },
    Report {
        #[serde(flatten)]
        tag: SessionTag,
        kind: ReportKind,
        report: RateReport,
        timestamp: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// ReportSink
// ---------------------------------------------------------------------------

/// Cloneable handle for sending events to the printer.
#[derive(Debug, Clone)]
pub struct ReportSink {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl ReportSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn connected(&self, tag: SessionTag, local: SocketAddr) {
        self.emit(ReportEvent::Connected {
            tag,
            local,
            timestamp: Utc::now(),
        });
    }

    pub fn report(&self, tag: SessionTag, kind: ReportKind, report: RateReport) {
        self.emit(ReportEvent::Report {
            tag,
            kind,
            report,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: ReportEvent) {
        if self.tx.send(event).is_err() {
            debug!("report sink closed, dropping event");
        }
    }
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Column header printed once before the first text report.
pub const TEXT_HEADER: &str =
    "Session  Side         Peer                   Interval          Transfer       Bandwidth  Kind";

/// Render one event as a single output line (no trailing newline).
pub fn render(event: &ReportEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(event)
            .unwrap_or_else(|e| format!("{{\"event\":\"error\",\"message\":\"{e}\"}}")),
        OutputFormat::Text => render_text(event),
    }
}

fn side_name(side: Side) -> &'static str {
    match side {
        Side::Receiver => "receiver",
        Side::Transmitter => "transmitter",
    }
}

fn render_text(event: &ReportEvent) -> String {
    match event {
        ReportEvent::Connected { tag, local, .. } => match tag.side {
            Side::Receiver => format!(
                "{:<8} client {} is connected with {}",
                tag.short_id(),
                tag.peer,
                local
            ),
            Side::Transmitter => format!(
                "{:<8} client {} connected with server {}",
                tag.short_id(),
                local,
                tag.peer
            ),
        },
        ReportEvent::Report {
            tag, kind, report, ..
        } => format!(
            "{:<8} {:<12} {:<22} {:<13} {:>12.2} {:<2} {:>9.2} Mbps  {}",
            tag.short_id(),
            side_name(tag.side),
            tag.peer.to_string(),
            report.label.to_string(),
            report.volume,
            report.unit.symbol(),
            report.rate_mbps,
            match kind {
                ReportKind::Interval => "interval",
                ReportKind::Total => "total",
            }
        ),
    }
}

/// Drain `rx`, writing each event to `out` as one line.
///
/// Returns when every [`ReportSink`] has been dropped.
pub async fn print_events<W: AsyncWrite + Unpin>(
    mut rx: mpsc::UnboundedReceiver<ReportEvent>,
    format: OutputFormat,
    mut out: W,
) {
    let mut header_written = false;
    while let Some(event) = rx.recv().await {
        let mut text = String::new();
        if format == OutputFormat::Text
            && !header_written
            && matches!(event, ReportEvent::Report { .. })
        {
            text.push_str(TEXT_HEADER);
            text.push('\n');
            header_written = true;
        }
        text.push_str(&render(&event, format));
        text.push('\n');

        if let Err(e) = write_line(&mut out, &text).await {
            warn!(error = %e, "failed to write report");
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

/// Spawn the printer task writing to stdout.
pub fn spawn_printer(
    rx: mpsc::UnboundedReceiver<ReportEvent>,
    format: OutputFormat,
) -> JoinHandle<()> {
    tokio::spawn(print_events(rx, format, tokio::io::stdout()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
