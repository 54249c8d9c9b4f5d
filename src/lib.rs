//! simpleperf -- point-to-point TCP throughput measurement.
//!
//! A server accepts connections and measures what each one receives; a
//! client sends payload for a duration, a fixed volume or a series of
//! intervals, over one or more parallel connections.

pub mod config;
pub mod throughput;

use std::sync::Arc;

use anyhow::{Context, Result};

use config::{Role, TestConfiguration};
use throughput::acceptor::Acceptor;
use throughput::report::ReportSink;
use throughput::session::{SessionOrchestrator, StreamResult};

/// Bind the configured address.
///
/// The returned [`Acceptor`] is already listening; serve with
/// [`Acceptor::run`].
pub async fn bind_server(config: &TestConfiguration, sink: ReportSink) -> Result<Acceptor> {
    if !matches!(config.role, Role::Server { .. }) {
        anyhow::bail!("bind_server requires a server configuration");
    }

    let addr = config.socket_addr();
    tracing::info!(%addr, unit = %config.report_unit, "starting simpleperf server");
    Ok(Acceptor::bind(addr, config.report_unit, sink).await?)
}

/// Serve receivers on a bound acceptor until the process exits.
pub async fn serve(acceptor: Acceptor) -> Result<()> {
    acceptor.run().await.context("server stopped")
}

/// Run every configured client stream to completion.
///
/// Fails if any stream failed; the other streams have still reported. A
/// stream that never reached the server fails the run as unreachable.
pub async fn run_client(
    config: TestConfiguration,
    sink: ReportSink,
) -> Result<Vec<StreamResult>> {
    if !matches!(config.role, Role::Client { .. }) {
        anyhow::bail!("run_client requires a client configuration");
    }

    let results = SessionOrchestrator::new(Arc::new(config), sink).run().await;

    if let Some(e) = results
        .iter()
        .filter_map(|r| r.result.as_ref().err())
        .find(|e| e.is_connection())
    {
        anyhow::bail!("could not reach the server: {e}");
    }

    let failed: Vec<String> = results
        .iter()
        .filter_map(|r| r.result.as_ref().err().map(|e| format!("stream {}: {}", r.stream, e)))
        .collect();
    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} streams failed: {}",
            failed.len(),
            results.len(),
            failed.join("; ")
        );
    }

    Ok(results)
}
