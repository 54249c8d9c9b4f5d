//! Session orchestrator: runs `parallelism` independent transmitters against
//! one server and waits for all of them.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use super::report::ReportSink;
use super::transmitter::{TransmitOutcome, Transmitter};
use super::ThroughputError;
use crate::config::TestConfiguration;

/// Result of one stream; streams are indexed from 0 in spawn order.
#[derive(Debug)]
pub struct StreamResult {
    pub stream: u32,
    pub result: Result<TransmitOutcome, ThroughputError>,
}

pub struct SessionOrchestrator {
    config: Arc<TestConfiguration>,
    sink: ReportSink,
}

impl SessionOrchestrator {
    pub fn new(config: Arc<TestConfiguration>, sink: ReportSink) -> Self {
        Self { config, sink }
    }

    /// Spawn one transmitter per configured stream, each on its own
    /// connection, and wait until every one has finished.
    ///
    /// A failing stream does not affect the others. Results are returned in
    /// stream order regardless of completion order.
    pub async fn run(self) -> Vec<StreamResult> {
        let streams = self.config.parallelism;
        info!(
            server = %self.config.socket_addr(),
            streams,
            mode = ?self.config.mode,
            "starting client session"
        );

        let mut set = JoinSet::new();
        for stream in 0..streams {
            let transmitter = Transmitter::new(Arc::clone(&self.config), self.sink.clone());
            set.spawn(async move {
                StreamResult {
                    stream,
                    result: transmitter.run().await,
                }
            });
        }
        // Only the transmitters hold the sink from here on.
        drop(self.sink);

        let mut results = Vec::with_capacity(streams as usize);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(res) => {
                    if let Err(e) = &res.result {
                        warn!(stream = res.stream, error = %e, "stream failed");
                    }
                    results.push(res);
                }
                Err(e) => warn!(error = %e, "transmitter task panicked or was cancelled"),
            }
        }

        results.sort_by_key(|r| r.stream);
        results
    }
}
