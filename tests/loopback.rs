//! End-to-end tests: real server and client over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use simpleperf::config::{ReportUnit, Role, RoleKind, TestConfiguration, TestOptions};
use simpleperf::throughput::acceptor::Acceptor;
use simpleperf::throughput::mode::{parse_volume, Mode};
use simpleperf::throughput::report::{RateReport, ReportEvent, ReportKind, ReportSink, Side};
use simpleperf::throughput::session::SessionOrchestrator;
use simpleperf::throughput::CHUNK_SIZE;

struct TestServer {
    addr: SocketAddr,
    reports: UnboundedReceiver<ReportEvent>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(unit: ReportUnit) -> Self {
        let (sink, reports) = ReportSink::channel();
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap(), unit, sink)
            .await
            .expect("bind loopback");
        let addr = acceptor.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = acceptor.run().await;
        });
        Self {
            addr,
            reports,
            task,
        }
    }

    /// Next receiver total report, skipping connection notices.
    async fn next_report(&mut self) -> RateReport {
        let wait = async {
            loop {
                match self.reports.recv().await.expect("server sink closed") {
                    ReportEvent::Report {
                        tag, kind, report, ..
                    } => {
                        assert_eq!(tag.side, Side::Receiver);
                        assert_eq!(kind, ReportKind::Total);
                        return report;
                    }
                    ReportEvent::Connected { .. } => continue,
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("timed out waiting for server report")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn client_config(
    addr: SocketAddr,
    mode: Mode,
    duration: Duration,
    parallelism: u32,
) -> TestConfiguration {
    TestConfiguration {
        role: Role::Client { server: addr.ip() },
        port: addr.port(),
        report_unit: ReportUnit::Byte,
        duration,
        parallelism,
        mode,
    }
}

async fn run_client(config: TestConfiguration) -> Vec<ReportEvent> {
    let (sink, mut rx) = ReportSink::channel();
    let results = simpleperf::run_client(config, sink)
        .await
        .expect("client run should succeed");
    assert!(!results.is_empty());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn client_reports(events: &[ReportEvent], wanted: ReportKind) -> Vec<RateReport> {
    events
        .iter()
        .filter_map(|e| match e {
            ReportEvent::Report { kind, report, .. } if *kind == wanted => Some(*report),
            _ => None,
        })
        .collect()
}

async fn assert_duration_mode(secs: u64) {
    let mut server = TestServer::start(ReportUnit::Byte).await;
    let config = client_config(server.addr, Mode::Duration, Duration::from_secs(secs), 1);

    let events = run_client(config).await;
    let received = server.next_report().await;

    let elapsed = received.label.end_secs - received.label.start_secs;
    assert!(
        (elapsed - secs as f64).abs() <= 0.5,
        "receiver measured {elapsed}s for a {secs}s test"
    );

    let totals = client_reports(&events, ReportKind::Total);
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].bytes, received.bytes);
    assert!(received.bytes > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duration_mode_one_second() {
    assert_duration_mode(1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duration_mode_five_seconds() {
    assert_duration_mode(5).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fixed_volume_5000b() {
    let mut server = TestServer::start(ReportUnit::Byte).await;
    let bytes = parse_volume("5000B").unwrap();
    let config = client_config(server.addr, Mode::FixedVolume { bytes }, Duration::ZERO, 1);

    let events = run_client(config).await;
    let received = server.next_report().await;

    assert!(received.bytes >= 5000 && received.bytes < 5000 + CHUNK_SIZE as u64);
    let totals = client_reports(&events, ReportKind::Total);
    assert_eq!(totals[0].volume, 5000.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_kb_equals_thousand_bytes() {
    let mut server = TestServer::start(ReportUnit::Kilobyte).await;
    let mut received = Vec::new();

    for spec in ["1KB", "1000B"] {
        let bytes = parse_volume(spec).unwrap();
        let config = client_config(server.addr, Mode::FixedVolume { bytes }, Duration::ZERO, 1);
        run_client(config).await;
        received.push(server.next_report().await);
    }

    assert_eq!(received[0].bytes, received[1].bytes);
    assert_eq!(received[0].volume, 1.0);
    assert_eq!(received[1].volume, 1.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interval_mode_six_by_two() {
    let mut server = TestServer::start(ReportUnit::Byte).await;
    let config = client_config(
        server.addr,
        Mode::Interval {
            every: Duration::from_secs(2),
        },
        Duration::from_secs(6),
        1,
    );

    let events = run_client(config).await;
    let intervals = client_reports(&events, ReportKind::Interval);
    let totals = client_reports(&events, ReportKind::Total);

    assert_eq!(intervals.len(), 3);
    assert_eq!(totals.len(), 1);

    let sum: f64 = intervals.iter().map(|r| r.volume).sum();
    assert!((sum - totals[0].volume).abs() < 1e-6 * totals[0].volume.max(1.0));
    assert!((totals[0].label.end_secs - 6.0).abs() < 0.5);

    let received = server.next_report().await;
    assert_eq!(received.bytes, totals[0].bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_are_isolated() {
    let mut server = TestServer::start(ReportUnit::Byte).await;

    let small = client_config(server.addr, Mode::FixedVolume { bytes: 3000 }, Duration::ZERO, 1);
    let large = client_config(server.addr, Mode::FixedVolume { bytes: 70_000 }, Duration::ZERO, 1);
    let (a, b) = tokio::join!(run_client(small), run_client(large));
    assert_eq!(client_reports(&a, ReportKind::Total).len(), 1);
    assert_eq!(client_reports(&b, ReportKind::Total).len(), 1);

    let mut seen = vec![server.next_report().await.bytes, server.next_report().await.bytes];
    seen.sort_unstable();
    assert_eq!(seen, vec![3000, 70_000]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_streams_all_complete() {
    let mut server = TestServer::start(ReportUnit::Byte).await;
    let config = client_config(server.addr, Mode::FixedVolume { bytes: 2000 }, Duration::ZERO, 3);

    let (sink, _rx) = ReportSink::channel();
    let results = SessionOrchestrator::new(std::sync::Arc::new(config), sink)
        .run()
        .await;

    assert_eq!(results.len(), 3);
    let streams: Vec<u32> = results.iter().map(|r| r.stream).collect();
    assert_eq!(streams, vec![0, 1, 2]);

    let mut ids = Vec::new();
    for r in &results {
        let outcome = r.result.as_ref().expect("stream should succeed");
        assert_eq!(outcome.bytes_sent, 2000);
        ids.push(outcome.tag.session_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3, "each stream has its own session id");

    for _ in 0..3 {
        assert_eq!(server.next_report().await.bytes, 2000);
    }
}

#[tokio::test]
async fn test_malformed_config_makes_no_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let bad = [
        TestOptions {
            num: Some("abc".into()),
            ..Default::default()
        },
        TestOptions {
            port: Some(80),
            ..Default::default()
        },
        TestOptions {
            format: Some("GB".into()),
            ..Default::default()
        },
    ];

    for opts in bad {
        let opts = opts.or(TestOptions {
            port: Some(u32::from(port)),
            time: Some(1),
            ..Default::default()
        });
        let result = TestConfiguration::from_options(RoleKind::Client, &opts);
        assert!(result.is_err(), "{opts:?} should be rejected");
        if let Ok(config) = result {
            let (sink, _rx) = ReportSink::channel();
            let _ = simpleperf::run_client(config, sink).await;
        }
    }

    let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(accepted.is_err(), "no client should have connected");
}

#[tokio::test]
async fn test_client_connect_refused() {
    let port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let config = client_config(addr, Mode::Duration, Duration::from_secs(1), 2);

    let (sink, _rx) = ReportSink::channel();
    let results = SessionOrchestrator::new(std::sync::Arc::new(config), sink)
        .run()
        .await;

    assert_eq!(results.len(), 2);
    for r in results {
        let err = r.result.expect_err("nothing is listening");
        assert!(err.is_connection());
    }
}

#[tokio::test]
async fn test_run_client_reports_unreachable_server() {
    let port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let config = client_config(addr, Mode::FixedVolume { bytes: 1000 }, Duration::ZERO, 3);

    let (sink, _rx) = ReportSink::channel();
    let err = simpleperf::run_client(config, sink)
        .await
        .expect_err("nothing is listening");
    let message = err.to_string();
    assert!(message.starts_with("could not reach the server"), "{message}");
    assert!(message.contains("connection to"), "{message}");
}
