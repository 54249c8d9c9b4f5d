use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use tracing::{info, warn};

use simpleperf::config::{
    ConfigFile, Role, RoleKind, TestConfiguration, TestOptions, CONFIG_ENV_VAR,
};
use simpleperf::throughput::report::{spawn_printer, OutputFormat, ReportSink};

#[derive(Parser)]
#[command(
    name = "simpleperf",
    about = "Point-to-point TCP throughput measurement",
    version,
    long_about = None
)]
#[command(group(ArgGroup::new("role").required(true).args(["server", "client"])))]
struct Cli {
    /// Run in server mode
    #[arg(short = 's', long)]
    server: bool,

    /// Run in client mode
    #[arg(short = 'c', long)]
    client: bool,

    /// IP address to bind to [default: 127.0.0.1]
    #[arg(short = 'b', long, value_name = "IP", conflicts_with = "client")]
    bind: Option<String>,

    /// IP address of the server to connect to [default: 127.0.0.1]
    #[arg(short = 'I', long = "serverip", value_name = "IP", conflicts_with = "server")]
    server_ip: Option<String>,

    /// Port number, 1024-65535 [default: 8088]
    #[arg(short = 'p', long)]
    port: Option<u32>,

    /// Total test duration in seconds [default: 10]
    #[arg(short = 't', long, value_name = "SECONDS", allow_negative_numbers = true)]
    time: Option<i64>,

    /// Number of parallel connections [default: 1]
    #[arg(short = 'P', long)]
    parallel: Option<u32>,

    /// Unit for reported volume: B, KB or MB [default: MB]
    #[arg(short = 'f', long)]
    format: Option<String>,

    /// Send a fixed volume instead of running for a duration, e.g. 10MB
    #[arg(short = 'n', long, value_name = "<number><unit>")]
    num: Option<String>,

    /// Report every SECONDS during the test (0 disables)
    #[arg(short = 'i', long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// TOML configuration file (also read from SIMPLEPERF_CONFIG)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit reports as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn role(&self) -> RoleKind {
        if self.server {
            RoleKind::Server
        } else {
            RoleKind::Client
        }
    }

    fn options(&self) -> TestOptions {
        TestOptions {
            address: self.bind.clone().or_else(|| self.server_ip.clone()),
            port: self.port,
            format: self.format.clone(),
            time: self.time,
            parallel: self.parallel,
            num: self.num.clone(),
            interval: self.interval,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let discovered = ConfigFile::discover(cli.config.as_deref())?;
    let file = discovered.file;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| file.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Some(path) = &discovered.path {
        info!(path = %path.display(), "loaded configuration file");
    }
    if let Some(e) = &discovered.skipped {
        warn!(
            error = %e,
            "{} set but file could not be loaded, using defaults",
            CONFIG_ENV_VAR
        );
    }

    let options = cli.options().or(file.test);
    let config = TestConfiguration::from_options(cli.role(), &options)?;

    let format = if cli.json || file.logging.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let banners = format == OutputFormat::Text;

    let (sink, rx) = ReportSink::channel();
    let printer = spawn_printer(rx, format);

    match config.role {
        Role::Server { .. } => {
            let acceptor = simpleperf::bind_server(&config, sink).await?;
            if banners {
                println!("{:-<60}", "");
                println!("A simpleperf server is listening on port {}", config.port);
                println!("{:-<60}", "");
            }
            simpleperf::serve(acceptor).await?;
        }
        Role::Client { server } => {
            if banners {
                println!("{:-<60}", "");
                println!(
                    "A simpleperf client connecting to server {}, port {}",
                    server, config.port
                );
                println!("{:-<60}", "");
            }
            let result = simpleperf::run_client(config, sink).await;
            printer.await?;
            result?;
        }
    }

    Ok(())
}
