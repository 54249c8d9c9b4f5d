//! Test configuration for simpleperf.
//!
//! Options are resolved in layers: compiled-in defaults, then an optional TOML
//! file, then command-line flags. The merged [`TestOptions`] are validated
//! once into an immutable [`TestConfiguration`]; nothing touches the network
//! until validation has succeeded.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::throughput::mode::{select_mode, Mode};

/// Environment variable naming a TOML configuration file.
pub const CONFIG_ENV_VAR: &str = "SIMPLEPERF_CONFIG";

/// Lowest port a test may use; everything below is privileged.
pub const MIN_PORT: u32 = 1024;

/// Highest valid TCP port.
pub const MAX_PORT: u32 = 65535;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the IP address {0} is not valid")]
    InvalidAddress(String),

    #[error("the port number {0} is out of range [1024, 65535]")]
    PortOutOfRange(u32),

    #[error("invalid format {0:?}; allowed formats: B, KB, MB")]
    UnknownUnit(String),

    #[error("the total duration must be positive, got {0}")]
    NegativeDuration(i64),

    #[error("invalid volume {0:?}; expected <number><unit> with unit B, KB or MB")]
    MalformedVolume(String),

    #[error("parallel connection count must be at least 1")]
    ZeroParallelism,

    #[error("failed to read config file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ---------------------------------------------------------------------------
// ReportUnit
// ---------------------------------------------------------------------------

/// Display unit for transferred volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportUnit {
    #[serde(rename = "B")]
    Byte,
    #[serde(rename = "KB")]
    Kilobyte,
    #[serde(rename = "MB")]
    Megabyte,
}

impl ReportUnit {
    pub const ALL: [ReportUnit; 3] = [ReportUnit::Byte, ReportUnit::Kilobyte, ReportUnit::Megabyte];

    /// Position in `B, KB, MB`; the unit is `1000^index` bytes.
    pub fn index(self) -> u32 {
        match self {
            ReportUnit::Byte => 0,
            ReportUnit::Kilobyte => 1,
            ReportUnit::Megabyte => 2,
        }
    }

    /// Number of bytes in one unit.
    pub fn bytes_per_unit(self) -> u64 {
        1000u64.pow(self.index())
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ReportUnit::Byte => "B",
            ReportUnit::Kilobyte => "KB",
            ReportUnit::Megabyte => "MB",
        }
    }
}

impl fmt::Display for ReportUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ReportUnit {
    type Err = ConfigError;

    /// Case-insensitive: `kb`, `Kb` and `KB` are the same unit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportUnit::ALL
            .into_iter()
            .find(|unit| unit.symbol().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownUnit(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the test this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accept connections on `bind`.
    Server { bind: IpAddr },
    /// Connect to the server at `server`.
    Client { server: IpAddr },
}

/// Role selector before an address has been attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Server,
    Client,
}

// ---------------------------------------------------------------------------
// TestOptions (unvalidated, layered)
// ---------------------------------------------------------------------------

/// Raw, unvalidated test options.
///
/// Every field is optional so that layers can be merged with [`TestOptions::or`].
/// `port` and `time` are wider than their validated types so out-of-range
/// input reaches validation instead of failing in the parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestOptions {
    /// Bind address (server) or server address (client).
    pub address: Option<String>,
    pub port: Option<u32>,
    pub format: Option<String>,
    /// Total duration in seconds.
    pub time: Option<i64>,
    pub parallel: Option<u32>,
    /// Fixed volume as `<number><unit>`, e.g. `10MB`.
    pub num: Option<String>,
    /// Interval length in seconds; `0` disables interval reporting.
    pub interval: Option<u64>,
}

impl TestOptions {
    /// Compiled-in defaults.
    pub fn defaults() -> Self {
        Self {
            address: Some("127.0.0.1".to_string()),
            port: Some(8088),
            format: Some("MB".to_string()),
            time: Some(10),
            parallel: Some(1),
            num: None,
            interval: Some(0),
        }
    }

    /// Fill every unset field of `self` from `fallback`.
    pub fn or(self, fallback: TestOptions) -> Self {
        Self {
            address: self.address.or(fallback.address),
            port: self.port.or(fallback.port),
            format: self.format.or(fallback.format),
            time: self.time.or(fallback.time),
            parallel: self.parallel.or(fallback.parallel),
            num: self.num.or(fallback.num),
            interval: self.interval.or(fallback.interval),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigFile
// ---------------------------------------------------------------------------

/// Optional TOML configuration file.
///
/// ```toml
/// [test]
/// address = "10.0.0.2"
/// port = 9000
/// format = "KB"
///
/// [logging]
/// level = "debug"
/// json = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub test: TestOptions,
    pub logging: LoggingConfig,
}

/// Logging and output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit reports as JSON lines instead of table rows.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Outcome of [`ConfigFile::discover`].
///
/// Discovery runs before logging is set up, so it reports what happened
/// instead of logging it.
#[derive(Debug, Default)]
pub struct Discovered {
    pub file: ConfigFile,
    /// Where `file` was loaded from, if anywhere.
    pub path: Option<PathBuf>,
    /// Load error for a file named only by the environment, replaced by defaults.
    pub skipped: Option<ConfigError>,
}

impl ConfigFile {
    /// Load a configuration file from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file named explicitly, else the one named by
    /// [`CONFIG_ENV_VAR`], else fall back to defaults.
    ///
    /// An explicit path that cannot be loaded is an error. A broken file named
    /// only by the environment is returned in [`Discovered::skipped`].
    pub fn discover(explicit: Option<&Path>) -> Result<Discovered, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::discover_from(explicit, env_path)
    }

    fn discover_from(
        explicit: Option<&Path>,
        env_path: Option<PathBuf>,
    ) -> Result<Discovered, ConfigError> {
        if let Some(path) = explicit {
            return Ok(Discovered {
                file: Self::load(path)?,
                path: Some(path.to_path_buf()),
                skipped: None,
            });
        }

        match env_path {
            Some(path) => match Self::load(&path) {
                Ok(file) => Ok(Discovered {
                    file,
                    path: Some(path),
                    skipped: None,
                }),
                Err(e) => Ok(Discovered {
                    skipped: Some(e),
                    ..Discovered::default()
                }),
            },
            None => Ok(Discovered::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// TestConfiguration
// ---------------------------------------------------------------------------

/// Validated, immutable test configuration shared read-only by every
/// Receiver or Transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfiguration {
    pub role: Role,
    pub port: u16,
    pub report_unit: ReportUnit,
    pub duration: Duration,
    pub parallelism: u32,
    pub mode: Mode,
}

impl TestConfiguration {
    /// Validate merged options for the given role.
    ///
    /// Client-only options (`time`, `parallel`, `num`, `interval`) are still
    /// validated on the server so a bad file fails loudly, but do not affect
    /// the server run.
    pub fn from_options(kind: RoleKind, opts: &TestOptions) -> Result<Self, ConfigError> {
        let opts = opts.clone().or(TestOptions::defaults());

        let address = opts.address.unwrap_or_default();
        let ip: IpAddr = address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.clone()))?;

        let raw_port = opts.port.unwrap_or_default();
        if !(MIN_PORT..=MAX_PORT).contains(&raw_port) {
            return Err(ConfigError::PortOutOfRange(raw_port));
        }
        let port = raw_port as u16;

        let report_unit: ReportUnit = opts.format.unwrap_or_default().parse()?;

        let time = opts.time.unwrap_or_default();
        if time < 0 {
            return Err(ConfigError::NegativeDuration(time));
        }
        let duration = Duration::from_secs(time as u64);

        let parallelism = opts.parallel.unwrap_or(1);
        if parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }

        let mode = select_mode(opts.num.as_deref(), opts.interval.unwrap_or(0))?;

        let role = match kind {
            RoleKind::Server => Role::Server { bind: ip },
            RoleKind::Client => Role::Client { server: ip },
        };

        Ok(Self {
            role,
            port,
            report_unit,
            duration,
            parallelism,
            mode,
        })
    }

    /// Socket address to bind (server) or connect to (client).
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = match self.role {
            Role::Server { bind } => bind,
            Role::Client { server } => server,
        };
        SocketAddr::new(ip, self.port)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
