//! Telemetry server configuration.
//!
//! Each server kind has built-in defaults
//! (time: port 8080, `/tmp/log_time`; system: port 8081,
//! `/tmp/log_system_data`). Layers are applied in order, later wins:
//!
//! 1. [`ServerConfig::for_kind`] defaults
//! 2. the `[time]` / `[system]` table of a TOML file
//! 3. `PULSE_*` environment variables
//! 4. command-line flags
//!
//! Layers 2-4 are all expressed as [`ServerOverrides`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pulse_core::{Sampler, SystemSampler, TimeSampler};
use serde::Deserialize;
use thiserror::Error;

/// Listen backlog.
pub const DEFAULT_BACKLOG: u32 = 5;

/// Broadcast tick period.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Upper bound on a single client send before the peer is considered failed.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;

/// In-process queue depth between the server and the tee writer.
pub const DEFAULT_TEE_QUEUE: usize = 256;

/// Environment variable overriding the listen port.
pub const ENV_PORT: &str = "PULSE_PORT";

/// Environment variable overriding the log FIFO path.
pub const ENV_PIPE: &str = "PULSE_PIPE";

/// Environment variable overriding the bind address.
pub const ENV_BIND: &str = "PULSE_BIND";

// ============================================================================
// Server kind
// ============================================================================

/// Which telemetry server to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Timezone and session duration
    Time,
    /// Free memory and user CPU time
    System,
}

impl ServerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ServerKind::Time => "time",
            ServerKind::System => "system",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServerKind::Time => 8080,
            ServerKind::System => 8081,
        }
    }

    pub fn default_pipe_path(&self) -> PathBuf {
        match self {
            ServerKind::Time => PathBuf::from("/tmp/log_time"),
            ServerKind::System => PathBuf::from("/tmp/log_system_data"),
        }
    }

    /// Creates the sampler that feeds this kind of server.
    pub fn sampler(&self) -> Box<dyn Sampler> {
        match self {
            ServerKind::Time => Box::new(TimeSampler::new()),
            ServerKind::System => Box::new(SystemSampler::new()),
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Fully resolved configuration for one telemetry server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub kind: ServerKind,
    pub bind: Ipv4Addr,
    pub port: u16,
    pub backlog: u32,
    pub pipe_path: PathBuf,
    pub tee_enabled: bool,
    pub tee_queue: usize,
    pub tick_interval_ms: u64,
    pub write_timeout_ms: u64,
}

impl ServerConfig {
    /// Built-in defaults for `kind`.
    pub fn for_kind(kind: ServerKind) -> Self {
        Self {
            kind,
            bind: Ipv4Addr::UNSPECIFIED,
            port: kind.default_port(),
            backlog: DEFAULT_BACKLOG,
            pipe_path: kind.default_pipe_path(),
            tee_enabled: true,
            tee_queue: DEFAULT_TEE_QUEUE,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }

    /// Applies one override layer on top of this configuration.
    #[must_use]
    pub fn apply(mut self, overrides: &ServerOverrides) -> Self {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(backlog) = overrides.backlog {
            self.backlog = backlog;
        }
        if let Some(ref pipe_path) = overrides.pipe_path {
            self.pipe_path = pipe_path.clone();
        }
        if let Some(tee_enabled) = overrides.tee_enabled {
            self.tee_enabled = tee_enabled;
        }
        if let Some(tee_queue) = overrides.tee_queue {
            self.tee_queue = tee_queue;
        }
        if let Some(ms) = overrides.tick_interval_ms {
            self.tick_interval_ms = ms;
        }
        if let Some(ms) = overrides.write_timeout_ms {
            self.write_timeout_ms = ms;
        }
        self
    }

    /// Checks the values that would otherwise fail later at runtime.
    ///
    /// Port 0 is accepted (the OS picks a free port), which tests rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be > 0".to_string()));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be > 0".to_string()));
        }
        if self.tee_enabled && self.tee_queue == 0 {
            return Err(ConfigError::Invalid("tee_queue must be > 0".to_string()));
        }
        if self.tee_enabled && self.pipe_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("pipe_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind, self.port))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// ============================================================================
// Override layers
// ============================================================================

/// A partial configuration layer. `None` leaves the value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOverrides {
    pub bind: Option<Ipv4Addr>,
    pub port: Option<u16>,
    pub backlog: Option<u32>,
    pub pipe_path: Option<PathBuf>,
    pub tee_enabled: Option<bool>,
    pub tee_queue: Option<usize>,
    pub tick_interval_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

/// Shape of the shared `pulse.toml` file as seen by the servers.
///
/// Other tables (e.g. `[logd]`) are ignored here.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    time: ServerOverrides,
    #[serde(default)]
    system: ServerOverrides,
}

impl ServerOverrides {
    /// Parses the table for `kind` out of a `pulse.toml` document.
    pub fn from_toml_str(kind: ServerKind, contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(match kind {
            ServerKind::Time => file.time,
            ServerKind::System => file.system,
        })
    }

    /// Reads the table for `kind` from a TOML file.
    pub fn from_file(kind: ServerKind, path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(kind, &contents)
    }

    /// Reads `PULSE_PORT`, `PULSE_PIPE` and `PULSE_BIND`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = Self::default();

        if let Some(port) = lookup(ENV_PORT) {
            overrides.port = Some(port.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_PORT,
                value: port.clone(),
            })?);
        }
        if let Some(bind) = lookup(ENV_BIND) {
            overrides.bind = Some(bind.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_BIND,
                value: bind.clone(),
            })?);
        }
        if let Some(pipe) = lookup(ENV_PIPE) {
            overrides.pipe_path = Some(PathBuf::from(pipe));
        }

        Ok(overrides)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
