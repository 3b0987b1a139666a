use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use aclapi_dispatch::exec::DEFAULT_SETFACL;
use aclapi_dispatch::forward::{DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_SOCKET_PATH};
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_GRPC_PORT: u16 = 6593;
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Raw settings as read from the TOML file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub daemon: DaemonSettings,
    pub server: ServerSettings,
    pub logs: LogSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonSettings {
    pub debug_mode: bool,
    pub dispatch_mode: DispatchMode,
    pub socket_path: String,
    pub setfacl_path: String,
    pub dispatch_timeout_secs: Option<u64>,
    pub ipc_max_response_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Forward,
    Exec,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub grpc_port: u16,
    pub tls_enabled: bool,
    pub tls_cert_file: String,
    pub tls_key_file: String,
    pub tls_ca_cert_file: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// Appends JSON lines here instead of writing to stderr.
    pub file: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid listen address {0:?}; expected host:port")]
    Listen(String),
    #[error("daemon configuration error: {0}")]
    Daemon(#[source] DaemonConfigError),
    #[error("logging configuration error: {0}")]
    Logging(#[source] LoggingConfigError),
    #[error("server configuration error: {0}")]
    Server(#[source] ServerConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DaemonConfigError {
    #[error("socket_path must be absolute, got {0:?}")]
    RelativeSocketPath(String),
    #[error("ipc_max_response_bytes must be greater than zero")]
    ZeroResponseLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggingConfigError {
    #[error("unknown log level {0:?}; expected one of error, warn, info, debug, trace")]
    UnknownLevel(String),
    #[error("log file {path} is not writable: {reason}")]
    UnwritableFile { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerConfigError {
    #[error("TLS certificate file not provided (server.tls_cert_file) while TLS is enabled")]
    MissingTlsCert,
    #[error("TLS key file not provided (server.tls_key_file) while TLS is enabled")]
    MissingTlsKey,
}

/// Non-fatal findings from normalization. The caller decides how to report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAdvisory {
    TlsDisabled,
}

impl ConfigAdvisory {
    pub fn message(self) -> &'static str {
        match self {
            Self::TlsDisabled => "TLS is disabled; prefer enabling TLS for security",
        }
    }
}

/// Validated settings. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSettings {
    pub debug_mode: bool,
    pub dispatch: DispatchSettings,
    pub server: ListenSettings,
    pub log_level: log::LevelFilter,
    pub log_file: Option<PathBuf>,
    pub advisories: Vec<ConfigAdvisory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub mode: DispatchMode,
    pub socket_path: PathBuf,
    pub setfacl_path: PathBuf,
    pub timeout: Option<Duration>,
    pub max_response_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSettings {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsSettings>,
}

impl ListenSettings {
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Present means clients must authenticate with a certificate.
    pub ca_cert_file: Option<PathBuf>,
}

impl Settings {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    /// Replaces `server.host` and `server.grpc_port` with a `host:port` value.
    /// IPv6 hosts are written in brackets, as in `[::1]:6593`.
    pub fn override_listen(&mut self, listen: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::Listen(listen.to_string());
        let (host, port) = listen.rsplit_once(':').ok_or_else(invalid)?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        let port = port.parse().map_err(|_| invalid())?;
        self.server.host = host.to_string();
        self.server.grpc_port = port;
        Ok(())
    }

    /// Applies defaults and checks mandatory fields, section by section.
    pub fn normalize(self) -> Result<NormalizedSettings, ConfigError> {
        let Settings { daemon, server, logs } = self;
        let debug_mode = daemon.debug_mode;
        let dispatch = daemon.normalize().map_err(ConfigError::Daemon)?;
        let LogOutput { level: log_level, file: log_file } =
            logs.normalize(debug_mode).map_err(ConfigError::Logging)?;
        let (server, advisories) = server.normalize().map_err(ConfigError::Server)?;
        Ok(NormalizedSettings { debug_mode, dispatch, server, log_level, log_file, advisories })
    }
}

impl DaemonSettings {
    pub fn normalize(self) -> Result<DispatchSettings, DaemonConfigError> {
        let socket_path = or_default(self.socket_path, DEFAULT_SOCKET_PATH);
        if self.dispatch_mode == DispatchMode::Forward && !Path::new(&socket_path).is_absolute() {
            return Err(DaemonConfigError::RelativeSocketPath(socket_path));
        }
        let setfacl_path = or_default(self.setfacl_path, DEFAULT_SETFACL);
        let timeout = match self.dispatch_timeout_secs.unwrap_or(DEFAULT_DISPATCH_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let max_response_bytes = match self.ipc_max_response_bytes {
            Some(0) => return Err(DaemonConfigError::ZeroResponseLimit),
            Some(limit) => limit,
            None => DEFAULT_MAX_RESPONSE_BYTES,
        };
        Ok(DispatchSettings {
            mode: self.dispatch_mode,
            socket_path: socket_path.into(),
            setfacl_path: setfacl_path.into(),
            timeout,
            max_response_bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOutput {
    pub level: log::LevelFilter,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Resolves the level and checks that a configured log file can be opened for append.
    /// The file is created when missing.
    pub fn normalize(self, debug_mode: bool) -> Result<LogOutput, LoggingConfigError> {
        let level = self.level_filter(debug_mode)?;
        let file = match self.file.trim() {
            "" => None,
            path => {
                OpenOptions::new().create(true).append(true).open(path).map_err(|err| {
                    LoggingConfigError::UnwritableFile {
                        path: path.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                Some(PathBuf::from(path))
            }
        };
        Ok(LogOutput { level, file })
    }

    fn level_filter(&self, debug_mode: bool) -> Result<log::LevelFilter, LoggingConfigError> {
        let level = self.level.trim().to_ascii_lowercase();
        if level.is_empty() {
            return Ok(if debug_mode { log::LevelFilter::Debug } else { log::LevelFilter::Info });
        }
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(LoggingConfigError::UnknownLevel(self.level.clone()));
        }
        level.parse().map_err(|_| LoggingConfigError::UnknownLevel(self.level.clone()))
    }
}

impl ServerSettings {
    pub fn normalize(self) -> Result<(ListenSettings, Vec<ConfigAdvisory>), ServerConfigError> {
        let host = or_default(self.host, DEFAULT_HOST);
        let port = if self.grpc_port == 0 { DEFAULT_GRPC_PORT } else { self.grpc_port };
        let mut advisories = Vec::new();
        let tls = if self.tls_enabled {
            if self.tls_cert_file.is_empty() {
                return Err(ServerConfigError::MissingTlsCert);
            }
            if self.tls_key_file.is_empty() {
                return Err(ServerConfigError::MissingTlsKey);
            }
            Some(TlsSettings {
                cert_file: self.tls_cert_file.into(),
                key_file: self.tls_key_file.into(),
                ca_cert_file: (!self.tls_ca_cert_file.is_empty())
                    .then(|| PathBuf::from(self.tls_ca_cert_file)),
            })
        } else {
            advisories.push(ConfigAdvisory::TlsDisabled);
            None
        };
        Ok((ListenSettings { host, port, tls }, advisories))
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}
