use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use env_logger::{Builder, Env, Target};
use serde_json::json;

use crate::config::NormalizedSettings;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("logger already installed: {0}")]
    Install(#[from] log::SetLoggerError),
}

/// Logger for the whole process. `RUST_LOG`, when set, wins over the configured level.
///
/// With a log file configured, records are appended to it one JSON object per line.
pub fn builder(settings: &NormalizedSettings) -> Result<Builder, LoggingError> {
    let default_filter = settings.log_level.to_string().to_ascii_lowercase();
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    if let Some(path) = &settings.log_file {
        builder.target(Target::Pipe(Box::new(open_append(path)?)));
        builder.format(|buf, record| {
            let line = json!({
                "ts": buf.timestamp_millis().to_string(),
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    } else if settings.debug_mode {
        builder.format_module_path(true).format_timestamp(None);
    } else {
        builder.format_module_path(false).format_timestamp_millis();
    }
    Ok(builder)
}

/// Installs the logger. Only the process entry point calls this.
pub fn init(settings: &NormalizedSettings) -> Result<(), LoggingError> {
    builder(settings)?.try_init()?;
    Ok(())
}

fn open_append(path: &Path) -> Result<std::fs::File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::Open { path: path.to_path_buf(), source })
}
