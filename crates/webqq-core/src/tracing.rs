//! Log output for programs built on the webqq crates.
//!
//! The library crates only emit `tracing` events. A program either installs
//! its own subscriber or lets the message client install one from the
//! `[log]` section of its configuration:
//!
//! ```toml
//! [log]
//! install = true
//! level = "debug"
//! format = "json"
//! directives = ["webqq_client::poller=trace"]
//! ```
//!
//! `RUST_LOG`, when set, replaces the configured directives entirely.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt,
    prelude::*,
    registry::LookupSpan,
};

/// Targets of the crates in this workspace.
pub const CRATE_TARGETS: [&str; 3] = ["webqq_core", "webqq_protocol", "webqq_client"];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid log level {0:?}")]
    Level(String),

    #[error("invalid log directive {directive:?}: {source}")]
    Directive {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

impl TracingError {
    /// True when another subscriber was installed first.
    pub fn is_already_installed(&self) -> bool {
        matches!(self, Self::SetGlobalSubscriber(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One line per event.
    #[default]
    Compact,
    /// Multi-line, for reading poll traffic at a terminal.
    Pretty,
    /// JSON lines for log pipelines.
    Json,
}

/// The `[log]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Install a global subscriber when the client starts.
    pub install: bool,
    /// Level applied to every webqq crate.
    pub level: String,
    pub format: LogFormat,
    /// Extra directives applied after the per-crate level, such as
    /// `webqq_client::poller=trace` or `reqwest=debug`.
    pub directives: Vec<String>,
    pub timestamps: bool,
    /// Include source file and line.
    pub location: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            install: false,
            level: "info".to_string(),
            format: LogFormat::default(),
            directives: Vec::new(),
            timestamps: true,
            location: false,
        }
    }
}

impl LogSettings {
    /// Directive string for the configured level and extras.
    pub fn directives(&self) -> Result<String, TracingError> {
        let level: LevelFilter = self
            .level
            .parse()
            .map_err(|_| TracingError::Level(self.level.clone()))?;

        let mut directives: Vec<String> = CRATE_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect();
        for directive in &self.directives {
            directive
                .parse::<tracing_subscriber::filter::Directive>()
                .map_err(|source| TracingError::Directive {
                    directive: directive.clone(),
                    source,
                })?;
            directives.push(directive.clone());
        }
        Ok(directives.join(","))
    }

    /// Checks the level and directives without installing anything.
    pub fn validate(&self) -> Result<(), TracingError> {
        self.directives().map(|_| ())
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.directives()?;
        EnvFilter::try_new(&directives).map_err(|source| TracingError::Directive {
            directive: directives,
            source,
        })
    }

    fn output_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = fmt::layer()
            .with_target(true)
            .with_file(self.location)
            .with_line_number(self.location);

        match (self.format, self.timestamps) {
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
        }
    }
}

/// Installs the global subscriber described by `settings`.
///
/// The `install` switch is not consulted here; it tells the client whether
/// to call this on startup.
///
/// # Errors
///
/// Fails if the level or a directive does not parse, or if a global
/// subscriber is already installed.
pub fn init_tracing(settings: &LogSettings) -> Result<(), TracingError> {
    let filter = settings.filter()?;
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(settings.output_layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
