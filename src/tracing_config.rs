//! Tracing subscriber setup for the binary
//!
//! Library code only emits `tracing` spans and `log` records; installing a
//! subscriber is left to the application. Console output goes to stderr so
//! stdout stays free for `-` output.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact uncolored output for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// stderr (default)
    Console,
    /// Append to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only at exit
#[derive(Debug, Default)]
#[must_use]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (0 = info, 1 = debug, 2+ = trace)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Explicit filter directives, overriding both `RUST_LOG` and verbosity
    pub env_filter: Option<String>,
    /// Session ID for correlating log lines of one run
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directives for the configured verbosity
    ///
    /// Inference runtimes stay at warn until trace level.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,ort=warn,tract_onnx=warn,reqwest=warn",
            1 => "debug,ort=warn,tract_onnx=warn,hyper=info,reqwest=info",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(self.verbosity_to_filter()))?,
        };

        let registry = Registry::default().with(filter);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },

            (TracingFormat::Compact, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                use tracing_appender::{non_blocking, rolling};

                let file_appender = rolling::never(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("bgstrip.log")),
                );
                let (file_writer, file_guard) = non_blocking(file_appender);
                guard._file_guard = Some(file_guard);

                match format {
                    TracingFormat::Console | TracingFormat::Compact => {
                        let fmt_layer = fmt::layer()
                            .with_ansi(false)
                            .with_writer(file_writer)
                            .compact();
                        registry.with(fmt_layer).try_init()?;
                    },
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => {
                        let fmt_layer = fmt::layer()
                            .json()
                            .with_writer(file_writer)
                            .with_current_span(true)
                            .with_span_list(true);
                        registry.with(fmt_layer).try_init()?;
                    },
                }
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "bgstrip session started");
        }

        Ok(guard)
    }
}

/// CLI defaults: console format at `verbosity`, tagged with `session_id`
#[must_use]
pub fn cli_tracing_config(verbosity: u8, session_id: &str) -> TracingConfig {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(TracingFormat::Console)
        .with_session_id(session_id)
}

/// Initialize tracing with CLI defaults
///
/// # Errors
/// - Subscriber installation failures
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, session_id: &str) -> anyhow::Result<TracingGuard> {
    cli_tracing_config(verbosity, session_id).init()
}

/// Span helpers for the CLI's top-level operations
pub mod spans {
    use tracing::{Level, Span};

    pub fn session(session_id: &str, model_name: &str, provider: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            model_name = %model_name,
            provider = %provider
        )
    }

    pub fn batch_processing(file_count: usize) -> Span {
        tracing::span!(Level::INFO, "batch_processing", file_count = file_count)
    }

    pub fn file_processing(file_path: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "file_processing",
            file_path = %file_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert!(TracingConfig::new().with_verbosity(0).verbosity_to_filter().starts_with("info"));
        assert!(TracingConfig::new().with_verbosity(1).verbosity_to_filter().starts_with("debug"));
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_filters_parse() {
        for verbosity in 0..3 {
            let config = TracingConfig::new().with_verbosity(verbosity);
            assert!(EnvFilter::try_new(config.verbosity_to_filter()).is_ok());
        }
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("bgstrip=trace")
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("bgstrip=trace"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_cli_config_keeps_given_session_id() {
        let config = cli_tracing_config(1, "run-42");
        assert_eq!(config.session_id.as_deref(), Some("run-42"));
        assert_eq!(config.verbosity, 1);
        assert_eq!(config.format, TracingFormat::Console);
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Console);
        assert!(config.env_filter.is_none());
        assert!(config.session_id.is_none());
    }
}
