use std::sync::Once;

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides `--log-level` when set, using `EnvFilter` directive syntax.
pub const LOG_ENV_VAR: &str = "DELTA_SYNC_LOG";

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogSettings {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the process-wide subscriber. Later calls are no-ops.
pub fn init_logging(settings: &LogSettings) {
    INIT.call_once(|| {
        let filter = settings.filter();
        match settings.format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_current_span(false))
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(false))
                    .init();
            }
        }
    });
}
