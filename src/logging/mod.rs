pub mod config;
pub mod context;
pub mod layers;

pub use context::{detect_context, ExecutionContext};
pub use layers::console::ConsoleOutput;

use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file, BoxLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Guards that keep logging sinks active for the lifetime of the host.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    console_output: ConsoleOutput,
    log_file_path: PathBuf,
}

impl LoggingGuard {
    /// Returns the console output configuration used during initialization.
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    /// Returns the log file path backed by the file sink.
    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}

/// Initialize the global tracing subscriber.
///
/// Configuration precedence is defaults, `<workspace>/.conduit/config/logging.toml`,
/// then environment (`RUST_LOG`, `CONDUIT_LOG_LEVEL`, `CONDUIT_LOG_CONSOLE`). Calling
/// this more than once per process is an error.
pub fn init(workspace_root: Option<&Path>, context: ExecutionContext) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let config = LoggingConfig::load(workspace_root)?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;
    let log_file_path = file::log_file_path(&config, workspace_root)?;

    let (file_layer, file_guard) = file::file_layer::<Registry>(&log_file_path, &config)?;
    let console_output = console::select_console_output(context, config.console_output);
    let console_layer = console::console_layer::<Registry>(console_output);

    let sinks: Vec<BoxLayer<Registry>> = vec![file_layer, console_layer];
    tracing_subscriber::registry()
        .with(sinks)
        .with(env_filter)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {}", err))?;

    tracing::debug!(
        log_file = %log_file_path.display(),
        console = %console_output,
        ?context,
        "logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
        console_output,
        log_file_path,
    })
}

/// Reset the initialization guard so tests can reconfigure logging multiple times.
#[doc(hidden)]
pub fn reset_for_tests() {
    LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
}
