use crate::logging::config::LoggingConfig;
use crate::logging::layers::{noop_layer, BoxLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use dirs_next::home_dir;
use std::fs::{create_dir_all, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self as tracing_fmt, writer::BoxMakeWriter};
use tracing_subscriber::registry::LookupSpan;

/// Determine the file layout used by the logging file sink.
pub fn log_file_path(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let directory = resolve_log_dir(config, workspace_root)?;
    Ok(directory.join("conduit.log"))
}

/// Build a tracing layer that writes to the provided file path via a non-blocking writer.
pub fn file_layer<S>(
    log_file: &Path,
    config: &LoggingConfig,
) -> Result<(BoxLayer<S>, Option<WorkerGuard>)>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    if !config.enable_file {
        return Ok((noop_layer(), None));
    }

    ensure_log_dir(log_file)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let writer = BoxMakeWriter::new(move || non_blocking.clone());
    let base = tracing_fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let layer: BoxLayer<S> = if config.json_file {
        Box::new(base.json().with_current_span(true))
    } else {
        Box::new(base)
    };
    Ok((layer, Some(guard)))
}

fn ensure_log_dir(log_file: &Path) -> Result<()> {
    let directory = log_file.parent().ok_or_else(|| {
        anyhow!(
            "log file path {} has no parent directory",
            log_file.display()
        )
    })?;
    create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    Ok(())
}

fn resolve_log_dir(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let base_dir = if let Some(custom) = &config.log_dir {
        if custom.is_absolute() {
            custom.clone()
        } else if let Some(workspace) = workspace_root {
            workspace.join(custom)
        } else {
            home_base()?.join(custom)
        }
    } else if let Some(workspace) = workspace_root {
        workspace.join(".conduit").join("logs")
    } else {
        home_base()?.join(".conduit").join("logs")
    };

    ensure_within_anchor(&base_dir, workspace_root, &config.log_dir)?;
    Ok(base_dir)
}

fn home_base() -> Result<PathBuf> {
    home_dir().ok_or_else(|| anyhow!("$HOME directory unavailable"))
}

/// Relative log directories may not escape the workspace (or home) anchor.
fn ensure_within_anchor(
    candidate: &Path,
    workspace_root: Option<&Path>,
    override_dir: &Option<PathBuf>,
) -> Result<()> {
    let Some(custom) = override_dir else {
        return Ok(());
    };
    if custom.is_absolute() {
        return Ok(());
    }
    if custom
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        let anchor = match workspace_root {
            Some(workspace) => workspace.to_path_buf(),
            None => home_base()?,
        };
        return Err(anyhow!(
            "logging.log_dir {} resolves outside {}",
            candidate.display(),
            anchor.display()
        ));
    }
    Ok(())
}
