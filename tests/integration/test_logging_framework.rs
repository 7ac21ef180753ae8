use conduit::logging::config::LoggingConfig;
use conduit::logging::layers::console::select_console_output;
use conduit::logging::layers::file::log_file_path;
use conduit::logging::{self, detect_context, ConsoleOutput, ExecutionContext};
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn clear_logging_env() {
    for v in &[
        "CONDUIT_LOG_LEVEL",
        "CONDUIT_LOG_CONSOLE",
        "CONDUIT_EXECUTION_CONTEXT",
        "RUST_LOG",
    ] {
        env::remove_var(v);
    }
}

fn write_logging_toml(workspace: &Path, content: &str) {
    let dir = workspace.join(".conduit").join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("logging.toml"), content).unwrap();
}

#[test]
#[serial]
fn defaults_apply_without_config_file() {
    clear_logging_env();
    let temp_dir = TempDir::new().unwrap();

    let config = LoggingConfig::load(Some(temp_dir.path())).unwrap();
    assert_eq!(config.default_level, "info");
    assert!(config.enable_file);
    assert!(!config.json_file);
    assert!(config.log_dir.is_none());
    assert!(config.console_output.is_none());

    let path = log_file_path(&config, Some(temp_dir.path())).unwrap();
    assert_eq!(path, temp_dir.path().join(".conduit/logs/conduit.log"));
}

#[test]
#[serial]
fn workspace_config_file_is_applied() {
    clear_logging_env();
    let temp_dir = TempDir::new().unwrap();
    write_logging_toml(
        temp_dir.path(),
        r#"
[logging]
log_dir = "var/agent-logs"
default_level = "conduit=debug,warn"
json_file = true
console_output = "stdout"
"#,
    );

    let config = LoggingConfig::load(Some(temp_dir.path())).unwrap();
    assert_eq!(config.default_level, "conduit=debug,warn");
    assert!(config.json_file);
    assert_eq!(config.console_output, Some(ConsoleOutput::Stdout));

    let path = log_file_path(&config, Some(temp_dir.path())).unwrap();
    assert_eq!(path, temp_dir.path().join("var/agent-logs/conduit.log"));
}

#[test]
#[serial]
fn env_overrides_win_over_config_file() {
    clear_logging_env();
    let temp_dir = TempDir::new().unwrap();
    write_logging_toml(
        temp_dir.path(),
        "[logging]\ndefault_level = \"warn\"\nconsole_output = \"stdout\"\n",
    );
    env::set_var("CONDUIT_LOG_LEVEL", "trace");
    env::set_var("CONDUIT_LOG_CONSOLE", "none");

    let config = LoggingConfig::load(Some(temp_dir.path()));
    clear_logging_env();

    let config = config.unwrap();
    assert_eq!(config.default_level, "trace");
    assert_eq!(config.console_output, Some(ConsoleOutput::None));
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    clear_logging_env();
    let temp_dir = TempDir::new().unwrap();

    env::set_var("CONDUIT_LOG_CONSOLE", "printer");
    assert!(LoggingConfig::load(Some(temp_dir.path())).is_err());
    clear_logging_env();

    write_logging_toml(temp_dir.path(), "[logging]\nlog_dir = \"\"\n");
    assert!(LoggingConfig::load(Some(temp_dir.path())).is_err());

    write_logging_toml(temp_dir.path(), "[logging\n");
    assert!(LoggingConfig::load(Some(temp_dir.path())).is_err());
}

#[test]
fn console_output_follows_execution_context() {
    assert_eq!(
        select_console_output(ExecutionContext::Embedded, None),
        ConsoleOutput::None
    );
    assert_eq!(
        select_console_output(ExecutionContext::Embedded, Some(ConsoleOutput::Stderr)),
        ConsoleOutput::Stderr
    );
    assert_eq!(
        select_console_output(ExecutionContext::LocalDev, None),
        ConsoleOutput::Stderr
    );
    assert_eq!(
        select_console_output(ExecutionContext::Batch, Some(ConsoleOutput::Stdout)),
        ConsoleOutput::None
    );
}

#[test]
#[serial]
fn execution_context_is_detected_from_env() {
    clear_logging_env();
    assert_eq!(detect_context(), ExecutionContext::Embedded);

    env::set_var("CONDUIT_EXECUTION_CONTEXT", "local");
    assert_eq!(detect_context(), ExecutionContext::LocalDev);

    env::set_var("CONDUIT_EXECUTION_CONTEXT", "batch");
    assert_eq!(detect_context(), ExecutionContext::Batch);
    assert!(ExecutionContext::Batch.disables_console());

    env::set_var("CONDUIT_EXECUTION_CONTEXT", "bogus");
    assert_eq!(detect_context(), ExecutionContext::Embedded);
    clear_logging_env();
}

#[test]
#[serial]
fn init_writes_to_the_workspace_log_file_once() {
    clear_logging_env();
    let temp_dir = TempDir::new().unwrap();
    logging::reset_for_tests();

    let guard = logging::init(Some(temp_dir.path()), ExecutionContext::Embedded).unwrap();
    assert_eq!(guard.console_output(), ConsoleOutput::None);
    assert_eq!(
        guard.log_file_path(),
        temp_dir.path().join(".conduit/logs/conduit.log")
    );
    tracing::warn!(conversation_id = "conv-log", "logging framework smoke test");

    assert!(logging::init(Some(temp_dir.path()), ExecutionContext::Embedded).is_err());

    drop(guard);
    let contents = fs::read_to_string(temp_dir.path().join(".conduit/logs/conduit.log")).unwrap();
    assert!(contents.contains("logging framework smoke test"));
    assert!(contents.contains("conv-log"));
}
