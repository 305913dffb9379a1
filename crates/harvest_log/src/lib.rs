#![deny(missing_docs)]
//! Shared logging utilities for the harvest workspace.
//!
//! This crate provides the `harvest_*` logging macros used across the
//! codebase, the process logger setup used by the binary, and a minimal
//! test initializer for the global logger.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// File name of the run log written inside the data directory.
pub const LOG_FILENAME: &str = "harvest.log";

/// `log::trace!` under the workspace name.
#[macro_export]
macro_rules! harvest_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! harvest_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// `log::debug!` under the workspace name.
#[macro_export]
macro_rules! harvest_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// `log::warn!` under the workspace name.
#[macro_export]
macro_rules! harvest_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! harvest_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Destination for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Write to the terminal only.
    Terminal,
    /// Write to the terminal and to `harvest.log` inside the given directory.
    TerminalAndFile(PathBuf),
}

/// Initialize the process logger.
///
/// A log file that cannot be created is reported on stderr and skipped; the
/// terminal logger is always installed.
pub fn initialize(destination: LogDestination, level: LevelFilter) {
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let LogDestination::TerminalAndFile(dir) = destination {
        if let Some(file_logger) = create_file_logger(&dir, level, config) {
            loggers.push(file_logger);
        }
    }

    let _ = CombinedLogger::init(loggers);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        // reqwest and hyper are chatty at debug level.
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .build()
}

fn create_file_logger(
    dir: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory {:?}: {}", dir, err);
        return None;
    }
    let log_path = dir.join(LOG_FILENAME);
    match File::options().create(true).append(true).open(&log_path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not open log file at {:?}: {}", log_path, err);
            None
        }
    }
}

/// Terminal-only logger for test binaries. Calling it more than once, or
/// after another logger was installed, does nothing.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(level, build_config(), TerminalMode::Stderr, ColorChoice::Never);
}
