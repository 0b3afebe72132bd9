use std::io;
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use thiserror::Error;

const PATTERN: &str = "SG | {d(%Y-%m-%d %H:%M:%S)} | {({l}):5.5} | {f}:{L} — {m}{n}";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not open log file {path}: {source}")]
    File { path: String, source: io::Error },
    #[error("invalid logging configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),
    #[error("a logger is already installed")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Parses a level name, falling back to `Info` for anything unknown.
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

fn config(file: &str, level: LevelFilter) -> Result<Config, LoggingError> {
    // The host application may own stdout.
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(file)
        .map_err(|source| LoggingError::File { path: file.to_string(), source })?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .logger(Logger::builder().build("spyglass", level))
        .build(
            Root::builder()
                .appender("console")
                .appender("file")
                .build(level),
        )?;

    Ok(config)
}

/// Sends all logging to stderr and `file`, and logs panics with a backtrace.
///
/// Fails instead of panicking so that a host which cannot log keeps running.
pub fn init(file: &str, level: LevelFilter) -> Result<(), LoggingError> {
    log4rs::init_config(config(file, level)?)?;
    log_panics::init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use crate::*;

    #[test]
    fn we_can_parse_level_names() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" TRACE "), LevelFilter::Trace);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }

    #[test]
    fn unwritable_log_files_are_reported() {
        let result = config("/nonexistent-directory/\0/spyglass.log", LevelFilter::Info);

        assert!(matches!(result, Err(LoggingError::File { .. })));
    }
}
