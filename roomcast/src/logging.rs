use std::fs::{File, OpenOptions};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Output goes to stdout unless
/// `logging.file_path` is set, in which case it is appended to that file
/// without ANSI colors.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(parse_log_level(&config.level)?.to_string()),
    };

    let (writer, ansi) = match &config.file_path {
        Some(path) => (BoxMakeWriter::new(Arc::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    tracing_subscriber::registry()
        .with(output_layer(&config.format, writer, ansi))
        .with(filter)
        .init();

    Ok(())
}

fn output_layer(format: &str, writer: BoxMakeWriter, ansi: bool) -> BoxedLayer {
    if format == "json" {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(ansi)
            .with_file(false)
            .with_writer(writer)
            .boxed()
    }
}

fn open_log_file(path: &str) -> anyhow::Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").ok(), Some(Level::DEBUG));
        assert_eq!(parse_log_level("warning").ok(), Some(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("roomcast.log");
        let path = path.to_string_lossy();

        writeln!(open_log_file(&path).expect("first open"), "first").expect("write");
        writeln!(open_log_file(&path).expect("second open"), "second").expect("write");

        let contents = std::fs::read_to_string(&*path).expect("read log");
        assert_eq!(contents, "first\nsecond\n");
    }
}
