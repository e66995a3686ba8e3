//! Construction of the structured logging sink.
//!
//! The sink is built once, at startup, and handed around as a
//! [`tracing::Dispatch`]. Give it to the [`Middleware`](crate::Middleware)
//! to scope every request to it, or install it process-wide with [`init`].

use serde::Deserialize;
use tracing::Dispatch;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `info` or `bulwark=debug,warn`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_owned(), format: LogFormat::Json }
    }
}

/// Build a sink writing to stdout.
pub fn dispatch(config: &LogConfig) -> Result<Dispatch, ParseError> {
    dispatch_with_writer(config, std::io::stdout)
}

/// Build a sink writing to `writer`.
pub fn dispatch_with_writer<W>(config: &LogConfig, writer: W) -> Result<Dispatch, ParseError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(&config.filter)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);

    Ok(match config.format {
        LogFormat::Json => Dispatch::new(builder.json().finish()),
        LogFormat::Text => Dispatch::new(builder.finish()),
    })
}

/// Build a stdout sink and make it the process-wide default.
pub fn init(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::dispatcher::set_global_default(dispatch(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    #[test]
    fn json_sink_writes_structured_lines() {
        let buffer = Buffer::default();
        let sink = {
            let buffer = buffer.clone();
            dispatch_with_writer(&LogConfig::default(), move || buffer.clone()).unwrap()
        };

        tracing::dispatcher::with_default(&sink, || {
            tracing::info!(request_id = "abc", "hello");
            tracing::debug!("filtered out");
        });

        let out = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(line["fields"]["message"], "hello");
        assert_eq!(line["fields"]["request_id"], "abc");
    }

    #[test]
    fn bad_filter_is_rejected() {
        let config = LogConfig { filter: "bulwark=loud".into(), format: LogFormat::Text };
        assert!(dispatch(&config).is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"text"}"#).unwrap();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Text);
    }
}
