//! Process logging setup.
//!
//! Events go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` wins over `--log-level` when set.

use tracing::Subscriber;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::cli::LogFormat;
use crate::error::CliError;

pub fn init(level: &str, format: LogFormat) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| CliError::Logging(e.to_string()))?,
    };

    let subscriber = subscriber(filter, format, std::io::stderr, true);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CliError::Logging(e.to_string()))
}

fn subscriber<W>(
    filter: EnvFilter,
    format: LogFormat,
    writer: W,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    match format {
        LogFormat::Pretty => Box::new(builder.pretty().finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
        LogFormat::Json => Box::new(builder.json().finish()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("capture mutex").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn render(format: LogFormat) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = subscriber(EnvFilter::new("info"), format, move || writer.clone(), false);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(symbol = "AAPL", points = 3, "points appended");
        });

        let bytes = captured.0.lock().expect("capture mutex").clone();
        String::from_utf8(bytes).expect("utf-8 log output")
    }

    #[test]
    fn pretty_spreads_one_event_over_several_lines() {
        let output = render(LogFormat::Pretty);
        assert!(output.contains("points appended"));
        assert!(output.lines().filter(|line| !line.trim().is_empty()).count() > 1);
    }

    #[test]
    fn compact_writes_one_line_per_event() {
        let output = render(LogFormat::Compact);
        assert!(output.contains("points appended"));
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn json_writes_structured_fields() {
        let output = render(LogFormat::Json);
        let event: serde_json::Value = serde_json::from_str(output.trim()).expect("json event");
        assert_eq!(event["fields"]["message"], "points appended");
        assert_eq!(event["fields"]["symbol"], "AAPL");
        assert_eq!(event["level"], "INFO");
    }
}
