use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use quill_stream::{StreamTransport, TransportWorker, transport};

/// One replayed transport event, parsed from a JSON-lines script:
/// `{"event": "message", "data": "Hello<br>world", "delay_ms": 50}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptEvent {
    pub event: EventKind,
    #[serde(default)]
    pub data: String,
    /// Pause before this event; falls back to the configured gap.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Startup,
    Message,
    End,
    Error,
}

#[derive(Debug, Snafu)]
pub enum ScriptError {
    #[snafu(display("failed to read script file {path:?}: {source}"))]
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid script event on line {line}: {source}"))]
    ParseLine {
        line: usize,
        source: serde_json::Error,
    },
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptEvent>, ScriptError> {
    let text = std::fs::read_to_string(path).context(ReadScriptSnafu {
        path: path.to_path_buf(),
    })?;
    parse_script(&text)
}

/// Parses a JSON-lines script; blank lines are skipped.
pub fn parse_script(text: &str) -> Result<Vec<ScriptEvent>, ScriptError> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event =
            serde_json::from_str(line).context(ParseLineSnafu { line: index + 1 })?;
        events.push(event);
    }
    Ok(events)
}

/// Builds a transport whose producer replays `events` in order, pausing
/// `default_gap` before each one unless the line carries its own delay.
/// The worker stops early when the consumer closes the transport.
pub fn scripted_transport(
    events: Vec<ScriptEvent>,
    default_gap: Duration,
) -> (StreamTransport, TransportWorker) {
    let (mut sender, stream) = transport::channel();
    let worker = async move {
        for event in events {
            let gap = event
                .delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default_gap);
            tokio::select! {
                _ = sender.closed() => {
                    tracing::debug!("consumer closed the transport; stopping replay");
                    return;
                }
                _ = tokio::time::sleep(gap) => {}
            }

            let delivered = match event.event {
                EventKind::Startup => sender.startup(event.data),
                EventKind::Message => sender.message(event.data),
                EventKind::End => sender.end(),
                EventKind::Error => sender.error(event.data),
            };
            if !delivered {
                return;
            }
        }
    }
    .boxed();

    (stream, worker)
}
