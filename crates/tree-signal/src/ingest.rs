//! JSON-lines control protocol
//!
//! One command per line on stdin:
//!
//! ```text
//! {"op":"message","channel":"this.that","payload":"disk full","severity":"warn"}
//! {"op":"lock","channel":"this.that","locked":true}
//! {"op":"delete","channel":"this"}
//! {"op":"decay","hold_seconds":30,"decay_seconds":10}
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use tree_signal_core::prelude::*;

/// A parsed control line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub(crate) enum Command {
    Message {
        channel: String,
        #[serde(default)]
        payload: String,
        #[serde(default = "default_severity")]
        severity: String,
        #[serde(default)]
        metadata: Option<BTreeMap<String, String>>,
    },
    Lock {
        channel: String,
        #[serde(default = "default_locked")]
        locked: bool,
    },
    Delete {
        channel: String,
    },
    Decay {
        hold_seconds: f64,
        decay_seconds: f64,
    },
}

fn default_severity() -> String {
    "info".to_string()
}

fn default_locked() -> bool {
    true
}

/// Parse one input line; blank lines and `#` comments yield `None`
///
/// # Errors
/// Malformed JSON or an unknown `op`
pub(crate) fn parse_line(line: &str) -> Result<Option<Command>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// What a command did, for logging
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Applied {
    Message(SubmitReceipt),
    Lock(Option<NodeView>),
    Delete(DeleteReport),
    Decay(DecayConfig),
}

/// Apply a command to the service
///
/// # Errors
/// Whatever the service rejects: bad paths, unknown channels, an invalid
/// severity or decay values
pub(crate) fn apply(service: &TreeSignal, command: Command) -> Result<Applied, TreeError> {
    match command {
        Command::Message {
            channel,
            payload,
            severity,
            metadata,
        } => {
            let severity: MessageSeverity = severity.parse()?;
            let path = service.parse_path(&channel)?;
            let mut message = Message::new(path, payload, severity, service.clock().now());
            if let Some(metadata) = metadata {
                message = message.with_metadata(metadata);
            }
            service.submit_message(message).map(Applied::Message)
        }
        Command::Lock { channel, locked } => service.lock(&channel, locked).map(Applied::Lock),
        Command::Delete { channel } => service.delete(&channel).map(Applied::Delete),
        Command::Decay {
            hold_seconds,
            decay_seconds,
        } => service
            .set_decay(hold_seconds, decay_seconds)
            .map(Applied::Decay),
    }
}

/// Parse and apply a line, logging the outcome; never fails the stream
pub(crate) fn handle_line(service: &TreeSignal, line: &str) {
    let command = match parse_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed input line");
            return;
        }
    };

    match apply(service, command) {
        Ok(Applied::Message(receipt)) => {
            tracing::debug!(
                channel = %receipt.channel,
                id = %receipt.message_id,
                "message accepted"
            );
        }
        Ok(Applied::Lock(node)) => {
            tracing::debug!(present = node.is_some(), "lock applied");
        }
        Ok(Applied::Delete(report)) => {
            tracing::debug!(nodes = report.removed_nodes, "delete applied");
        }
        Ok(Applied::Decay(config)) => {
            tracing::debug!(
                hold = config.hold_seconds,
                decay = config.decay_seconds,
                "decay applied"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, client_error = err.is_client_error(), "command rejected");
        }
    }
}
