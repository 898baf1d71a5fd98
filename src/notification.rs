use thiserror::Error;
use tracing::instrument;

use crate::protocol::{CommandKind, FRAME_MARKER, command_metadata};

/// Typed events decoded from fragments that arrive with no exchange outstanding.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NotifyEvent {
    /// The user pressed the instrument's own measure button.
    SpontaneousMeasurement { mode: u8 },
    /// Unrecognised notification payload preserved as raw bytes.
    Unknown(Vec<u8>),
}

/// Errors returned while decoding notification payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum NotificationDecodeError {
    #[error("notification payload was empty")]
    EmptyPayload,
}

/// Decodes unsolicited characteristic payloads into typed events.
pub struct NotificationHandler;

impl NotificationHandler {
    /// Decodes one notification payload.
    ///
    /// A spontaneous measurement starts with `BB 01 <mode> 00`.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is empty.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Result<NotifyEvent, NotificationDecodeError> {
        if payload.is_empty() {
            return Err(NotificationDecodeError::EmptyPayload);
        }

        let measure_opcode = command_metadata(CommandKind::Measure).opcode();
        if let [FRAME_MARKER, opcode, mode, 0x00, ..] = *payload
            && opcode == measure_opcode
        {
            return Ok(NotifyEvent::SpontaneousMeasurement { mode });
        }

        Ok(NotifyEvent::Unknown(payload.to_vec()))
    }
}
