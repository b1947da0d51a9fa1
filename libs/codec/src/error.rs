//! Protocol-level errors for Remote Sensor Protocol frame processing

use thiserror::Error;

/// Frame and grammar errors with diagnostic context
///
/// `FrameTooLarge` is the only variant that must tear down the owning
/// connection; `Malformed` rejects a single command while the byte stream
/// stays in sync (the offending frame has already been consumed).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Declared frame length exceeds the plausibility bound
    #[error("Frame too large: declared {declared} bytes, maximum is {max}")]
    FrameTooLarge {
        /// Length taken from the 4-byte prefix
        declared: usize,
        /// Configured plausibility cap
        max: usize,
    },

    /// Frame payload is not valid UTF-8
    #[error("Frame payload is not valid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 {
        /// Offset of the first invalid byte
        valid_up_to: usize,
    },

    /// Payload decoded as text but matches no grammar production
    #[error("Malformed command: {reason} (payload: {payload:?})")]
    Malformed {
        /// What the parser expected
        reason: String,
        /// The offending payload, truncated for logging
        payload: String,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>, payload: &str) -> Self {
        const PREVIEW: usize = 80;
        let mut preview = payload.to_string();
        if preview.len() > PREVIEW {
            // Back off to a char boundary; byte 80 may sit inside a
            // multibyte sequence
            let mut end = PREVIEW;
            while !preview.is_char_boundary(end) {
                end -= 1;
            }
            preview.truncate(end);
            preview.push_str("...");
        }
        ProtocolError::Malformed {
            reason: reason.into(),
            payload: preview,
        }
    }

    /// Whether the owning connection must be closed on this error
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }
}
