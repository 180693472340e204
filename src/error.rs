// MIT License - Copyright (c) 2023 ad2driver contributors

/// All errors that can occur in the ad2driver library.
#[derive(Debug, thiserror::Error)]
pub enum Ad2Error {
    /// The carry-over buffer filled up without ever seeing a line
    /// terminator. Fatal for the connection; the transport should reset.
    #[error("frame too long: {actual} bytes buffered without a terminator (max {max})")]
    FrameTooLong { max: usize, actual: usize },

    /// A line with a recognized marker failed layout validation. One bad
    /// line is discarded; later lines are unaffected.
    #[error("malformed message ({reason}): {raw}")]
    MalformedMessage { raw: String, reason: String },

    /// A command was rejected before encoding produced any wire bytes.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
}

impl Ad2Error {
    /// Whether this error ends the connection. Everything except buffer
    /// overflow is recoverable at the message boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Ad2Error::FrameTooLong { .. })
    }

    pub(crate) fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Ad2Error::MalformedMessage {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_command(reason: impl Into<String>) -> Self {
        Ad2Error::InvalidCommand {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Ad2Error>;
