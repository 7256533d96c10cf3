use crate::error::FrameError;
use crate::voltronic::{command::Command, frame};

use bytes::Bytes;

/// A validated reply payload and the command it answers.
///
/// The payload is kept exactly as received (leading `(` included); [`body`]
/// gives the part the field decoders work on.
///
/// [`body`]: Reply::body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    command: String,
    payload: Bytes,
}

impl Reply {
    pub fn new(command: &str, payload: Bytes) -> Result<Self, FrameError> {
        if payload.first() != Some(&frame::START) {
            return Err(FrameError::MissingStartByte);
        }

        Ok(Self {
            command: command.to_string(),
            payload,
        })
    }

    /// Validate a complete reply frame read for `command`.
    pub fn from_frame(command: &Command, frame: Bytes) -> Result<Self, FrameError> {
        let len = frame::decode(&frame)?.len();
        Self::new(command.name(), frame.slice(..len))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn body(&self) -> &[u8] {
        &self.payload[1..]
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.body())
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}
