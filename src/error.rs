use std::time::Duration;
use thiserror::Error;

/// Problems with the byte framing of a single frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: {0} bytes is shorter than checksum + terminator")]
    Truncated(usize),

    #[error("checksum mismatch - got {got:02x?}, expected {expected:02x?}")]
    ChecksumMismatch { got: [u8; 2], expected: [u8; 2] },

    #[error("frame does not end in CR (last byte {0:#04x})")]
    BadTerminator(u8),

    #[error("reply does not start with '('")]
    MissingStartByte,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device busy - exclusive lock not obtained within {0:?}")]
    Busy(Duration),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("short read - expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The reply had the right length and checksum but does not fit the fixed
/// field layout of its command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{command}: expected {expected} fields, got {got}")]
    FieldCountMismatch {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("{command}: field {field} has unexpected value {value:?}")]
    TypeMismatch {
        command: &'static str,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{0:?} is not a command that can be sent to the inverter")]
    UnknownCommand(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ExchangeError {
    /// Whether another attempt at the same exchange could plausibly succeed.
    /// Decode errors are protocol drift and will not go away on a retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(TransportError::Open { .. }) => false,
            Self::Transport(_) | Self::Frame(_) => true,
            Self::Decode(_) | Self::UnknownCommand(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {key} has invalid value {value:?}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },

    #[error("line {line}: expected key=value, got {text:?}")]
    Syntax { line: usize, text: String },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}
