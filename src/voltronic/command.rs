use crate::config::Config;
use crate::error::ExchangeError;
use crate::voltronic::frame;

use bytes::Bytes;

/// Reply size used when nothing better is known. It is the size of the
/// `(ACK`/`(NAK` answer every setting command gets.
pub const DEFAULT_REPLY_LEN: usize = 7;

pub const MAX_TOKEN_LEN: usize = 32;

// protocol defaults for the lengths that vary between firmware builds
pub const QMOD_REPLY_LEN: usize = 5;
pub const QPIRI_REPLY_LEN: usize = 98;
pub const QPIGS_REPLY_LEN: usize = 110;
pub const QPIWS_REPLY_LEN: usize = 36;

/// A command token together with the number of bytes its reply frame has.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    name: String,
    reply_len: usize,
}

impl Command {
    pub fn new(name: &str, reply_len: usize) -> Result<Self, ExchangeError> {
        if !Self::is_valid_token(name) {
            return Err(ExchangeError::UnknownCommand(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            reply_len,
        })
    }

    // printable ASCII only; spaces and control bytes would corrupt the frame
    fn is_valid_token(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_TOKEN_LEN
            && name.bytes().all(|b| b.is_ascii_graphic())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reply_len(&self) -> usize {
        self.reply_len
    }

    /// Queries only read state, so repeating one is harmless. Anything else
    /// may change inverter settings and must not be sent twice blindly.
    pub fn is_idempotent(&self) -> bool {
        self.name.starts_with('Q')
    }

    pub fn frame(&self) -> Bytes {
        frame::encode(self.name.as_bytes())
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Expected reply lengths, in whole frame bytes (start byte, body, checksum
/// and terminator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTable {
    qmod: usize,
    qpiri: usize,
    qpigs: usize,
    qpiws: usize,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            qmod: QMOD_REPLY_LEN,
            qpiri: QPIRI_REPLY_LEN,
            qpigs: QPIGS_REPLY_LEN,
            qpiws: QPIWS_REPLY_LEN,
        }
    }
}

impl CommandTable {
    pub fn new(config: &Config) -> Self {
        Self {
            qmod: config.qmod(),
            qpiri: config.qpiri(),
            qpigs: config.qpigs(),
            qpiws: config.qpiws(),
        }
    }

    pub fn expected_length(&self, name: &str) -> Result<usize, ExchangeError> {
        let len = match name {
            "QPI" => 8,
            "QID" | "QVFW" => 18,
            "QVFW2" | "QVFW3" | "QVFW4" => 19,
            "QFLAG" => 15,
            "QBOOT" => 5,
            "QOPM" | "QCST" => 6,
            "QCVT" => 7,
            "QPIGS2" => 71,
            "QDI" => 83,
            "QBEQI" => 37,
            "QMOD" => self.qmod,
            "QPIRI" => self.qpiri,
            "QPIGS" => self.qpigs,
            "QPIWS" => self.qpiws,
            // parallel status, one per machine: QPGS0, QPGS1, ...
            n if n.starts_with("QPGS") => 133,
            _ => return Err(ExchangeError::UnknownCommand(name.to_string())),
        };

        Ok(len)
    }

    /// Explicit length, else the table, else [`DEFAULT_REPLY_LEN`].
    pub fn resolve(&self, name: &str, explicit: Option<usize>) -> usize {
        explicit
            .or_else(|| self.expected_length(name).ok())
            .unwrap_or(DEFAULT_REPLY_LEN)
    }

    /// Build a command that must be in the table.
    pub fn command(&self, name: &str) -> Result<Command, ExchangeError> {
        Command::new(name, self.expected_length(name)?)
    }
}
