use crate::prelude::*;
use crate::commands::{Exchange, ExchangePolicy};

/// An arbitrary command sent once, outside the polling cycle.
///
/// The reply goes straight back to the caller; nothing is stored and nothing
/// is retried, since raw commands are mostly settings changes.
pub struct RawCommand {
    exchange: Exchange,
}

impl RawCommand {
    /// `reply_len` wins if given; otherwise the command table is consulted and
    /// finally the `(ACK`-sized default is used.
    pub fn new(
        table: &CommandTable,
        name: &str,
        reply_len: Option<usize>,
        policy: ExchangePolicy,
    ) -> Result<Self, ExchangeError> {
        let len = table.resolve(name, reply_len);
        if reply_len.is_none() && table.expected_length(name).is_err() {
            warn!("no known reply length for {}, reading {} bytes", name, len);
        }

        let command = Command::new(name, len)?;

        Ok(Self {
            exchange: Exchange::new(command, policy),
        })
    }

    pub fn command(&self) -> &Command {
        self.exchange.command()
    }

    pub async fn run<T>(&self, transport: &mut T) -> Result<Reply, ExchangeError>
    where
        T: Transport + ?Sized,
    {
        info!(
            "sending raw command {} (expecting {} byte reply)",
            self.command(),
            self.command().reply_len()
        );

        self.exchange.once(transport).await
    }
}
