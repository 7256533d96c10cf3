use crate::prelude::*;

/// Timeouts and retry budget for exchanges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangePolicy {
    pub read_timeout: Duration,
    pub lock_timeout: Duration,
    /// extra attempts after the first, for idempotent commands only
    pub retries: u32,
    /// pause before retry n is `backoff * n`
    pub backoff: Duration,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(config::DEFAULT_READ_TIMEOUT_MS),
            lock_timeout: Duration::from_millis(config::DEFAULT_LOCK_TIMEOUT_MS),
            retries: config::DEFAULT_RETRIES,
            backoff: Duration::from_millis(250),
        }
    }
}

impl ExchangePolicy {
    pub fn new(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            lock_timeout: config.lock_timeout(),
            retries: config.retries(),
            ..Default::default()
        }
    }
}

/// One command/reply round trip over a [`Transport`].
pub struct Exchange {
    command: Command,
    policy: ExchangePolicy,
}

impl Exchange {
    pub fn new(command: Command, policy: ExchangePolicy) -> Self {
        Self { command, policy }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// A single attempt. The device lock is held from before the write until
    /// the reply is read (or the attempt fails).
    pub async fn once<T>(&self, transport: &mut T) -> Result<Reply, ExchangeError>
    where
        T: Transport + ?Sized,
    {
        let _lease = transport.acquire_exclusive(self.policy.lock_timeout).await?;

        transport.write_frame(&self.command.frame()).await?;
        let frame = transport
            .read_exact(self.command.reply_len(), self.policy.read_timeout)
            .await?;

        let reply = Reply::from_frame(&self.command, frame)?;
        debug!("{}: {} bytes read: {}", self.command, self.command.reply_len(), reply);

        Ok(reply)
    }

    /// Attempt, retrying transient failures when the command is safe to
    /// repeat. Non-query commands get exactly one attempt since a lost reply
    /// does not tell us whether the inverter acted on them.
    pub async fn run<T>(&self, transport: &mut T) -> Result<Reply, ExchangeError>
    where
        T: Transport + ?Sized,
    {
        let attempts = if self.command.is_idempotent() {
            self.policy.retries + 1
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.once(transport).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!("{}: attempt {}/{} failed: {}", self.command, attempt, attempts, e);
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
