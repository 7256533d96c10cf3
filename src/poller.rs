use crate::prelude::*;
use crate::commands::{Exchange, ExchangePolicy};
use crate::snapshot::Decoded;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Outcome of one cycle, per tracked command.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub results: Vec<(Tracked, Result<(), ExchangeError>)>,
}

impl CycleReport {
    /// Every tracked command was read and decoded.
    pub fn is_complete(&self) -> bool {
        self.results.len() == Tracked::ALL.len() && self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = (Tracked, &ExchangeError)> {
        self.results
            .iter()
            .filter_map(|(t, r)| r.as_ref().err().map(|e| (*t, e)))
    }
}

/// Background polling of the tracked commands into a [`SnapshotStore`].
///
/// Exchanges within a cycle run back to back; `interval` is the pause between
/// cycles. Shutdown is only looked at between exchanges so the serial line is
/// never left halfway through a reply.
pub struct Poller {
    table: CommandTable,
    policy: ExchangePolicy,
    interval: Duration,
    store: SnapshotStore,
    state: State,
    cycle: u64,
}

impl Poller {
    pub fn new(config: &Config, store: SnapshotStore) -> Self {
        Self {
            table: CommandTable::new(config),
            policy: ExchangePolicy::new(config),
            interval: config.poll_interval(),
            store,
            state: State::Idle,
            cycle: 0,
        }
    }

    pub fn with_policy(mut self, policy: ExchangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("poller: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Poll until `shutdown` fires (or its sender goes away). The transport
    /// is dropped, and with it the device, when this returns.
    pub async fn run<T: Transport>(&mut self, mut transport: T, mut shutdown: broadcast::Receiver<()>) {
        info!("poller starting, {:?} between cycles", self.interval);
        self.set_state(State::Running);

        loop {
            self.cycle(&mut transport, &mut shutdown).await;
            if self.state == State::Draining {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => self.set_state(State::Draining),
            }
            if self.state == State::Draining {
                break;
            }
        }

        drop(transport);
        self.set_state(State::Stopped);
        info!("poller stopped after {} cycles", self.cycle);
    }

    /// Exactly one cycle, then stop.
    pub async fn run_once<T: Transport>(&mut self, mut transport: T) -> CycleReport {
        // nothing can cancel a single cycle
        let (_tx, mut shutdown) = broadcast::channel(1);

        self.set_state(State::Running);
        let report = self.cycle(&mut transport, &mut shutdown).await;

        drop(transport);
        self.set_state(State::Stopped);
        report
    }

    async fn cycle<T: Transport>(
        &mut self,
        transport: &mut T,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;
        let mut results = Vec::with_capacity(Tracked::ALL.len());
        let mut published = Vec::with_capacity(Tracked::ALL.len());

        for tracked in Tracked::ALL {
            if Self::shutdown_requested(shutdown) {
                info!("poller: shutdown requested, draining cycle {}", cycle);
                self.set_state(State::Draining);
                break;
            }

            match self.poll(transport, tracked).await {
                Ok((reply, decoded)) => {
                    published.push((tracked, reply, decoded));
                    results.push((tracked, Ok(())));
                }
                Err(e) => {
                    warn!("cycle {}: {} failed, keeping previous value: {}", cycle, tracked.command(), e);
                    results.push((tracked, Err(e)));
                }
            }
        }

        self.store.publish(cycle, published);

        CycleReport { cycle, results }
    }

    async fn poll<T: Transport>(&self, transport: &mut T, tracked: Tracked) -> Result<(Reply, Decoded), ExchangeError> {
        let command = self.table.command(tracked.command())?;
        let reply = Exchange::new(command, self.policy).run(transport).await?;
        let decoded = tracked.decode(&reply)?;

        Ok((reply, decoded))
    }

    fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
        match shutdown.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => false,
            // a message, a closed channel or a lagged one all mean stop
            _ => true,
        }
    }
}
