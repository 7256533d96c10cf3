use crate::prelude::*;
use crate::voltronic::telemetry::{Mode, Operational, Ratings, ScaleFactors, Telemetry, Warnings};

use std::sync::Arc;

/// The replies the poller keeps fresh, in the order a cycle asks for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tracked {
    Operational,
    Ratings,
    Mode,
    Warnings,
}

impl Tracked {
    pub const ALL: [Tracked; 4] = [
        Tracked::Operational,
        Tracked::Ratings,
        Tracked::Mode,
        Tracked::Warnings,
    ];

    pub fn command(self) -> &'static str {
        match self {
            Self::Operational => Operational::COMMAND,
            Self::Ratings => Ratings::COMMAND,
            Self::Mode => Mode::COMMAND,
            Self::Warnings => Warnings::COMMAND,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn decode(self, reply: &Reply) -> Result<Decoded, DecodeError> {
        Ok(match self {
            Self::Operational => Decoded::Operational(Operational::decode(reply)?),
            Self::Ratings => Decoded::Ratings(Ratings::decode(reply)?),
            Self::Mode => Decoded::Mode(Mode::decode(reply)?),
            Self::Warnings => Decoded::Warnings(Warnings::decode(reply)?),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Operational(Operational),
    Ratings(Ratings),
    Mode(Mode),
    Warnings(Warnings),
}

/// One published reply. Never modified after it is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub reply: Reply,
    pub decoded: Decoded,
    /// bumps by one each time this command is published
    pub version: u64,
    /// poller cycle the reply was read in
    pub cycle: u64,
}

/// Latest entry per tracked command.
#[derive(Clone, Debug, Default)]
pub struct Snapshots {
    entries: [Option<Arc<Entry>>; 4],
    cycle: u64,
}

impl Snapshots {
    pub fn get(&self, tracked: Tracked) -> Option<&Entry> {
        self.entries[tracked.index()].as_deref()
    }

    pub fn version(&self, tracked: Tracked) -> u64 {
        self.get(tracked).map(|e| e.version).unwrap_or(0)
    }

    /// Last cycle that was committed, successful or not.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn operational(&self) -> Option<&Operational> {
        match self.get(Tracked::Operational).map(|e| &e.decoded) {
            Some(Decoded::Operational(v)) => Some(v),
            _ => None,
        }
    }

    pub fn ratings(&self) -> Option<&Ratings> {
        match self.get(Tracked::Ratings).map(|e| &e.decoded) {
            Some(Decoded::Ratings(v)) => Some(v),
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.get(Tracked::Mode).map(|e| &e.decoded) {
            Some(Decoded::Mode(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn warnings(&self) -> Option<&Warnings> {
        match self.get(Tracked::Warnings).map(|e| &e.decoded) {
            Some(Decoded::Warnings(v)) => Some(v),
            _ => None,
        }
    }

    /// The output record, once every tracked command has been read at least
    /// once.
    pub fn telemetry(&self, factors: ScaleFactors) -> Option<Telemetry> {
        Some(Telemetry::new(
            self.mode()?,
            self.operational()?,
            self.ratings()?,
            self.warnings()?,
            factors,
        ))
    }
}

/// Single-writer store of the latest decoded replies.
///
/// The poller commits a whole cycle in one update so readers woken by the
/// commit never see half a cycle. Commands that failed keep their previous
/// entry.
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Snapshots>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshots::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, cycle: u64, results: Vec<(Tracked, Reply, Decoded)>) {
        self.tx.send_modify(|snapshots| {
            for (tracked, reply, decoded) in results {
                let version = snapshots.version(tracked) + 1;
                debug!("publishing {} v{} from cycle {}", tracked.command(), version, cycle);
                snapshots.entries[tracked.index()] = Some(Arc::new(Entry {
                    reply,
                    decoded,
                    version,
                    cycle,
                }));
            }
            snapshots.cycle = cycle;
        });
    }

    pub fn latest(&self) -> Snapshots {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.tx.subscribe(),
            consumed: [0; 4],
        }
    }
}

/// A consumer's view of the store, remembering what it has already seen.
pub struct SnapshotReader {
    rx: watch::Receiver<Snapshots>,
    consumed: [u64; 4],
}

impl SnapshotReader {
    /// Whether `tracked` was published since this reader last consumed it.
    pub fn changed(&self, tracked: Tracked) -> bool {
        self.rx.borrow().version(tracked) > self.consumed[tracked.index()]
    }

    /// Wait until every command in `required` has a newer entry than this
    /// reader last consumed, then consume everything currently stored.
    ///
    /// Returns `None` once the store is gone and nothing more can arrive.
    pub async fn wait_for(&mut self, required: &[Tracked]) -> Option<Snapshots> {
        loop {
            let consumed = self.consumed;
            let ready = {
                let snapshots = self.rx.borrow_and_update();
                let fresh = required
                    .iter()
                    .all(|t| snapshots.version(*t) > consumed[t.index()]);
                fresh.then(|| snapshots.clone())
            };

            if let Some(snapshots) = ready {
                for tracked in Tracked::ALL {
                    self.consumed[tracked.index()] = snapshots.version(tracked);
                }
                return Some(snapshots);
            }

            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}
