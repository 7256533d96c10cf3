pub use anyhow::{anyhow, bail, Context, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::time::Duration;
pub use tokio::sync::{broadcast, watch};

pub use crate::config::{self, Config};
pub use crate::error::{ConfigError, DecodeError, ExchangeError, FrameError, TransportError};
pub use crate::options::Options;
pub use crate::snapshot::{SnapshotReader, SnapshotStore, Tracked};
pub use crate::voltronic::{
    self,
    command::{Command, CommandTable},
    reply::Reply,
    transport::{Lease, Transport},
};
