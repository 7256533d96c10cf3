#![allow(dead_code)]

use voltronic_bridge::prelude::*;
use voltronic_bridge::voltronic::frame;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    pub const QPIGS: &'static str = "(230.0 49.9 230.0 49.9 0460 0402 011 380 54.00 010 085 0035 0010 0350.0 54.00 00000 00010110";
    pub const QPIGS_21: &'static str = "(230.0 49.9 230.0 49.9 0460 0402 011 380 54.00 010 085 0035 0010 0350.0 54.00 00000 00010110 00 00 00540 010";
    pub const QPIRI: &'static str = "(230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 0 30 060 0 2 3 9 01 0 0 54.0";
    pub const QPIRI_25: &'static str = "(230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 0 30 060 0 2 3 9 01 0 0 54.0 0 1";
    pub const QMOD: &'static str = "(L";
    pub const QPIWS: &'static str = "(00000000000000000000000000000000";

    /// A config whose reply lengths match the sample replies.
    pub fn config() -> Config {
        Config {
            device: "/dev/hidraw0".to_string(),
            qpigs: Some(Self::QPIGS.len() + frame::OVERHEAD),
            qpiri: Some(Self::QPIRI.len() + frame::OVERHEAD),
            qmod: Some(Self::QMOD.len() + frame::OVERHEAD),
            qpiws: Some(Self::QPIWS.len() + frame::OVERHEAD),
            poll_interval_ms: Some(10),
            read_timeout_ms: Some(100),
            lock_timeout_ms: Some(100),
            ..Default::default()
        }
    }

    pub fn policy() -> voltronic_bridge::commands::ExchangePolicy {
        voltronic_bridge::commands::ExchangePolicy {
            read_timeout: Duration::from_millis(100),
            lock_timeout: Duration::from_millis(100),
            retries: 2,
            backoff: Duration::ZERO,
        }
    }

    pub fn frame(payload: &str) -> Bytes {
        frame::encode(payload.as_bytes())
    }

    /// Replies for one full cycle, in cycle order.
    pub fn cycle() -> Vec<Result<Bytes, TransportError>> {
        vec![
            Ok(Self::frame(Self::QPIGS)),
            Ok(Self::frame(Self::QPIRI)),
            Ok(Self::frame(Self::QMOD)),
            Ok(Self::frame(Self::QPIWS)),
        ]
    }

    pub fn reply(command: &str, payload: &str) -> Reply {
        Reply::new(command, Bytes::copy_from_slice(payload.as_bytes())).unwrap()
    }
}

/// Scripted stand-in for a device. Each read takes the next scripted
/// response; an empty script reads as a timeout.
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<Result<Bytes, TransportError>>>>,
    writes: Arc<Mutex<Vec<Bytes>>>,
    // fire a shutdown once this many frames have been written
    shutdown_after: Option<(usize, broadcast::Sender<()>)>,
}

impl MockTransport {
    pub fn new(responses: Vec<Result<Bytes, TransportError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            writes: Arc::new(Mutex::new(Vec::new())),
            shutdown_after: None,
        }
    }

    pub fn shutdown_after(mut self, writes: usize, tx: broadcast::Sender<()>) -> Self {
        self.shutdown_after = Some((writes, tx));
        self
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().unwrap().clone()
    }

    /// Commands written so far, without checksum and CR.
    pub fn commands(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(frame::decode(w).unwrap()).into_owned())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn acquire_exclusive(&mut self, _timeout: Duration) -> Result<Lease, TransportError> {
        Ok(Lease::unlocked())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let count = {
            let mut writes = self.writes.lock().unwrap();
            writes.push(Bytes::copy_from_slice(frame));
            writes.len()
        };

        if let Some((after, tx)) = &self.shutdown_after {
            if count == *after {
                let _ = tx.send(());
            }
        }

        Ok(())
    }

    async fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let next = self.responses.lock().unwrap().pop_front();

        match next {
            None => Err(TransportError::Timeout(timeout)),
            Some(Ok(bytes)) if bytes.len() < len => Err(TransportError::ShortRead {
                expected: len,
                got: bytes.len(),
            }),
            Some(Ok(bytes)) => Ok(bytes.slice(..len)),
            Some(Err(e)) => Err(e),
        }
    }
}
