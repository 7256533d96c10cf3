use crate::prelude::*;

use {
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    fs2::FileExt,
    std::io::{Read, Write},
    std::os::unix::fs::OpenOptionsExt,
    std::pin::Pin,
    std::task::{ready, Context, Poll},
    tokio::io::unix::AsyncFd,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    tokio::time::Instant,
};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Low-speed USB HID devices take at most 8 bytes per report.
pub const HID_REPORT_LEN: usize = 8;
const CHUNK_PAUSE: Duration = Duration::from_millis(50);

// Transport {{{
/// Half-duplex byte link to the inverter.
///
/// One exchange is `acquire_exclusive`, `write_frame`, `read_exact`, then the
/// [`Lease`] is dropped.
#[async_trait]
pub trait Transport: Send {
    async fn acquire_exclusive(&mut self, timeout: Duration) -> Result<Lease, TransportError>;

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Exactly `len` bytes, or `Timeout` if nothing arrived and `ShortRead`
    /// if only part of it did.
    async fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Bytes, TransportError>;
}

// Lease {{{
/// Proof of the advisory device lock; unlocks when dropped.
#[derive(Debug)]
pub struct Lease {
    file: Option<std::fs::File>,
}

impl Lease {
    fn locked(file: std::fs::File) -> Self {
        Self { file: Some(file) }
    }

    /// A lease over nothing, for links that need no locking.
    pub fn unlocked() -> Self {
        Self { file: None }
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                warn!("failed to release device lock: {}", e);
            }
        }
    }
} // }}}

// Device {{{
trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceStream for T {}

/// A real device node: a tty at a fixed baud rate, or anything else (usually
/// `/dev/hidrawN`) as a non-blocking file polled by the reactor.
pub struct Device {
    path: String,
    stream: Box<dyn DeviceStream>,
    // separate handle so the lock can be taken and released per exchange
    lock: std::fs::File,
}

impl Device {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        use tokio_serial::SerialPortBuilderExt;

        let open_error = |source: std::io::Error| TransportError::Open {
            path: path.to_string(),
            source,
        };

        let lock = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(open_error)?;

        let stream: Box<dyn DeviceStream> = if Self::is_serial_line(path) {
            info!("opening {} as a serial line at {} baud", path, baud_rate);
            let mut port = tokio_serial::new(path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .open_native_async()
                .map_err(|e| open_error(e.into()))?;
            // TIOCEXCL would lock out a one-shot raw invocation for as long
            // as a poller runs; the advisory lease does the arbitration.
            port.set_exclusive(false).map_err(|e| open_error(e.into()))?;
            Box::new(port)
        } else {
            info!("opening {} as a device file", path);
            match PollStream::new(lock.try_clone().map_err(open_error)?) {
                Ok(stream) => Box::new(stream),
                // epoll refuses regular files, which never block anyway
                Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
                    debug!("{} cannot be polled, using plain file I/O", path);
                    let file = lock.try_clone().map_err(open_error)?;
                    Box::new(tokio::fs::File::from_std(file))
                }
                Err(e) => return Err(open_error(e)),
            }
        };

        Ok(Self {
            path: path.to_string(),
            stream,
            lock,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn is_serial_line(path: &str) -> bool {
        std::path::Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("tty"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transport for Device {
    async fn acquire_exclusive(&mut self, timeout: Duration) -> Result<Lease, TransportError> {
        let deadline = Instant::now() + timeout;
        let contended = fs2::lock_contended_error().raw_os_error();

        loop {
            let file = self.lock.try_clone()?;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Lease::locked(file)),
                Err(e) if e.raw_os_error() == contended => {
                    trace!("{}: lock held elsewhere, retrying", self.path);
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() + LOCK_RETRY_INTERVAL > deadline {
                return Err(TransportError::Busy(timeout));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        debug!("{}: TX {:?}", self.path, Bytes::copy_from_slice(frame));

        match tokio::time::timeout(WRITE_TIMEOUT, write_chunked(&mut self.stream, frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(WRITE_TIMEOUT)),
        }
    }

    async fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let bytes = read_exact_within(&mut self.stream, len, timeout).await?;
        debug!("{}: RX {:?}", self.path, bytes);
        Ok(bytes)
    }
} // }}}

// PollStream {{{
/// A non-blocking device node driven by the reactor.
///
/// Dropping a pending read leaves nothing behind, so a read that timed out
/// never holds up the next write. `tokio::fs::File` would park the read on a
/// blocking thread until the inverter next sends something.
struct PollStream {
    fd: AsyncFd<std::fs::File>,
}

impl PollStream {
    fn new(file: std::fs::File) -> std::io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for PollStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for PollStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
} // }}}

/// Write `frame` in HID-report sized pieces, pausing between them.
pub async fn write_chunked<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut chunks = frame.chunks(HID_REPORT_LEN).peekable();

    while let Some(chunk) = chunks.next() {
        writer.write_all(chunk).await?;
        writer.flush().await?;
        if chunks.peek().is_some() {
            tokio::time::sleep(CHUNK_PAUSE).await;
        }
    }

    Ok(())
}

/// Read exactly `len` bytes before `timeout` elapses.
///
/// Never reads past `len`: HID reports are zero padded after the terminator
/// and that padding must not leak into the next exchange.
pub async fn read_exact_within<R>(
    reader: &mut R,
    len: usize,
    timeout: Duration,
) -> Result<Bytes, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut buf = BytesMut::with_capacity(len);
    let mut chunk = [0u8; 64];

    while buf.len() < len {
        let want = (len - buf.len()).min(chunk.len());

        match tokio::time::timeout_at(deadline, reader.read(&mut chunk[..want])).await {
            Ok(Ok(0)) => {
                return Err(TransportError::ShortRead {
                    expected: len,
                    got: buf.len(),
                })
            }
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) if buf.is_empty() => return Err(TransportError::Timeout(timeout)),
            Err(_) => {
                return Err(TransportError::ShortRead {
                    expected: len,
                    got: buf.len(),
                })
            }
        }
    }

    Ok(buf.freeze())
}
