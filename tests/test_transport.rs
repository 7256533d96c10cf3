mod common;
use common::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use voltronic_bridge::prelude::*;
use voltronic_bridge::voltronic::transport::{
    read_exact_within, write_chunked, Device, HID_REPORT_LEN,
};

fn make_fifo(dir: &tempfile::TempDir, name: &str) -> Result<String> {
    let path = dir.path().join(name);
    let c_path = std::ffi::CString::new(path.to_str().unwrap())?;
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        bail!("mkfifo: {}", std::io::Error::last_os_error());
    }
    Ok(path.to_str().unwrap().to_string())
}

#[tokio::test]
async fn reads_exactly_the_requested_length() -> Result<()> {
    common_setup();

    let (mut device, mut host) = tokio::io::duplex(64);
    // HID reports arrive zero padded after the CR
    device.write_all(b"(L\x06\x07\r\0\0\0").await?;

    let frame = read_exact_within(&mut host, 5, Duration::from_millis(200)).await?;
    assert_eq!(&frame[..], b"(L\x06\x07\r");

    // the padding is still there for whoever reads next
    let mut rest = [0u8; 3];
    host.read_exact(&mut rest).await?;
    assert_eq!(rest, [0, 0, 0]);

    Ok(())
}

#[tokio::test]
async fn assembles_a_reply_from_several_writes() -> Result<()> {
    let (mut device, mut host) = tokio::io::duplex(64);

    let writer = tokio::spawn(async move {
        for piece in [&b"(PI"[..], b"30", b"\x9a\x0b\r"] {
            device.write_all(piece).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        device
    });

    let frame = read_exact_within(&mut host, 8, Duration::from_secs(1)).await?;
    assert_eq!(&frame[..], b"(PI30\x9a\x0b\r");
    writer.await?;

    Ok(())
}

#[tokio::test]
async fn silence_is_a_timeout() {
    let (_device, mut host) = tokio::io::duplex(64);

    let result = read_exact_within(&mut host, 5, Duration::from_millis(50)).await;
    assert!(matches!(result, Err(TransportError::Timeout(_))));
}

#[tokio::test]
async fn partial_reply_is_a_short_read() -> Result<()> {
    let (mut device, mut host) = tokio::io::duplex(64);
    device.write_all(b"(PI").await?;

    let result = read_exact_within(&mut host, 8, Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(TransportError::ShortRead { expected: 8, got: 3 })
    ));

    Ok(())
}

#[tokio::test]
async fn closed_device_is_a_short_read() -> Result<()> {
    let (mut device, mut host) = tokio::io::duplex(64);
    device.write_all(b"(P").await?;
    drop(device);

    let result = read_exact_within(&mut host, 8, Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(TransportError::ShortRead { expected: 8, got: 2 })
    ));

    Ok(())
}

#[tokio::test]
async fn writes_in_report_sized_chunks() -> Result<()> {
    let (mut host, mut device) = tokio::io::duplex(64);
    let frame = b"QPIGS\xb7\xa9\rPOP02\xe2\x0b\r";

    write_chunked(&mut host, frame).await?;
    drop(host);

    let mut received = Vec::new();
    device.read_to_end(&mut received).await?;
    assert_eq!(received, frame);
    assert!(frame.len() > HID_REPORT_LEN);

    Ok(())
}

#[tokio::test]
async fn device_recovers_from_a_read_timeout() -> Result<()> {
    common_setup();

    let dir = tempfile::tempdir()?;
    let path = make_fifo(&dir, "hidraw9")?;
    let mut device = Device::open(&path, 2400)?;

    // nothing has been sent, so nothing comes back
    let result = device.read_exact(5, Duration::from_millis(100)).await;
    assert!(matches!(result, Err(TransportError::Timeout(_))));

    // the abandoned read must not hold up the next exchange
    let frame = b"QPIGS\xb7\xa9\r";
    tokio::time::timeout(Duration::from_secs(1), device.write_frame(frame)).await??;

    // the fifo loops our own write back
    let echoed = device.read_exact(frame.len(), Duration::from_secs(1)).await?;
    assert_eq!(&echoed[..], frame);

    Ok(())
}

#[tokio::test]
async fn lease_excludes_other_openers() -> Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let path = file.path().to_str().unwrap();

    let mut first = Device::open(path, 2400)?;
    let mut second = Device::open(path, 2400)?;

    let lease = first.acquire_exclusive(Duration::from_millis(100)).await?;
    assert!(lease.is_locked());

    let started = tokio::time::Instant::now();
    let result = second.acquire_exclusive(Duration::from_millis(300)).await;
    assert!(matches!(result, Err(TransportError::Busy(_))));
    assert!(started.elapsed() < Duration::from_secs(2));

    drop(lease);
    let lease = second.acquire_exclusive(Duration::from_millis(300)).await?;
    assert!(lease.is_locked());

    Ok(())
}
