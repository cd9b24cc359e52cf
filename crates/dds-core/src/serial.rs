//! Serial port abstractions for driver crates.
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`SharedPort`]: port behind an async mutex with buffered line reads
//! - [`open_serial_async`]: open a port with spawn_blocking (`serial` feature)
//! - [`read_reply`]: read one newline-terminated reply with a timeout

use crate::error::{DdsError, DdsResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
///
/// Covers `tokio_serial::SerialStream` for hardware and
/// `tokio::io::DuplexStream` for tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between tasks, buffered for `read_line()`.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. Failure is reported
/// as [`DdsError::Connection`].
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                DdsError::Connection(format!(
                    "failed to open {} serial port {}: {}",
                    device_name_owned, port_path_owned, e
                ))
            })
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
    .map_err(Into::into)
}

/// Read one newline-terminated reply.
///
/// Trailing whitespace is stripped. A closed port or a non-UTF-8 reply is a
/// [`DdsError::Protocol`], an elapsed timeout a [`DdsError::Timeout`].
pub async fn read_reply<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
    command: &str,
) -> DdsResult<String> {
    let mut raw = Vec::new();
    let n = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut raw))
        .await
        .map_err(|_| DdsError::Timeout {
            command: command.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

    if n == 0 {
        return Err(DdsError::Protocol(format!(
            "port closed while waiting for reply to '{}'",
            command
        )));
    }

    let line = String::from_utf8(raw).map_err(|_| {
        DdsError::Protocol(format!("non-UTF-8 reply to '{}'", command))
    })?;
    let reply = line.trim_end().to_string();
    tracing::trace!(command, reply = %reply, "serial reply");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_reply_strips_line_ending() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        host.write_all(b"coherentDds v2\r\n").await.unwrap();

        let mut guard = port.lock().await;
        let reply = read_reply(&mut *guard, Duration::from_millis(100), "idn?")
            .await
            .unwrap();
        assert_eq!(reply, "coherentDds v2");
    }

    #[tokio::test]
    async fn test_read_reply_times_out() {
        let (_host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        let mut guard = port.lock().await;
        let err = read_reply(&mut *guard, Duration::from_millis(20), "idn?")
            .await
            .unwrap_err();
        assert!(matches!(err, DdsError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_read_reply_reports_closed_port() {
        let (host, device) = tokio::io::duplex(64);
        drop(host);
        let port = wrap_shared(Box::new(device));

        let mut guard = port.lock().await;
        let err = read_reply(&mut *guard, Duration::from_millis(100), "idn?")
            .await
            .unwrap_err();
        assert!(matches!(err, DdsError::Protocol(_)));
    }
}
