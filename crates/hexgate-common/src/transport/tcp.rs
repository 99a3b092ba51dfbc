use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{GatewayError, Result};

/// Maximum frame size accepted in either direction (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Default timeout for establishing the engine connection (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to the engine.
///
/// The address may resolve to several socket addresses; each is tried in
/// turn until one accepts. The whole attempt is bounded by `timeout`.
///
/// # Errors
///
/// Returns [`GatewayError::Connection`] if the address does not resolve,
/// every address refuses, or the timeout elapses.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, connect_any(addr)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Connection(format!(
            "Timed out connecting to {} after {}ms",
            addr,
            timeout.as_millis()
        ))),
    }
}

async fn connect_any(addr: &str) -> Result<TcpStream> {
    let socket_addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| GatewayError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

    let mut last_err = None;
    for socket_addr in socket_addrs {
        match TcpStream::connect(socket_addr).await {
            Ok(stream) => {
                // Frames are small and latency-bound.
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(addr = %socket_addr, error = %e, "Engine address refused connection");
                last_err = Some(e);
            }
        }
    }

    Err(GatewayError::Connection(format!(
        "Failed to connect to {}: {}",
        addr,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".to_string())
    )))
}

/// Reads length-prefixed frames.
///
/// Wire format: `[4-byte length as u32 big-endian] + [data]`
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between
    /// frames.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The stream ends in the middle of a frame
    /// - The frame exceeds [`MAX_MESSAGE_SIZE`]
    /// - Any other read fails
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(map_io_error(e, "reading length prefix")),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(GatewayError::InvalidMessage(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(Some(buf))
    }
}

/// Writes length-prefixed frames.
///
/// Wire format: `[4-byte length as u32 big-endian] + [data]`
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one frame and flushes it.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(GatewayError::InvalidMessage(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len = data.len() as u32;

        self.inner
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        self.inner
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        self.inner
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Shuts down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| map_io_error(e, "shutting down stream"))
    }
}

/// Map IO errors to appropriate GatewayError variants
///
/// - Reset/aborted/broken pipe -> `ConnectionLost`
/// - Other IO errors -> `Io`
fn map_io_error(err: std::io::Error, context: &str) -> GatewayError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            GatewayError::ConnectionLost(format!("{}: {}", context, err))
        }
        _ => GatewayError::Io(err),
    }
}
