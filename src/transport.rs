//! # Byte Transport
//!
//! [`MqttTransport`] is the byte stream [`crate::client::MqttClient`] speaks
//! MQTT over. [`TcpTransport`] implements it on an embassy-net socket; a TLS
//! stream or a UART modem can implement it the same way.

use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

/// A trait representing a byte-stream transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    type Error: core::fmt::Debug;

    /// Writes the whole buffer.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Reads whatever is available into `buf`, waiting for at least one byte.
    ///
    /// Returns the number of bytes read. Zero means the peer closed the stream.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Errors produced by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpTransportError {
    /// The socket reported an error.
    Socket(TcpError),
    /// A write did not complete within the configured timeout.
    Timeout,
}

/// MQTT over an already connected embassy-net TCP socket.
///
/// Reads are unbounded: the MQTT client detects a dead broker through its
/// keep-alive ping. Writes are bounded by `timeout`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given (already connected) socket
    /// and write timeout.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// Gives the socket back, e.g. to close it or reconnect it.
    pub fn into_socket(self) -> TcpSocket<'a> {
        self.socket
    }

    async fn write_with_timeout(&mut self, buf: &[u8]) -> Result<(), TcpTransportError> {
        let timer = Timer::after(self.timeout);
        let socket = &mut self.socket;
        let write_fut = async move {
            socket.write_all(buf).await?;
            socket.flush().await
        };

        match futures::future::select(core::pin::pin!(write_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(()), _)) => Ok(()),
            futures::future::Either::Left((Err(e), _)) => {
                error!("TCP write error: {:?}", e);
                Err(TcpTransportError::Socket(e))
            }
            futures::future::Either::Right(((), _)) => {
                error!("TCP write timeout");
                Err(TcpTransportError::Timeout)
            }
        }
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX {} bytes", buf.len());
        self.write_with_timeout(buf).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = embedded_io_async::Read::read(&mut self.socket, buf)
            .await
            .map_err(TcpTransportError::Socket)?;
        if n == 0 {
            debug!("TCP connection closed by peer");
        } else {
            trace!("TCP RX {} bytes", n);
        }
        Ok(n)
    }
}
