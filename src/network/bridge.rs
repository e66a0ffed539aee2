use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::core::{Error, NetworkId};
use crate::protocol::codec::{BridgeCodec, BridgePacket};
use super::{Radio, RadioError, ReceiveNotifier};

/// Stream I/O failed
pub const IO_ERROR: i16 = -1;
/// The modem closed the stream
pub const STREAM_CLOSED: i16 = -2;
/// The modem sent something unintelligible
pub const BAD_PACKET: i16 = -3;

fn radio_error(err: Error) -> RadioError {
    match err {
        Error::Io(_) => RadioError(IO_ERROR),
        _ => RadioError(BAD_PACKET),
    }
}

/// Radio reached through a modem on a byte stream (serial line, TCP bridge)
pub struct StreamRadio<T> {
    /// Framed modem link
    framed: Framed<T, BridgeCodec>,
    /// Frames received but not handed out yet
    pending: VecDeque<Bytes>,
    /// Raised when a frame is queued
    notifier: Option<ReceiveNotifier>,
}

impl<T> StreamRadio<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T) -> Self {
        StreamRadio {
            framed: Framed::new(io, BridgeCodec::new()),
            pending: VecDeque::new(),
            notifier: None,
        }
    }

    async fn send_packet(&mut self, packet: BridgePacket) -> Result<(), RadioError> {
        self.framed.send(packet).await.map_err(radio_error)
    }

    fn queue(&mut self, frame: Bytes) {
        self.pending.push_back(frame);
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }

    fn handle(&mut self, packet: BridgePacket) -> Result<(), RadioError> {
        match packet {
            BridgePacket::Frame(frame) => {
                self.queue(frame);
                Ok(())
            }
            BridgePacket::Status(0) => Ok(()),
            BridgePacket::Status(code) => Err(RadioError(code)),
            other => {
                warn!(packet = ?other, "unexpected packet from modem");
                Ok(())
            }
        }
    }

    fn pop_into(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.pending.pop_front().map(|frame| {
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            len
        })
    }
}

#[async_trait]
impl<T> Radio for StreamRadio<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn set_network_filter(&mut self, network: NetworkId) -> Result<(), RadioError> {
        self.send_packet(BridgePacket::Filter(network)).await
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.send_packet(BridgePacket::Frame(Bytes::copy_from_slice(frame))).await
    }

    async fn start_receive(&mut self) -> Result<(), RadioError> {
        self.send_packet(BridgePacket::Listen).await
    }

    async fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        self.poll_events().await?;
        let len = self.pop_into(buf).unwrap_or(0);
        if !self.pending.is_empty() {
            if let Some(notifier) = &self.notifier {
                notifier.notify();
            }
        }
        Ok(len)
    }

    async fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, RadioError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(len) = self.pop_into(buf) {
                return Ok(Some(len));
            }

            match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(RadioError(STREAM_CLOSED)),
                Ok(Some(Err(err))) => return Err(radio_error(err)),
                Ok(Some(Ok(packet))) => self.handle(packet)?,
            }
        }
    }

    fn on_receive(&mut self, notifier: ReceiveNotifier) {
        self.notifier = Some(notifier);
    }

    async fn poll_events(&mut self) -> Result<(), RadioError> {
        while let Some(next) = self.framed.next().now_or_never() {
            match next {
                None => return Err(RadioError(STREAM_CLOSED)),
                Some(Err(err)) => return Err(radio_error(err)),
                Some(Ok(packet)) => self.handle(packet)?,
            }
        }
        debug!(pending = self.pending.len(), "modem polled");
        Ok(())
    }
}
