use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace, warn};

use crate::core::{Error, NetworkId, Result, RetryPolicy};
use crate::protocol::frame::{Frame, Header, Region};
use crate::util::hex_dump;
use super::{Radio, MAX_PACKET_LEN};

/// Retry engine turning logical exchanges into radio transmissions
///
/// The header of an exchange, hence its sequence number, is built by the
/// caller once and reused by every attempt.
pub struct Transport<R> {
    /// Radio collaborator
    radio: R,
    /// Attempt bounds and timeouts
    policy: RetryPolicy,
    /// Network filter currently applied to the radio
    network: NetworkId,
}

impl<R: Radio> Transport<R> {
    /// Creates a transport; the radio filter is applied by `set_network_filter`
    pub fn new(radio: R, policy: RetryPolicy) -> Self {
        Transport {
            radio,
            policy,
            network: NetworkId::BROADCAST,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Network filter last applied
    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Applies a network filter and re-arms reception
    pub async fn set_network_filter(&mut self, network: NetworkId) -> Result<()> {
        self.radio.set_network_filter(network).await?;
        self.network = network;
        debug!(network = %network, "network filter applied");
        self.start_receive().await
    }

    /// Puts the radio back into receive mode
    pub async fn start_receive(&mut self) -> Result<()> {
        self.radio.start_receive().await.map_err(Error::from)
    }

    /// Memory write: transmits an Init frame and waits for the boiler's reply
    pub async fn write(
        &mut self,
        header: Header,
        target: Region,
        echo: Region,
        payload: &[u8],
    ) -> Result<Frame> {
        let frame = Frame::write(header, target, echo, payload.to_vec());
        let attempts = self.policy.write_attempts;
        let timeout = self.policy.response_timeout;
        self.exchange(&frame, attempts, timeout).await
    }

    /// Memory read: transmits a Read request and waits for the reply
    pub async fn read(&mut self, header: Header, region: Region) -> Result<Frame> {
        let frame = Frame::read_request(header, region);
        let attempts = self.policy.read_attempts;
        let timeout = self.policy.response_timeout;
        self.exchange(&frame, attempts, timeout).await
    }

    /// Answers `request`: peers swapped, same sequence and kind, ack flag set
    pub async fn acknowledge(&mut self, request: &Header, payload: &[u8]) -> Result<()> {
        let frame = Frame::data(request.reply(), payload.to_vec());
        let attempts = self.policy.ack_attempts;
        self.send(&frame, attempts).await
    }

    /// Transmits `frame` and waits `timeout` per attempt for its reply
    pub async fn exchange(&mut self, frame: &Frame, attempts: u8, timeout: Duration) -> Result<Frame> {
        let bytes = frame.encode()?;
        let mut last_error = Error::timeout(format!("no reply to {}", frame.header));

        for attempt in 1..=attempts.max(1) {
            if attempt > 1 {
                sleep(self.policy.backoff).await;
            }

            match self.attempt(&bytes, &frame.header, timeout).await {
                Ok(reply) => {
                    // The peer already acted on the request, keep its reply
                    if let Err(err) = self.start_receive().await {
                        warn!(seq = frame.header.sequence, error = %err, "re-arm after reply failed");
                    }
                    return Ok(reply);
                }
                Err(err) => {
                    warn!(seq = frame.header.sequence, attempt, error = %err, "exchange attempt failed");
                    last_error = err;
                }
            }
        }

        if let Err(err) = self.start_receive().await {
            warn!(error = %err, "re-arm after failed exchange failed");
        }
        Err(last_error)
    }

    async fn attempt(&mut self, bytes: &[u8], request: &Header, timeout: Duration) -> Result<Frame> {
        debug!(frame = %hex_dump(bytes), "tx");
        self.radio.transmit(bytes).await?;
        self.radio.start_receive().await?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_PACKET_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!("no reply to {}", request)));
            }

            let len = match self.radio.receive(&mut buf, remaining).await? {
                Some(len) => len.min(buf.len()),
                None => return Err(Error::timeout(format!("no reply to {}", request))),
            };
            debug!(frame = %hex_dump(&buf[..len]), "rx");

            match Frame::decode(&buf[..len]) {
                Ok(reply) if reply.header.answers(request) => return Ok(reply),
                Ok(other) => trace!(header = %other.header, "dropping uncorrelated frame"),
                Err(err) => trace!(error = %err, "dropping undecodable frame"),
            }
            self.radio.start_receive().await?;
        }
    }

    /// Transmit-only exchange, re-arms reception afterwards
    pub async fn send(&mut self, frame: &Frame, attempts: u8) -> Result<()> {
        let bytes = frame.encode()?;
        let mut result = Ok(());

        for attempt in 1..=attempts.max(1) {
            if attempt > 1 {
                sleep(self.policy.backoff).await;
            }
            debug!(frame = %hex_dump(&bytes), "tx");
            match self.radio.transmit(&bytes).await {
                Ok(()) => {
                    result = Ok(());
                    break;
                }
                Err(err) => {
                    warn!(seq = frame.header.sequence, attempt, error = %err, "transmission failed");
                    result = Err(Error::from(err));
                }
            }
        }

        self.start_receive().await?;
        result
    }

    /// Sends raw bytes once, for diagnostics
    pub async fn transmit_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!(frame = %hex_dump(bytes), "tx raw");
        let result = self.radio.transmit(bytes).await.map_err(Error::from);
        self.start_receive().await?;
        result
    }

    /// Receives until a frame satisfies `accept` or `deadline` passes
    pub async fn listen<F>(&mut self, deadline: Instant, mut accept: F) -> Result<Frame>
    where
        F: FnMut(&Frame) -> bool + Send,
    {
        self.start_receive().await?;
        let mut buf = [0u8; MAX_PACKET_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout("listen deadline passed"));
            }

            let received = self.radio.receive(&mut buf, remaining).await?;
            let Some(len) = received else { continue };
            let len = len.min(buf.len());
            debug!(frame = %hex_dump(&buf[..len]), "rx");
            self.radio.start_receive().await?;

            match Frame::decode(&buf[..len]) {
                Ok(frame) if accept(&frame) => return Ok(frame),
                Ok(frame) => trace!(header = %frame.header, "ignoring frame"),
                Err(err) => trace!(error = %err, "ignoring undecodable frame"),
            }
        }
    }

    /// Fetches the frame signalled by the receive notification and re-arms
    pub async fn read_received(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        let result = self.radio.read_received(&mut buf).await;
        self.start_receive().await?;

        let len = result?.min(buf.len());
        if len == 0 {
            return Ok(None);
        }
        debug!(frame = %hex_dump(&buf[..len]), "rx");
        Ok(Some(buf[..len].to_vec()))
    }
}
