//! Radio access and link-level exchanges
//!
//! This module defines the radio collaborator boundary, the retry engine built
//! on it and the association handshakes.

mod bridge;
mod connection;
mod discovery;

pub use self::bridge::StreamRadio;
pub use self::connection::Transport;
pub use self::discovery::{associate, capture_network_id, Association};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{Error, NetworkId};

/// Largest frame the radio can carry
pub const MAX_PACKET_LEN: usize = 256;

/// Non-zero result code reported by the radio driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("radio error code {0}")]
pub struct RadioError(pub i16);

impl From<RadioError> for Error {
    fn from(err: RadioError) -> Self {
        Error::transport(err.0)
    }
}

/// Half-duplex packet radio
///
/// Implementations wrap the transceiver driver. Reception has to be re-armed
/// with [`Radio::start_receive`] after every transmission and every received
/// frame.
#[async_trait]
pub trait Radio: Send {
    /// Only lets frames of `network` through
    async fn set_network_filter(&mut self, network: NetworkId) -> Result<(), RadioError>;

    /// Sends one frame
    async fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Puts the radio back into receive mode
    async fn start_receive(&mut self) -> Result<(), RadioError>;

    /// Copies the frame whose completion raised the notifier into `buf`,
    /// returning its length; 0 when nothing was received
    ///
    /// Called once per raised notification. Drivers that hold several frames
    /// raise the notifier again while any remain.
    async fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, RadioError>;

    /// Waits up to `timeout` for the next frame
    async fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, RadioError>;

    /// Registers the flag raised on every receive completion
    fn on_receive(&mut self, notifier: ReceiveNotifier);

    /// Gives drivers without interrupts a chance to notice received frames
    async fn poll_events(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Edge-triggered receive-completion flag shared between the radio driver
/// (producer) and the scheduling loop (consumer)
#[derive(Debug, Clone, Default)]
pub struct ReceiveNotifier {
    flag: Arc<AtomicBool>,
}

impl ReceiveNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag; safe to call from a driver callback
    pub fn notify(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
