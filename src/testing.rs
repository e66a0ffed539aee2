//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tokio::time::Instant;

use crate::core::{GatewayConfig, NetworkId, Zones};
use crate::device::RoleContext;
use crate::hooks::{MemoryStore, Publisher, Telemetry};
use crate::network::{Radio, RadioError, ReceiveNotifier, Transport};
use crate::protocol::frame::Frame;

type Responder = Box<dyn FnMut(&Frame) -> Option<Frame> + Send>;

#[derive(Default)]
struct Shared {
    transmitted: Vec<Vec<u8>>,
    attempts: usize,
    rearms: usize,
    filters: Vec<NetworkId>,
    inbox: VecDeque<Vec<u8>>,
    failure: Option<i16>,
    notifier: Option<ReceiveNotifier>,
    /// Keeps handing out the last frame, like single-buffer drivers
    latched: Option<Vec<u8>>,
    latching: bool,
    /// Re-arms allowed to succeed before `rearm_failure` applies
    rearm_budget: usize,
    rearm_failure: Option<i16>,
    rejected_filter: Option<NetworkId>,
}

/// View on a [`FakeRadio`] that stays usable after the radio is moved
#[derive(Clone, Default)]
pub struct RadioLog {
    shared: Arc<Mutex<Shared>>,
}

impl RadioLog {
    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        f(&mut self.shared.lock().unwrap())
    }

    /// Frames transmitted successfully
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.transmitted.clone())
    }

    /// Transmissions decoded as frames
    pub fn frames(&self) -> Vec<Frame> {
        self.transmitted().iter().filter_map(|bytes| Frame::decode(bytes).ok()).collect()
    }

    /// Every transmit call, failed ones included
    pub fn attempts(&self) -> usize {
        self.with(|s| s.attempts)
    }

    pub fn rearm_count(&self) -> usize {
        self.with(|s| s.rearms)
    }

    pub fn filters(&self) -> Vec<NetworkId> {
        self.with(|s| s.filters.clone())
    }

    /// Makes every later transmission fail with `code`, or succeed again
    pub fn set_failure(&self, code: Option<i16>) {
        self.with(|s| s.failure = code);
    }

    /// Puts a frame on the air and raises the receive notification
    pub fn inject(&self, bytes: Vec<u8>) {
        self.with(|s| {
            s.inbox.push_back(bytes);
            if let Some(notifier) = &s.notifier {
                notifier.notify();
            }
        });
    }

    pub fn inject_frame(&self, frame: &Frame) {
        self.inject(frame.encode().unwrap().to_vec());
    }

    /// Makes applying `network` as filter fail
    pub fn reject_filter(&self, network: NetworkId) {
        self.with(|s| s.rejected_filter = Some(network));
    }

    /// Lets `budget` more re-arms succeed, then fails them with `code`
    pub fn fail_rearm_after(&self, budget: usize, code: Option<i16>) {
        self.with(|s| {
            s.rearm_budget = budget;
            s.rearm_failure = code;
        });
    }

    pub fn clear(&self) {
        self.with(|s| {
            s.transmitted.clear();
            s.attempts = 0;
        });
    }
}

/// Radio whose peer is a closure answering transmitted frames
pub struct FakeRadio {
    responder: Option<Responder>,
    log: RadioLog,
}

impl FakeRadio {
    /// Nobody answers
    pub fn silent() -> Self {
        FakeRadio { responder: None, log: RadioLog::default() }
    }

    /// `responder` may answer each successfully transmitted frame
    pub fn replying<F>(responder: F) -> Self
    where
        F: FnMut(&Frame) -> Option<Frame> + Send + 'static,
    {
        FakeRadio { responder: Some(Box::new(responder)), log: RadioLog::default() }
    }

    /// `read_received` returns the last frame again once the inbox is empty
    pub fn latching() -> Self {
        let radio = Self::silent();
        radio.log.with(|s| s.latching = true);
        radio
    }

    /// Every transmission fails with `code`
    pub fn failing(code: i16) -> Self {
        let radio = Self::silent();
        radio.log.set_failure(Some(code));
        radio
    }

    pub fn log(&self) -> RadioLog {
        self.log.clone()
    }

    fn pop(&self, buf: &mut [u8]) -> Option<usize> {
        self.log.with(|s| s.inbox.pop_front()).map(|frame| {
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            len
        })
    }
}

#[async_trait]
impl Radio for FakeRadio {
    async fn set_network_filter(&mut self, network: NetworkId) -> Result<(), RadioError> {
        self.log.with(|s| {
            if s.rejected_filter == Some(network) {
                return Err(RadioError(-4));
            }
            s.filters.push(network);
            Ok(())
        })
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let failure = self.log.with(|s| {
            s.attempts += 1;
            if s.failure.is_none() {
                s.transmitted.push(frame.to_vec());
            }
            s.failure
        });
        if let Some(code) = failure {
            return Err(RadioError(code));
        }

        if let (Some(responder), Ok(decoded)) = (self.responder.as_mut(), Frame::decode(frame)) {
            if let Some(reply) = responder(&decoded) {
                let bytes = reply.encode().unwrap().to_vec();
                self.log.with(|s| s.inbox.push_back(bytes));
            }
        }
        Ok(())
    }

    async fn start_receive(&mut self) -> Result<(), RadioError> {
        self.log.with(|s| {
            s.rearms += 1;
            match s.rearm_failure {
                Some(code) if s.rearm_budget == 0 => Err(RadioError(code)),
                _ => {
                    s.rearm_budget = s.rearm_budget.saturating_sub(1);
                    Ok(())
                }
            }
        })
    }

    async fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        let frame = self.log.with(|s| {
            let frame = match s.inbox.pop_front() {
                Some(frame) => {
                    if s.latching {
                        s.latched = Some(frame.clone());
                    }
                    Some(frame)
                }
                None => s.latched.clone(),
            };
            if !s.inbox.is_empty() {
                if let Some(notifier) = &s.notifier {
                    notifier.notify();
                }
            }
            frame
        });
        Ok(frame.map_or(0, |frame| {
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            len
        }))
    }

    async fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, RadioError> {
        if let Some(len) = self.pop(buf) {
            return Ok(Some(len));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.pop(buf))
    }

    fn on_receive(&mut self, notifier: ReceiveNotifier) {
        self.log.with(|s| s.notifier = Some(notifier));
    }
}

/// Publisher keeping everything it is given
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, Telemetry)>>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(String, Telemetry)> {
        self.published.lock().unwrap().clone()
    }

    /// Last value published under `key`
    pub fn last(&self, key: &str) -> Option<Telemetry> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.clone())
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, key: &str, value: &Telemetry) {
        self.published.lock().unwrap().push((key.to_string(), value.clone()));
    }
}

/// Shared state a role borrows in unit tests
pub struct RoleBench {
    pub transport: Transport<FakeRadio>,
    pub zones: Zones,
    pub store: MemoryStore,
    pub publisher: RecordingPublisher,
}

impl RoleBench {
    pub fn new(radio: FakeRadio, config: &GatewayConfig) -> Self {
        RoleBench {
            transport: Transport::new(radio, config.retry.clone()),
            zones: Zones::new(config),
            store: MemoryStore::new(),
            publisher: RecordingPublisher::default(),
        }
    }

    pub fn ctx(&mut self) -> RoleContext<'_, FakeRadio> {
        RoleContext {
            transport: &mut self.transport,
            zones: &mut self.zones,
            store: &mut self.store,
            publisher: &mut self.publisher,
            now: Instant::now(),
        }
    }
}
