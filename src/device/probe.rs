use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::core::{Error, ProbeSource, Result, OUTDOOR_PROBE_ID};
use crate::hooks::{RoleKey, Store, Telemetry};
use crate::network::{Radio, Transport};
use crate::protocol::frame::{Body, Frame, MessageKind};
use crate::protocol::registers::{Session, OUTDOOR_TEMPERATURE};
use crate::protocol::state::Device;
use crate::protocol::values::Temp16;
use super::RoleContext;

/// Wired outdoor temperature sensor
#[async_trait]
pub trait TemperatureSensor: Send {
    async fn read_celsius(&mut self) -> Result<f32>;
}

/// Outdoor temperature probe role
pub struct OutdoorProbe {
    device: Device,
    boiler_id: u8,
    source: ProbeSource,
    sensor: Option<Box<dyn TemperatureSensor>>,
    temperature: Option<f32>,
    next_push: Option<Instant>,
    interval: std::time::Duration,
}

impl OutdoorProbe {
    pub fn new(source: ProbeSource, boiler_id: u8, interval: std::time::Duration) -> Self {
        OutdoorProbe {
            device: Device::new(OUTDOOR_PROBE_ID),
            boiler_id,
            source,
            sensor: None,
            temperature: None,
            next_push: None,
            interval,
        }
    }

    /// Attaches the sensor read by a `Wired` probe
    pub fn with_sensor(mut self, sensor: Box<dyn TemperatureSensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn begin(&mut self, store: &dyn Store) -> Result<()> {
        if let Some(id) = store.load_association(RoleKey::OutdoorProbe)? {
            self.device.restore(id);
        }
        if self.source == ProbeSource::Wired && self.sensor.is_none() {
            return Err(Error::config("wired outdoor probe has no sensor"));
        }
        info!(source = ?self.source, associated = self.device.is_associated(), "outdoor probe ready");
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn source(&self) -> ProbeSource {
        self.source
    }

    /// Last known outdoor temperature
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Reading pushed in from outside; ignored unless the source is `External`
    pub fn set_temperature(&mut self, value: f32) -> Result<()> {
        if self.source != ProbeSource::External {
            return Err(Error::config("outdoor probe is fed by its wired sensor"));
        }
        if !value.is_finite() {
            return Err(Error::config("outdoor temperature must be finite"));
        }
        self.temperature = Some(value);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        if let Some(sensor) = self.sensor.as_mut() {
            let value = sensor.read_celsius().await?;
            if !value.is_finite() {
                return Err(Error::protocol("sensor returned no temperature"));
            }
            self.temperature = Some(value);
        }
        Ok(())
    }

    pub async fn poll<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<()> {
        if !self.device.is_associated() {
            return Ok(());
        }
        if self.next_push.map_or(false, |next| ctx.now < next) {
            return Ok(());
        }

        if self.source == ProbeSource::Wired {
            self.next_push = Some(ctx.now + self.interval);
            if let Err(err) = self.refresh().await {
                error!(error = %err, "outdoor sensor read failed");
            }
        }

        // An external reading is sent as soon as it arrives
        let Some(value) = self.temperature else {
            debug!("no outdoor reading yet");
            return Ok(());
        };
        self.next_push = Some(ctx.now + self.interval);
        if let Err(err) = self.push(ctx.transport, value).await {
            error!(error = %err, "outdoor temperature push failed");
            return Ok(());
        }
        ctx.publisher.publish("outdoor/temperature", &Telemetry::Temperature(value));
        Ok(())
    }

    async fn push<R: Radio>(&mut self, transport: &mut Transport<R>, value: f32) -> Result<()> {
        info!(temperature = value, "sending outdoor temperature");
        let payload = Temp16::from_celsius(value).to_bytes();
        Session::new(&mut self.device, transport, self.boiler_id)
            .write_region(OUTDOOR_TEMPERATURE.address, OUTDOOR_TEMPERATURE.words, &payload)
            .await
    }

    /// Answers boiler reads addressed to the probe with the current reading
    pub async fn on_receive<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, frame: &Frame) -> Result<bool> {
        if !self.device.is_associated() || frame.header.destination != OUTDOOR_PROBE_ID {
            return Ok(false);
        }
        if frame.header.kind != MessageKind::Read || !matches!(frame.body, Body::ReadRequest(_)) {
            return Ok(false);
        }

        let value = self
            .temperature
            .ok_or_else(|| Error::protocol("no outdoor reading to report"))?;
        let payload = Temp16::from_celsius(value).to_bytes();
        Session::new(&mut self.device, ctx.transport, self.boiler_id)
            .acknowledge(&frame.header, &payload)
            .await?;
        Ok(true)
    }
}
