use chrono::NaiveDateTime;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::{Error, GatewayConfig, Result, TimingConfig, ZoneSlot, ZoneSource, CONNECT_ID};
use crate::hooks::{RoleKey, Store, Telemetry};
use crate::network::{Radio, Transport};
use crate::protocol::frame::{Body, Frame, MessageKind};
use crate::protocol::records::{ConsumptionRecord, DhwMode, TelemetryRecord, ZoneRecord};
use crate::protocol::registers::{
    self, Session, CLOCK, DHW_MODE, DEFAULT_RECEPTION, ZONE_CONFIG, ZONE_CONFIG_WRITE,
};
use crate::protocol::state::Device;
use crate::protocol::values::BcdDate;
use super::{publish_zone, RoleContext};

/// Next run of a periodic exchange; `None` runs on the next pass
#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    next: Option<Instant>,
}

impl Schedule {
    fn is_due(&self, now: Instant) -> bool {
        self.next.map_or(true, |next| now >= next)
    }

    fn defer(&mut self, now: Instant, delay: std::time::Duration) {
        self.next = Some(now + delay);
    }
}

/// Gateway ("Connect") role
///
/// Pulls telemetry, consumption and DHW mode from the boiler, pushes dirty
/// zones it manages and accepts zone configuration pushed by the boiler.
pub struct Connect {
    device: Device,
    boiler_id: u8,
    passive: bool,
    timing: TimingConfig,

    dhw_temperature: Option<f32>,
    dhw_instant: Option<f32>,
    heating_circuit: Option<f32>,
    outdoor: Option<f32>,
    pressure: Option<f32>,
    dhw_consumption: Option<i16>,
    heating_consumption: Option<i16>,
    dhw_mode: DhwMode,
    clock: Option<NaiveDateTime>,

    telemetry: Schedule,
    consumption: Schedule,
    dhw: Schedule,
    zone_push: Schedule,
}

impl Connect {
    pub fn new(config: &GatewayConfig) -> Self {
        Connect {
            device: Device::new(CONNECT_ID),
            boiler_id: config.boiler_id,
            passive: config.connect.passive,
            timing: config.timing.clone(),
            dhw_temperature: None,
            dhw_instant: None,
            heating_circuit: None,
            outdoor: None,
            pressure: None,
            dhw_consumption: None,
            heating_consumption: None,
            dhw_mode: DhwMode::Unknown,
            clock: None,
            telemetry: Schedule::default(),
            consumption: Schedule::default(),
            dhw: Schedule::default(),
            zone_push: Schedule::default(),
        }
    }

    /// Loads the persisted association
    pub fn begin(&mut self, store: &dyn Store) -> Result<()> {
        if let Some(id) = store.load_association(RoleKey::Connect)? {
            self.device.restore(id);
        }
        info!(associated = self.device.is_associated(), passive = self.passive, "connect role ready");
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Passive gateways never run an active association
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    fn session<'s, R: Radio>(&'s mut self, transport: &'s mut Transport<R>) -> Session<'s, R> {
        Session::new(&mut self.device, transport, self.boiler_id)
    }

    /// Time-driven work; failures are logged and rescheduled
    pub async fn poll<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<()> {
        if !self.device.is_associated() {
            return Ok(());
        }
        let now = ctx.now;

        if self.telemetry.is_due(now) {
            info!("fetching telemetry");
            match self.fetch_telemetry(ctx).await {
                Ok(_) => self.telemetry.defer(now, self.timing.telemetry_interval),
                Err(err) => {
                    error!(error = %err, "telemetry fetch failed");
                    self.telemetry.defer(now, self.timing.failure_retry);
                }
            }
        }

        if self.consumption.is_due(now) {
            info!("fetching gas consumption");
            match self.fetch_consumption(ctx).await {
                Ok(_) => self.consumption.defer(now, self.timing.consumption_interval),
                Err(err) => {
                    error!(error = %err, "consumption fetch failed");
                    self.consumption.defer(now, self.timing.failure_retry);
                }
            }
        }

        if self.dhw.is_due(now) {
            info!("fetching DHW mode");
            if let Err(err) = self.fetch_dhw_mode(ctx).await {
                error!(error = %err, "DHW mode fetch failed");
            }
            self.dhw.defer(now, self.timing.dhw_mode_interval);
        }

        if self.zone_push.is_due(now) {
            self.push_dirty_zones(ctx).await;
            self.zone_push.defer(now, self.timing.zone_push_interval);
        }

        Ok(())
    }

    /// Reads the telemetry block and spreads it over the role and the zones
    pub async fn fetch_telemetry<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<TelemetryRecord> {
        let region = registers::telemetry_region(self.boiler_id);
        let data = self.session(ctx.transport).read_region(region.address, region.words).await?;
        let record = TelemetryRecord::decode(&data)?;

        self.dhw_temperature = Some(record.dhw);
        self.dhw_instant = Some(record.dhw_instant);
        self.heating_circuit = Some(record.heating_circuit);
        self.outdoor = Some(record.outdoor);
        self.pressure = Some(record.pressure);

        for slot in ZoneSlot::ALL {
            let zone = ctx.zones.get_mut(slot);
            if !zone.is_enabled() {
                continue;
            }
            if zone.source() == Some(ZoneSource::Connect) {
                let (ambient, target) = record.zone(slot);
                zone.update_temperatures(ambient, target);
            }
            zone.set_supply(record.supply[slot.index()]);
            publish_zone(ctx.publisher, zone);
        }

        let publisher = &mut *ctx.publisher;
        publisher.publish("connect/dhw_temperature", &Telemetry::Temperature(record.dhw));
        publisher.publish("connect/heating_circuit_temperature", &Telemetry::Temperature(record.heating_circuit));
        publisher.publish("connect/outdoor_temperature", &Telemetry::Temperature(record.outdoor));
        publisher.publish("connect/pressure", &Telemetry::Pressure(record.pressure));
        debug!(dhw = record.dhw, outdoor = record.outdoor, pressure = record.pressure, "telemetry updated");

        Ok(record)
    }

    /// Reads the gas consumption counters
    pub async fn fetch_consumption<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<ConsumptionRecord> {
        let region = registers::consumption_region(self.boiler_id);
        let data = self.session(ctx.transport).read_region(region.address, region.words).await?;
        let record = ConsumptionRecord::decode(&data)?;

        self.dhw_consumption = Some(record.dhw);
        self.heating_consumption = Some(record.heating);
        ctx.publisher.publish("connect/dhw_consumption", &Telemetry::Consumption(record.dhw));
        ctx.publisher.publish("connect/heating_consumption", &Telemetry::Consumption(record.heating));

        Ok(record)
    }

    /// Reads the DHW mode word
    pub async fn fetch_dhw_mode<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<DhwMode> {
        let data = self.session(ctx.transport).read_region(DHW_MODE.address, DHW_MODE.words).await?;
        let mode = DhwMode::decode_region(&data)?;
        debug!(raw = data[1], mode = %mode, "DHW mode received");

        self.dhw_mode = mode;
        if mode != DhwMode::Unknown {
            ctx.publisher.publish("connect/dhw_mode", &Telemetry::DhwMode(mode));
        }
        Ok(mode)
    }

    /// Reads the boiler clock
    pub async fn fetch_clock<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<NaiveDateTime> {
        let data = self.session(ctx.transport).read_region(CLOCK.address, CLOCK.words).await?;
        let clock = BcdDate::decode(&data)?;
        debug!(clock = %clock, "boiler clock received");
        self.clock = Some(clock);
        ctx.publisher.publish("connect/clock", &Telemetry::Clock(clock));
        Ok(clock)
    }

    /// Chooses the DHW mode to push next
    pub fn set_dhw_mode(&mut self, mode: DhwMode) {
        self.dhw_mode = mode;
    }

    /// Writes the selected DHW mode to the boiler
    pub async fn push_dhw_mode<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) -> Result<()> {
        if self.dhw_mode == DhwMode::Unknown {
            return Err(Error::protocol("no DHW mode selected"));
        }
        info!(mode = %self.dhw_mode, "sending DHW mode");
        let payload = self.dhw_mode.encode_region();
        self.session(ctx.transport)
            .write_with_echo(DEFAULT_RECEPTION, DHW_MODE, DHW_MODE, &payload)
            .await?;
        ctx.publisher.publish("connect/dhw_mode", &Telemetry::DhwMode(self.dhw_mode));
        Ok(())
    }

    /// Writes one zone's configuration; zones fed by a virtual satellite are
    /// never transmitted
    pub async fn push_zone<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, slot: ZoneSlot) -> Result<()> {
        self.device.require_associated()?;
        let zone = ctx.zones.get(slot);
        if zone.source() == Some(ZoneSource::VirtualSatellite) {
            debug!(zone = %slot, "virtual satellite zone, push suppressed");
            return Ok(());
        }

        let record = zone.record().map_err(|err| {
            error!(zone = %slot, error = %err, "cannot push incomplete zone");
            err
        })?;
        let unit_id = zone.unit_id();

        info!(zone = %slot, "pushing zone configuration");
        self.session(ctx.transport)
            .write_with_echo(unit_id, ZONE_CONFIG, ZONE_CONFIG_WRITE, &record.encode())
            .await?;
        Ok(())
    }

    /// Pushes every dirty zone this role manages
    pub async fn push_dirty_zones<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>) {
        for slot in ZoneSlot::ALL {
            let zone = ctx.zones.get(slot);
            if zone.source() != Some(ZoneSource::Connect) || !zone.is_dirty() {
                continue;
            }

            match self.push_zone(ctx, slot).await {
                Ok(()) => {
                    let zone = ctx.zones.get_mut(slot);
                    zone.mark_sent(Instant::now());
                    publish_zone(ctx.publisher, zone);
                    info!(zone = %slot, "zone pushed");
                }
                Err(err) => warn!(zone = %slot, error = %err, "zone push failed, will retry"),
            }
        }
    }

    /// Handles a frame addressed to the gateway; `Ok(false)` when not for us
    pub async fn on_receive<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, frame: &Frame) -> Result<bool> {
        if !self.device.is_associated() {
            return Ok(false);
        }

        let data = match &frame.body {
            Body::Write { target, data, .. }
                if frame.header.kind == MessageKind::Init && *target == ZONE_CONFIG =>
            {
                data
            }
            _ => return Ok(false),
        };

        let slot_id = frame.header.slot();
        info!(source = frame.header.source, slot = slot_id, "zone configuration pushed by boiler");

        let slot = ZoneSlot::from_unit_id(slot_id)
            .ok_or_else(|| Error::decode(format!("invalid zone id 0x{:02X}", slot_id)))?;
        if data.len() < ZoneRecord::PUSH_LEN {
            return Err(Error::decode(format!(
                "zone push carries {} bytes, {} expected",
                data.len(),
                ZoneRecord::PUSH_LEN
            )));
        }
        let record = ZoneRecord::decode(data)?;

        let zone = ctx.zones.get_mut(slot);
        if !zone.is_enabled() {
            return Err(Error::decode(format!("{} is not configured", slot)));
        }
        zone.apply_remote(&record);
        if let Err(err) = ctx.store.save_zone(slot, &zone.settings()) {
            warn!(zone = %slot, error = %err, "failed to persist zone");
        }
        publish_zone(ctx.publisher, zone);

        self.session(ctx.transport).acknowledge(&frame.header, data).await?;
        Ok(true)
    }

    pub fn dhw_temperature(&self) -> Option<f32> {
        self.dhw_temperature
    }

    pub fn dhw_instant_temperature(&self) -> Option<f32> {
        self.dhw_instant
    }

    pub fn heating_circuit_temperature(&self) -> Option<f32> {
        self.heating_circuit
    }

    pub fn outdoor_temperature(&self) -> Option<f32> {
        self.outdoor
    }

    pub fn pressure(&self) -> Option<f32> {
        self.pressure
    }

    pub fn dhw_consumption(&self) -> Option<i16> {
        self.dhw_consumption
    }

    pub fn heating_consumption(&self) -> Option<i16> {
        self.heating_consumption
    }

    pub fn dhw_mode(&self) -> DhwMode {
        self.dhw_mode
    }

    pub fn clock(&self) -> Option<NaiveDateTime> {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{RetryPolicy, SatelliteMode, ZoneMode, ZoneSettings, Zones, BOILER_ID};
    use crate::protocol::frame::{Header, Region};
    use crate::testing::{FakeRadio, RoleBench};

    fn bench(radio: FakeRadio) -> RoleBench {
        RoleBench::new(radio, &GatewayConfig::default())
    }

    fn associated() -> Connect {
        let mut connect = Connect::new(&GatewayConfig::default());
        connect.device.restore(0x2A);
        connect
    }

    fn telemetry_reply(frame: &Frame) -> Option<Frame> {
        let Body::ReadRequest(region) = frame.body else {
            return Some(Frame::data(frame.header.reply(), Vec::new()));
        };
        let mut data = vec![0u8; region.byte_len()];
        if region.address == 0x79E0 {
            data[0..2].copy_from_slice(&[0x02, 0x1C]);
            data[4..6].copy_from_slice(&[0x01, 0x5E]);
            data[20..22].copy_from_slice(&[0x1F, 0x00]);
            data[36..38].copy_from_slice(&[0x00, 0xD2]);
            data[48..50].copy_from_slice(&[0x00, 0xD7]);
            data[54..56].copy_from_slice(&[0xFF, 0xE2]);
        } else if region == DHW_MODE {
            data[1] = 0x89;
        } else if region == CLOCK {
            data.copy_from_slice(&[0x24, 0x03, 0x09, 0x07, 0x05, 0x00]);
        }
        Some(Frame::data(frame.header.reply(), data))
    }

    fn configured_zone(zones: &mut Zones) {
        zones.get_mut(ZoneSlot::Z1).restore(&ZoneSettings {
            mode: ZoneMode::Auto,
            options: 0x04,
            comfort: Some(20.0),
            reduced: Some(17.0),
            frost: Some(8.0),
            boost_offset: 2.0,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unassociated_telemetry_pull_sends_nothing() {
        let radio = FakeRadio::replying(telemetry_reply);
        let log = radio.log();
        let mut harness = bench(radio);
        let mut connect = Connect::new(&GatewayConfig::default());

        let result = connect.fetch_telemetry(&mut harness.ctx()).await;
        assert!(matches!(result, Err(Error::NotAssociated(CONNECT_ID))));

        connect.poll(&mut harness.ctx()).await.unwrap();
        assert_eq!(log.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_updates_role_and_zones() {
        let mut harness = bench(FakeRadio::replying(telemetry_reply));
        let mut connect = associated();

        connect.fetch_telemetry(&mut harness.ctx()).await.unwrap();

        assert_eq!(connect.dhw_temperature(), Some(54.0));
        assert_eq!(connect.outdoor_temperature(), Some(-3.0));
        assert_eq!(connect.pressure(), Some(1.55));
        let zone = harness.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.ambient(), Some(21.0));
        assert_eq!(zone.target(), Some(21.5));
        assert_eq!(zone.supply(), Some(35.0));
        assert_eq!(
            harness.publisher.last("connect/outdoor_temperature"),
            Some(Telemetry::Temperature(-3.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_last_value() {
        let radio = FakeRadio::replying(telemetry_reply);
        let log = radio.log();
        let mut harness = bench(radio);
        let mut connect = associated();
        connect.fetch_telemetry(&mut harness.ctx()).await.unwrap();

        log.set_failure(Some(-2));
        assert!(connect.fetch_telemetry(&mut harness.ctx()).await.is_err());
        assert_eq!(connect.dhw_temperature(), Some(54.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_is_decoded_and_published() {
        let mut harness = bench(FakeRadio::replying(telemetry_reply));
        let mut connect = associated();
        assert_eq!(connect.clock(), None);

        let clock = connect.fetch_clock(&mut harness.ctx()).await.unwrap();
        assert_eq!(clock.to_string(), "2024-03-09 07:05:00");
        assert_eq!(connect.clock(), Some(clock));
        assert_eq!(harness.publisher.last("connect/clock"), Some(Telemetry::Clock(clock)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dhw_mode_round() {
        let radio = FakeRadio::replying(telemetry_reply);
        let log = radio.log();
        let mut harness = bench(radio);
        let mut connect = associated();

        assert_eq!(connect.fetch_dhw_mode(&mut harness.ctx()).await.unwrap(), DhwMode::Eco);

        connect.set_dhw_mode(DhwMode::Stop);
        connect.push_dhw_mode(&mut harness.ctx()).await.unwrap();
        let write = log.frames().pop().unwrap();
        assert_eq!(
            write.body,
            Body::Write { target: DHW_MODE, echo: DHW_MODE, data: vec![0x00, 0x29].into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dirty_zone_push_success() {
        let radio = FakeRadio::replying(|frame| Some(Frame::data(frame.header.reply(), Vec::new())));
        let log = radio.log();
        let mut harness = bench(radio);
        configured_zone(&mut harness.zones);
        let mut connect = associated();

        let start = Instant::now();
        harness.zones.get_mut(ZoneSlot::Z1).mark_sent(start + Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(10)).await;
        harness.zones.get_mut(ZoneSlot::Z1).set_comfort(21.5, Instant::now());

        connect.push_dirty_zones(&mut harness.ctx()).await;

        let zone = harness.zones.get(ZoneSlot::Z1);
        assert!(!zone.is_dirty());
        assert!(zone.last_sent().unwrap() >= zone.last_change().unwrap());

        let frames = log.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.reception, ZoneSlot::Z1.unit_id());
        match &frames[0].body {
            Body::Write { target, echo, data } => {
                assert_eq!(*target, Region::new(0xA154, 0x18));
                assert_eq!(*echo, Region::new(0xA154, 0x03));
                assert_eq!(&data[..], &[165, 120, 30, 0x05, 0x04, 0x00]);
            }
            other => panic!("unexpected body {:?}", other),
        }

        // Nothing left to send until the next edit
        connect.push_dirty_zones(&mut harness.ctx()).await;
        assert_eq!(log.frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dirty_zone_push_failure_keeps_last_sent() {
        let radio = FakeRadio::failing(-3);
        let log = radio.log();
        let mut harness = bench(radio);
        configured_zone(&mut harness.zones);
        let mut connect = associated();

        let start = Instant::now();
        harness.zones.get_mut(ZoneSlot::Z1).mark_sent(start + Duration::from_secs(5));
        harness.zones.get_mut(ZoneSlot::Z1).set_mode(ZoneMode::Comfort, start + Duration::from_secs(10));

        connect.push_dirty_zones(&mut harness.ctx()).await;

        let zone = harness.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.last_sent(), Some(start + Duration::from_secs(5)));
        assert!(zone.is_dirty());

        // Retried on the next pass
        log.set_failure(None);
        connect.push_dirty_zones(&mut harness.ctx()).await;
        assert!(log.attempts() > usize::from(RetryPolicy::default().write_attempts));
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_zone_is_never_pushed() {
        let radio = FakeRadio::replying(|frame| Some(Frame::data(frame.header.reply(), Vec::new())));
        let log = radio.log();
        let mut harness = bench(radio);
        let mut config = GatewayConfig::default();
        config.zones[0].satellite = SatelliteMode::Virtual;
        harness.zones = Zones::new(&config);
        configured_zone(&mut harness.zones);
        harness.zones.get_mut(ZoneSlot::Z1).set_comfort(22.0, Instant::now());

        let mut connect = associated();
        connect.push_dirty_zones(&mut harness.ctx()).await;
        connect.push_zone(&mut harness.ctx(), ZoneSlot::Z1).await.unwrap();
        assert_eq!(log.attempts(), 0);
    }

    fn zone_push(reception: u8, len: usize) -> Frame {
        let mut data = vec![0xFFu8; len];
        data[..6].copy_from_slice(&[170, 110, 30, 0x06, 0x84, 0x00]);
        let header = Header::new(CONNECT_ID, BOILER_ID, 0x2A, 0x40, reception, MessageKind::Init);
        Frame::write(header, ZONE_CONFIG, ZONE_CONFIG_WRITE, data)
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_zone_push_is_applied_and_acknowledged() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut harness = bench(radio);
        configured_zone(&mut harness.zones);
        let mut connect = associated();

        let push = zone_push(ZoneSlot::Z1.unit_id(), ZoneRecord::PUSH_LEN);
        assert!(connect.on_receive(&mut harness.ctx(), &push).await.unwrap());

        let zone = harness.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.mode(), ZoneMode::Comfort);
        assert_eq!(zone.comfort(), Some(22.0));
        assert_eq!(zone.reduced(), Some(16.0));
        assert!(!zone.is_dirty());
        assert_eq!(harness.store.load_zone(ZoneSlot::Z1).unwrap().unwrap().comfort, Some(22.0));

        let ack = log.frames().pop().unwrap();
        assert_eq!(ack.header, push.header.reply());
        assert_eq!(ack.payload(), push.payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_zone_push_is_not_acknowledged() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut harness = bench(radio);
        let mut connect = associated();

        let unknown_zone = zone_push(0x05, ZoneRecord::PUSH_LEN);
        assert!(connect.on_receive(&mut harness.ctx(), &unknown_zone).await.is_err());

        let truncated = zone_push(ZoneSlot::Z1.unit_id(), 20);
        assert!(connect.on_receive(&mut harness.ctx(), &truncated).await.is_err());

        let disabled_zone = zone_push(ZoneSlot::Z3.unit_id(), ZoneRecord::PUSH_LEN);
        assert!(connect.on_receive(&mut harness.ctx(), &disabled_zone).await.is_err());

        assert_eq!(log.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cadences() {
        let radio = FakeRadio::replying(telemetry_reply);
        let log = radio.log();
        let mut harness = bench(radio);
        let mut connect = associated();

        // First pass runs telemetry, consumption and DHW mode at once
        connect.poll(&mut harness.ctx()).await.unwrap();
        assert_eq!(log.frames().len(), 3);

        tokio::time::advance(Duration::from_secs(60)).await;
        connect.poll(&mut harness.ctx()).await.unwrap();
        assert_eq!(log.frames().len(), 3);

        tokio::time::advance(Duration::from_secs(300)).await;
        connect.poll(&mut harness.ctx()).await.unwrap();
        assert_eq!(log.frames().len(), 4);
    }
}
