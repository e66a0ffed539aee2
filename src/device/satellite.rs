use tracing::{debug, info, trace, warn};

use crate::core::{Error, Result, SatelliteMode, Zone, ZoneMode, ZoneSlot, ZoneSource};
use crate::hooks::{RoleKey, Store};
use crate::network::Radio;
use crate::protocol::frame::{Body, Frame, MessageKind};
use crate::protocol::records::{SatelliteStatus, ZoneRecord};
use crate::protocol::registers::{SATELLITE_STATUS_WRITE, ZONE_CONFIG};
use crate::protocol::state::Device;
use crate::protocol::values::Temp16;
use super::{publish_zone, RoleContext};

/// Zone thermostat role
///
/// A physical satellite is a real unit on the bus; the role only observes
/// what it sends to the boiler. A virtual satellite stands in for a missing
/// unit and answers the boiler with the zone's state.
pub struct Satellite {
    slot: ZoneSlot,
    mode: SatelliteMode,
    device: Device,
}

impl Satellite {
    pub fn new(slot: ZoneSlot, mode: SatelliteMode) -> Self {
        Satellite { slot, mode, device: Device::new(slot.unit_id()) }
    }

    pub fn begin(&mut self, store: &dyn Store) -> Result<()> {
        if let Some(id) = store.load_association(RoleKey::Satellite(self.slot))? {
            self.device.restore(id);
        }
        info!(zone = %self.slot, mode = ?self.mode, associated = self.device.is_associated(), "satellite role ready");
        Ok(())
    }

    pub fn slot(&self) -> ZoneSlot {
        self.slot
    }

    pub fn mode(&self) -> SatelliteMode {
        self.mode
    }

    pub fn is_virtual(&self) -> bool {
        self.mode == SatelliteMode::Virtual
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Satellites have no time-driven work: they only react to traffic
    pub async fn poll<R: Radio>(&mut self, _ctx: &mut RoleContext<'_, R>) -> Result<()> {
        Ok(())
    }

    pub async fn on_receive<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, frame: &Frame) -> Result<bool> {
        match self.mode {
            SatelliteMode::Physical => self.relay(ctx, frame),
            SatelliteMode::Virtual => self.answer(ctx, frame).await,
            SatelliteMode::None => Ok(false),
        }
    }

    /// Physical unit traffic towards the boiler; nothing is transmitted
    fn relay<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, frame: &Frame) -> Result<bool> {
        if frame.header.source != self.device.unit_id() || frame.header.is_ack() {
            return Ok(false);
        }
        let (target, data) = match &frame.body {
            Body::Write { target, data, .. } if frame.header.kind == MessageKind::Init => (*target, data),
            _ => return Ok(false),
        };

        let zone = ctx.zones.get_mut(self.slot);
        let owned = zone.source() == Some(ZoneSource::PhysicalSatellite);
        if target == SATELLITE_STATUS_WRITE {
            let status = SatelliteStatus::decode(data)?;
            if !owned {
                trace!(zone = %self.slot, "satellite report ignored, zone fed elsewhere");
                return Ok(true);
            }
            let (ambient, target) = (status.ambient.to_celsius(), status.target.to_celsius());
            debug!(zone = %self.slot, ambient, target, "satellite report");
            zone.update_temperatures(ambient, target);
        } else if target == ZONE_CONFIG {
            let record = ZoneRecord::decode(data)?;
            if !owned {
                trace!(zone = %self.slot, "satellite configuration ignored, zone fed elsewhere");
                return Ok(true);
            }
            info!(zone = %self.slot, "zone configuration changed on satellite");
            zone.apply_remote(&record);
            if let Err(err) = ctx.store.save_zone(self.slot, &zone.settings()) {
                warn!(zone = %self.slot, error = %err, "failed to persist zone");
            }
        } else {
            return Ok(false);
        }

        publish_zone(ctx.publisher, zone);
        Ok(true)
    }

    /// Boiler traffic addressed to the emulated unit
    async fn answer<R: Radio>(&mut self, ctx: &mut RoleContext<'_, R>, frame: &Frame) -> Result<bool> {
        if !self.device.is_associated() || frame.header.destination != self.device.unit_id() {
            return Ok(false);
        }

        match (&frame.header.kind, &frame.body) {
            (MessageKind::Read, Body::ReadRequest(region)) => {
                debug!(zone = %self.slot, region = %region, "status requested");
            }
            (MessageKind::Init, Body::Write { target, data, .. }) if *target == ZONE_CONFIG => {
                let record = ZoneRecord::decode(data)?;
                info!(zone = %self.slot, "zone configuration pushed to virtual satellite");
                let zone = ctx.zones.get_mut(self.slot);
                zone.apply_remote(&record);
                if let Err(err) = ctx.store.save_zone(self.slot, &zone.settings()) {
                    warn!(zone = %self.slot, error = %err, "failed to persist zone");
                }
                publish_zone(ctx.publisher, zone);
            }
            _ => return Ok(false),
        }

        let status = status_of(ctx.zones.get(self.slot))?;
        ctx.transport.acknowledge(&frame.header, &status.encode()).await?;
        Ok(true)
    }
}

/// Setpoint the zone is currently heating to
fn active_setpoint(zone: &Zone) -> Option<f32> {
    let setpoint = match zone.mode() {
        ZoneMode::Reduced => zone.reduced(),
        ZoneMode::FrostProtection => zone.frost(),
        _ => zone.comfort(),
    };
    if zone.boost_active() && zone.mode() != ZoneMode::FrostProtection {
        setpoint.map(|value| value + zone.boost_offset())
    } else {
        setpoint
    }
}

/// Status a virtual satellite reports for its zone
fn status_of(zone: &Zone) -> Result<SatelliteStatus> {
    let ambient = zone
        .ambient()
        .ok_or_else(|| Error::protocol(format!("{} has no ambient temperature", zone.slot())))?;
    let target = zone.target().or_else(|| active_setpoint(zone)).unwrap_or(ambient);

    Ok(SatelliteStatus {
        ambient: Temp16::from_celsius(ambient),
        target: Temp16::from_celsius(target),
        mode: zone.mode().as_u8(),
        options: zone.options().0,
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::core::{GatewayConfig, ZoneSettings, BOILER_ID, ZONE_1_ID};
    use crate::protocol::frame::{Header, Region};
    use crate::protocol::registers::{SATELLITE_STATUS, ZONE_CONFIG_WRITE};
    use crate::testing::{FakeRadio, RoleBench};

    fn config(mode: SatelliteMode) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.zones[0].satellite = mode;
        if mode == SatelliteMode::Physical {
            config.connect.enabled = false;
        }
        config
    }

    fn settings() -> ZoneSettings {
        ZoneSettings {
            mode: ZoneMode::Reduced,
            options: 0x04,
            comfort: Some(20.0),
            reduced: Some(17.0),
            frost: Some(8.0),
            boost_offset: 2.0,
        }
    }

    fn report(status: SatelliteStatus) -> Frame {
        let header = Header::new(BOILER_ID, ZONE_1_ID, 0x2A, 0x10, ZONE_1_ID, MessageKind::Init);
        Frame::write(header, SATELLITE_STATUS_WRITE, SATELLITE_STATUS_WRITE, status.encode().to_vec())
    }

    fn config_push(destination: u8, source: u8) -> Frame {
        let header = Header::new(destination, source, 0x2A, 0x11, ZONE_1_ID, MessageKind::Init);
        Frame::write(header, ZONE_CONFIG, ZONE_CONFIG_WRITE, vec![160, 110, 30, 0x06, 0x84, 0x00])
    }

    fn status_request() -> Frame {
        let header = Header::new(ZONE_1_ID, BOILER_ID, 0x2A, 0x12, ZONE_1_ID, MessageKind::Read);
        Frame::read_request(header, SATELLITE_STATUS)
    }

    #[tokio::test(start_paused = true)]
    async fn test_physical_relays_reports_without_transmitting() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut bench = RoleBench::new(radio, &config(SatelliteMode::Physical));
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Physical);

        let status = SatelliteStatus {
            ambient: Temp16::from_celsius(19.5),
            target: Temp16::from_celsius(20.0),
            mode: 0x05,
            options: 0x04,
        };
        assert!(satellite.on_receive(&mut bench.ctx(), &report(status)).await.unwrap());
        assert!(satellite.on_receive(&mut bench.ctx(), &config_push(BOILER_ID, ZONE_1_ID)).await.unwrap());

        let zone = bench.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.ambient(), Some(19.5));
        assert_eq!(zone.target(), Some(20.0));
        assert_eq!(zone.comfort(), Some(21.0));
        assert_eq!(zone.mode(), ZoneMode::Comfort);
        assert_eq!(bench.publisher.last("zone1/ambient"), Some(crate::hooks::Telemetry::Temperature(19.5)));
        assert_eq!(log.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_physical_leaves_gateway_zone_alone() {
        let mut config = config(SatelliteMode::Physical);
        config.connect.enabled = true;
        let mut bench = RoleBench::new(FakeRadio::silent(), &config);
        bench.zones.get_mut(ZoneSlot::Z1).restore(&settings());
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Physical);

        let status = SatelliteStatus { ambient: Temp16(195), target: Temp16(200), mode: 5, options: 4 };
        assert!(satellite.on_receive(&mut bench.ctx(), &report(status)).await.unwrap());
        assert!(satellite.on_receive(&mut bench.ctx(), &config_push(BOILER_ID, ZONE_1_ID)).await.unwrap());

        let zone = bench.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.source(), Some(ZoneSource::Connect));
        assert_eq!(zone.ambient(), None);
        assert_eq!(zone.comfort(), Some(20.0));
        assert_eq!(zone.mode(), ZoneMode::Reduced);
        assert_eq!(bench.store.load_zone(ZoneSlot::Z1).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_physical_ignores_other_units() {
        let mut bench = RoleBench::new(FakeRadio::silent(), &config(SatelliteMode::Physical));
        let mut satellite = Satellite::new(ZoneSlot::Z2, SatelliteMode::Physical);

        let status = SatelliteStatus { ambient: Temp16(195), target: Temp16(200), mode: 5, options: 4 };
        assert!(!satellite.on_receive(&mut bench.ctx(), &report(status)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unassociated_virtual_stays_silent() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut bench = RoleBench::new(radio, &config(SatelliteMode::Virtual));
        bench.zones.get_mut(ZoneSlot::Z1).set_ambient(19.0);
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Virtual);

        assert!(!satellite.on_receive(&mut bench.ctx(), &status_request()).await.unwrap());
        assert_eq!(log.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_answers_status_request() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut bench = RoleBench::new(radio, &config(SatelliteMode::Virtual));
        let zone = bench.zones.get_mut(ZoneSlot::Z1);
        zone.restore(&settings());
        zone.set_ambient(18.5);
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Virtual);
        satellite.device_mut().restore(0x2A);

        let request = status_request();
        assert!(satellite.on_receive(&mut bench.ctx(), &request).await.unwrap());

        let reply = log.frames().pop().unwrap();
        assert_eq!(reply.header, request.header.reply());
        let status = SatelliteStatus::decode(reply.payload()).unwrap();
        assert_eq!(status.ambient.to_celsius(), 18.5);
        assert_eq!(status.target.to_celsius(), 17.0);
        assert_eq!(status.mode, 0x07);
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_applies_pushed_configuration() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut bench = RoleBench::new(radio, &config(SatelliteMode::Virtual));
        let zone = bench.zones.get_mut(ZoneSlot::Z1);
        zone.restore(&settings());
        zone.set_ambient(18.5);
        zone.set_boost(true, Instant::now());
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Virtual);
        satellite.device_mut().restore(0x2A);

        let push = config_push(ZONE_1_ID, BOILER_ID);
        assert!(satellite.on_receive(&mut bench.ctx(), &push).await.unwrap());

        let zone = bench.zones.get(ZoneSlot::Z1);
        assert_eq!(zone.mode(), ZoneMode::Comfort);
        assert_eq!(zone.reduced(), Some(16.0));
        // Local boost keeps the comfort setpoint
        assert_eq!(zone.comfort(), Some(20.0));
        assert!(bench.store.load_zone(ZoneSlot::Z1).unwrap().is_some());

        let reply = log.frames().pop().unwrap();
        assert_eq!(reply.header, push.header.reply());
        assert_eq!(reply.payload().len(), SatelliteStatus::LEN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_without_reading_does_not_answer() {
        let radio = FakeRadio::silent();
        let log = radio.log();
        let mut bench = RoleBench::new(radio, &config(SatelliteMode::Virtual));
        let mut satellite = Satellite::new(ZoneSlot::Z1, SatelliteMode::Virtual);
        satellite.device_mut().restore(0x2A);

        assert!(satellite.on_receive(&mut bench.ctx(), &status_request()).await.is_err());
        assert_eq!(log.attempts(), 0);

        let other = Frame::read_request(
            Header::new(ZONE_1_ID, BOILER_ID, 0x2A, 1, ZONE_1_ID, MessageKind::Other(0x05)),
            Region::new(0, 1),
        );
        assert!(!satellite.on_receive(&mut bench.ctx(), &other).await.unwrap());
    }

    #[test]
    fn test_active_setpoint() {
        let mut zone = Zone::new(ZoneSlot::Z1, Some(ZoneSource::VirtualSatellite));
        zone.restore(&settings());
        assert_eq!(active_setpoint(&zone), Some(17.0));

        zone.set_mode(ZoneMode::Comfort, Instant::now());
        zone.set_boost(true, Instant::now());
        assert_eq!(active_setpoint(&zone), Some(22.0));
    }
}
