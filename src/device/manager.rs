//! Owner of the zones and roles, and the scheduling loop driving them

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::core::{
    Error, GatewayConfig, NetworkId, Result, SatelliteMode, Zone, ZoneSlot, ZoneSource, Zones,
    OUTDOOR_PROBE_ID,
};
use crate::hooks::{Command, CommandHandle, Publisher, RoleKey, Store, Telemetry};
use crate::network::{self, Association, Radio, ReceiveNotifier, Transport};
use crate::protocol::frame::{Frame, Header};
use crate::protocol::registers::{ScanReport, ScanRequest, Session};
use crate::protocol::state::Device;
use super::{publish_zone, Connect, OutdoorProbe, RoleContext, Satellite, TemperatureSensor};

/// Commands buffered between two scheduler passes
const COMMAND_QUEUE: usize = 32;
/// Inbound frames serviced in one scheduler pass
const INBOUND_BURST: usize = 8;

/// Role an inbound frame is handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Connect,
    VirtualSatellite(ZoneSlot),
    OutdoorProbe,
    PhysicalSatellite(ZoneSlot),
}

#[derive(Default)]
struct Roles {
    connect: Option<Connect>,
    probe: Option<OutdoorProbe>,
    satellites: [Option<Satellite>; 3],
}

impl Roles {
    fn satellite_mut(&mut self, slot: ZoneSlot) -> Option<&mut Satellite> {
        self.satellites[slot.index()].as_mut()
    }

    /// Unit used for diagnostic memory access: the gateway when paired,
    /// otherwise the first paired satellite
    fn admin_device(&mut self) -> Option<&mut Device> {
        if let Some(connect) = self.connect.as_mut() {
            if connect.device().is_associated() {
                return Some(connect.device_mut());
            }
        }
        self.satellites
            .iter_mut()
            .flatten()
            .find(|satellite| satellite.device().is_associated())
            .map(Satellite::device_mut)
    }
}

/// Lends the disjoint shared fields of the manager to a role
macro_rules! context {
    ($manager:ident, $now:expr) => {
        RoleContext {
            transport: &mut $manager.transport,
            zones: &mut $manager.zones,
            store: &mut *$manager.store,
            publisher: &mut *$manager.publisher,
            now: $now,
        }
    };
}

/// Gateway front: routes inbound frames and drives every enabled role
pub struct Manager<R> {
    config: GatewayConfig,
    transport: Transport<R>,
    zones: Zones,
    roles: Roles,
    store: Box<dyn Store>,
    publisher: Box<dyn Publisher>,
    notifier: ReceiveNotifier,
    commands_tx: mpsc::Sender<Command>,
    commands: mpsc::Receiver<Command>,
}

impl<R: Radio> Manager<R> {
    /// Builds the roles the configuration enables
    pub fn new(
        config: GatewayConfig,
        mut radio: R,
        store: Box<dyn Store>,
        publisher: Box<dyn Publisher>,
    ) -> Result<Self> {
        config.validate()?;

        let notifier = ReceiveNotifier::new();
        radio.on_receive(notifier.clone());

        let mut roles = Roles::default();
        if config.connect.enabled {
            roles.connect = Some(Connect::new(&config));
        }
        if let Some(source) = config.outdoor_probe {
            roles.probe = Some(OutdoorProbe::new(source, config.boiler_id, config.timing.probe_interval));
        }
        for slot in ZoneSlot::ALL {
            let zone = config.zone(slot);
            if zone.enabled && zone.satellite != SatelliteMode::None {
                roles.satellites[slot.index()] = Some(Satellite::new(slot, zone.satellite));
            }
        }

        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        Ok(Manager {
            zones: Zones::new(&config),
            transport: Transport::new(radio, config.retry.clone()),
            config,
            roles,
            store,
            publisher,
            notifier,
            commands_tx,
            commands,
        })
    }

    /// Attaches the wired sensor of the outdoor probe
    pub fn with_sensor(mut self, sensor: Box<dyn TemperatureSensor>) -> Self {
        self.roles.probe = self.roles.probe.take().map(|probe| probe.with_sensor(sensor));
        self
    }

    /// Applies the persisted network filter, pairings and zone settings
    pub async fn begin(&mut self) -> Result<()> {
        let network = self.store.load_network_id()?.unwrap_or(self.config.network_id);
        self.transport.set_network_filter(network).await?;

        if let Some(connect) = self.roles.connect.as_mut() {
            connect.begin(&*self.store)?;
        }
        if let Some(probe) = self.roles.probe.as_mut() {
            probe.begin(&*self.store)?;
        }
        for satellite in self.roles.satellites.iter_mut().flatten() {
            satellite.begin(&*self.store)?;
        }

        for slot in ZoneSlot::ALL {
            if !self.zones.get(slot).is_enabled() {
                continue;
            }
            if let Some(settings) = self.store.load_zone(slot)? {
                self.zones.get_mut(slot).restore(&settings);
            }
        }

        if let Some(connect) = self.roles.connect.as_mut() {
            if connect.device().is_associated() {
                if let Err(err) = connect.fetch_clock(&mut context!(self, Instant::now())).await {
                    warn!(error = %err, "boiler clock unavailable");
                }
            }
        }

        info!(network = %network, boiler = self.config.boiler_id, "gateway started");
        Ok(())
    }

    /// First role matching `header`, checked in a fixed order
    pub fn route(&self, header: &Header) -> Option<Route> {
        if let Some(connect) = &self.roles.connect {
            if header.destination == connect.device().unit_id() {
                return Some(Route::Connect);
            }
        }

        let satellites = || self.roles.satellites.iter().flatten();
        if let Some(satellite) = satellites()
            .find(|s| s.is_virtual() && header.destination == s.device().unit_id())
        {
            return Some(Route::VirtualSatellite(satellite.slot()));
        }

        if self.roles.probe.is_some() && header.destination == OUTDOOR_PROBE_ID {
            return Some(Route::OutdoorProbe);
        }

        satellites()
            .find(|s| s.mode() == SatelliteMode::Physical && header.source == s.device().unit_id())
            .map(|s| Route::PhysicalSatellite(s.slot()))
    }

    /// Decodes one received frame and hands it to at most one role
    pub async fn dispatch(&mut self, bytes: &[u8]) -> Result<bool> {
        let frame = Frame::decode(bytes)?;
        let Some(route) = self.route(&frame.header) else {
            trace!(header = %frame.header, "no role for frame");
            return Ok(false);
        };
        debug!(header = %frame.header, route = ?route, "dispatching frame");

        let mut ctx = context!(self, Instant::now());
        match route {
            Route::Connect => match self.roles.connect.as_mut() {
                Some(connect) => connect.on_receive(&mut ctx, &frame).await,
                None => Ok(false),
            },
            Route::OutdoorProbe => match self.roles.probe.as_mut() {
                Some(probe) => probe.on_receive(&mut ctx, &frame).await,
                None => Ok(false),
            },
            Route::VirtualSatellite(slot) | Route::PhysicalSatellite(slot) => {
                match self.roles.satellite_mut(slot) {
                    Some(satellite) => satellite.on_receive(&mut ctx, &frame).await,
                    None => Ok(false),
                }
            }
        }
    }

    /// Reads one frame per receive notification; returns how many a role
    /// handled
    pub async fn service_inbound(&mut self) -> Result<usize> {
        self.transport.radio_mut().poll_events().await?;

        let mut handled = 0;
        for _ in 0..INBOUND_BURST {
            if !self.notifier.take() {
                break;
            }
            let Some(bytes) = self.transport.read_received().await? else {
                continue;
            };
            match self.dispatch(&bytes).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "inbound frame dropped"),
            }
        }
        Ok(handled)
    }

    fn edit_zone(&mut self, slot: ZoneSlot, edit: impl FnOnce(&mut Zone)) -> Result<()> {
        let zone = self.zones.get_mut(slot);
        if !zone.is_enabled() {
            return Err(Error::config(format!("{} is not configured", slot)));
        }
        edit(zone);
        if let Err(err) = self.store.save_zone(slot, &zone.settings()) {
            warn!(zone = %slot, error = %err, "failed to persist zone");
        }
        publish_zone(&mut *self.publisher, zone);
        Ok(())
    }

    /// Applies a change requested through the command hook
    pub async fn apply_command(&mut self, command: Command) -> Result<()> {
        debug!(command = ?command, "applying command");
        let now = Instant::now();
        match command {
            Command::SetDhwMode(mode) => {
                let connect = self
                    .roles
                    .connect
                    .as_mut()
                    .ok_or_else(|| Error::config("gateway role is disabled"))?;
                connect.set_dhw_mode(mode);
                connect.push_dhw_mode(&mut context!(self, now)).await
            }
            Command::SetOutdoorTemperature(value) => {
                let probe = self
                    .roles
                    .probe
                    .as_mut()
                    .ok_or_else(|| Error::config("outdoor probe is disabled"))?;
                probe.set_temperature(value)?;
                self.publisher.publish("outdoor/temperature", &Telemetry::Temperature(value));
                Ok(())
            }
            Command::SetAmbient(slot, value) => {
                if self.zones.get(slot).source() != Some(ZoneSource::VirtualSatellite) {
                    return Err(Error::config(format!("{} ambient is measured on the bus", slot)));
                }
                self.edit_zone(slot, |zone| zone.set_ambient(value))
            }
            Command::SetZoneMode(slot, mode) => self.edit_zone(slot, |zone| zone.set_mode(mode, now)),
            Command::SetComfort(slot, value) => self.edit_zone(slot, |zone| zone.set_comfort(value, now)),
            Command::SetReduced(slot, value) => self.edit_zone(slot, |zone| zone.set_reduced(value, now)),
            Command::SetFrost(slot, value) => self.edit_zone(slot, |zone| zone.set_frost(value, now)),
            Command::SetBoost(slot, on) => self.edit_zone(slot, |zone| zone.set_boost(on, now)),
            Command::SetBoostOffset(slot, offset) => {
                self.edit_zone(slot, |zone| zone.set_boost_offset(offset, now))
            }
        }
    }

    /// One scheduler pass: inbound frames, queued commands, then role polling
    pub async fn tick(&mut self) {
        if let Err(err) = self.service_inbound().await {
            warn!(error = %err, "receive failed");
        }

        while let Ok(command) = self.commands.try_recv() {
            if let Err(err) = self.apply_command(command).await {
                warn!(error = %err, "command rejected");
            }
        }

        let now = Instant::now();
        if let Some(connect) = self.roles.connect.as_mut() {
            if let Err(err) = connect.poll(&mut context!(self, now)).await {
                warn!(role = "connect", error = %err, "poll failed");
            }
        }
        if let Some(probe) = self.roles.probe.as_mut() {
            if let Err(err) = probe.poll(&mut context!(self, now)).await {
                warn!(role = "outdoor", error = %err, "poll failed");
            }
        }
        for satellite in self.roles.satellites.iter_mut().flatten() {
            if let Err(err) = satellite.poll(&mut context!(self, now)).await {
                warn!(role = "satellite", zone = %satellite.slot(), error = %err, "poll failed");
            }
        }
    }

    /// Runs scheduler passes every `period`, forever
    pub async fn run(&mut self, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    fn persist_pairing(&mut self, role: RoleKey, association: Association) -> Result<()> {
        self.store.save_association(role, association.association_id)?;
        self.store.save_network_id(association.network_id)?;
        info!(role = %role, association = association.association_id, "pairing saved");
        Ok(())
    }

    /// Pairs the gateway role with the boiler
    pub async fn pair_connect(&mut self) -> Result<Association> {
        let connect = self
            .roles
            .connect
            .as_mut()
            .ok_or_else(|| Error::config("gateway role is disabled"))?;
        if connect.is_passive() {
            return Err(Error::association("gateway is passive, capture the network id instead"));
        }
        let association =
            network::associate(&mut self.transport, connect.device_mut(), self.config.boiler_id).await?;
        self.persist_pairing(RoleKey::Connect, association)?;
        Ok(association)
    }

    /// Pairs the outdoor probe role with the boiler
    pub async fn pair_probe(&mut self) -> Result<Association> {
        let probe = self
            .roles
            .probe
            .as_mut()
            .ok_or_else(|| Error::config("outdoor probe is disabled"))?;
        let association =
            network::associate(&mut self.transport, probe.device_mut(), self.config.boiler_id).await?;
        self.persist_pairing(RoleKey::OutdoorProbe, association)?;
        Ok(association)
    }

    /// Pairs the virtual satellite of `slot` with the boiler
    pub async fn pair_satellite(&mut self, slot: ZoneSlot) -> Result<Association> {
        let satellite = self
            .roles
            .satellite_mut(slot)
            .ok_or_else(|| Error::config(format!("{} has no satellite", slot)))?;
        if !satellite.is_virtual() {
            return Err(Error::config(format!("{} satellite is a physical unit", slot)));
        }
        let association =
            network::associate(&mut self.transport, satellite.device_mut(), self.config.boiler_id).await?;
        self.persist_pairing(RoleKey::Satellite(slot), association)?;
        Ok(association)
    }

    /// Listens for the boiler's announcement and persists its network id
    pub async fn capture_network_id(&mut self) -> Result<NetworkId> {
        let timeout = self.config.timing.capture_timeout;
        let network_id =
            network::capture_network_id(&mut self.transport, self.config.boiler_id, timeout).await?;
        self.store.save_network_id(network_id)?;
        Ok(network_id)
    }

    fn session(&mut self) -> Result<Session<'_, R>> {
        let device = self
            .roles
            .admin_device()
            .ok_or_else(|| Error::protocol("no paired unit for memory access"))?;
        Ok(Session::new(device, &mut self.transport, self.config.boiler_id))
    }

    /// Reads a register region for diagnostics
    pub async fn read_memory(&mut self, address: u16, words: u16) -> Result<Bytes> {
        self.session()?.read_region(address, words).await
    }

    /// Probes a range of registers for diagnostics
    pub async fn scan_memory(&mut self, request: ScanRequest) -> Result<ScanReport> {
        self.session()?.scan(request).await
    }

    /// Transmits raw bytes for diagnostics
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.transmit_raw(bytes).await
    }

    /// Sender for the command hook
    pub fn handle(&self) -> CommandHandle {
        CommandHandle::new(self.commands_tx.clone())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn zone(&self, slot: ZoneSlot) -> &Zone {
        self.zones.get(slot)
    }

    pub fn connect(&self) -> Option<&Connect> {
        self.roles.connect.as_ref()
    }

    pub fn probe(&self) -> Option<&OutdoorProbe> {
        self.roles.probe.as_ref()
    }

    pub fn satellite(&self, slot: ZoneSlot) -> Option<&Satellite> {
        self.roles.satellites[slot.index()].as_ref()
    }

    pub fn transport(&self) -> &Transport<R> {
        &self.transport
    }
}
