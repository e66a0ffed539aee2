//! Peripheral roles the gateway plays on the boiler's network
//!
//! Every role keeps its own [`Device`](crate::protocol::state::Device) state
//! and borrows the shared parts (transport, zones, collaborators) through a
//! [`RoleContext`] for the duration of one call.

mod connect;
mod manager;
mod probe;
mod satellite;

pub use self::connect::Connect;
pub use self::manager::{Manager, Route};
pub use self::probe::{OutdoorProbe, TemperatureSensor};
pub use self::satellite::Satellite;

use tokio::time::Instant;

use crate::core::{Zone, Zones};
use crate::hooks::{Publisher, Store, Telemetry};
use crate::network::Transport;

/// Shared state lent to a role for one call
pub struct RoleContext<'a, R> {
    pub transport: &'a mut Transport<R>,
    pub zones: &'a mut Zones,
    pub store: &'a mut dyn Store,
    pub publisher: &'a mut dyn Publisher,
    /// Time the scheduler pass started
    pub now: Instant,
}

/// Publishes every known field of a zone
pub(crate) fn publish_zone(publisher: &mut dyn Publisher, zone: &Zone) {
    let prefix = zone.slot().to_string();
    let mut publish = |field: &str, value: Telemetry| {
        publisher.publish(&format!("{}/{}", prefix, field), &value);
    };

    publish("mode", Telemetry::ZoneMode(zone.mode()));
    publish("boost", Telemetry::Flag(zone.boost_active()));
    let temperatures = [
        ("comfort", zone.comfort()),
        ("reduced", zone.reduced()),
        ("frost", zone.frost()),
        ("ambient", zone.ambient()),
        ("target", zone.target()),
        ("supply", zone.supply()),
    ];
    for (field, value) in temperatures {
        if let Some(value) = value {
            publish(field, Telemetry::Temperature(value));
        }
    }
}
