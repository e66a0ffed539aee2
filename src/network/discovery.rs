use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::{Error, NetworkId, Result};
use crate::protocol::frame::{Frame, MessageKind};
use crate::protocol::state::Device;
use super::{Radio, Transport};

/// Outcome of an active association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// Network the boiler runs
    pub network_id: NetworkId,
    /// Association id assigned to the unit
    pub association_id: u8,
}

impl Association {
    /// Size of the boiler's reply payload
    pub const LEN: usize = 5;

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(Error::decode(format!(
                "association reply carries {} bytes, {} expected",
                data.len(),
                Self::LEN
            )));
        }
        Ok(Association {
            network_id: NetworkId([data[0], data[1], data[2], data[3]]),
            association_id: data[4],
        })
    }
}

/// Pairs `device` with the boiler
///
/// Listens on the broadcast network for the exchange. On success the device
/// adopts the association id and the filter switches to the boiler's network;
/// on failure the previous filter and pairing state are restored.
pub async fn associate<R: Radio>(
    transport: &mut Transport<R>,
    device: &mut Device,
    boiler_id: u8,
) -> Result<Association> {
    let previous_network = transport.network();
    let previous_state = device.begin_association();
    info!(unit = device.unit_id(), "starting association");

    let outcome = match request_association(transport, device, boiler_id).await {
        Ok(association) => transport
            .set_network_filter(association.network_id)
            .await
            .map(|()| association),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(association) => {
            device.complete_association(association.association_id);
            info!(
                unit = device.unit_id(),
                network = %association.network_id,
                association = association.association_id,
                "association complete"
            );
            Ok(association)
        }
        Err(err) => {
            device.abort_association(previous_state);
            if let Err(restore) = transport.set_network_filter(previous_network).await {
                warn!(error = %restore, "failed to restore the network filter");
            }
            warn!(unit = device.unit_id(), error = %err, "association failed");
            Err(Error::association(format!("unit 0x{:02X}: {}", device.unit_id(), err)))
        }
    }
}

async fn request_association<R: Radio>(
    transport: &mut Transport<R>,
    device: &mut Device,
    boiler_id: u8,
) -> Result<Association> {
    transport.set_network_filter(NetworkId::BROADCAST).await?;

    let header = device.header(boiler_id, 0x01, MessageKind::Association);
    let request = Frame::data(header, Vec::new());
    let window = transport.policy().association_window;
    let reply = transport.exchange(&request, 1, window).await?;

    Association::decode(reply.payload())
}

/// Waits for an unsolicited boiler announcement and adopts its network id
///
/// The previous filter is restored when nothing qualifying arrives in time.
pub async fn capture_network_id<R: Radio>(
    transport: &mut Transport<R>,
    boiler_id: u8,
    timeout: Duration,
) -> Result<NetworkId> {
    let previous_network = transport.network();
    transport.set_network_filter(NetworkId::BROADCAST).await?;
    info!(timeout_secs = timeout.as_secs(), "listening for a boiler announcement");

    let deadline = Instant::now() + timeout;
    let announcement = transport
        .listen(deadline, |frame| {
            frame.header.source == boiler_id
                && frame.header.kind == MessageKind::Association
                && frame.payload().len() >= 4
        })
        .await;

    match announcement {
        Ok(frame) => {
            let data = frame.payload();
            let network_id = NetworkId([data[0], data[1], data[2], data[3]]);
            transport.set_network_filter(network_id).await?;
            info!(network = %network_id, "network id captured");
            Ok(network_id)
        }
        Err(err) => {
            if let Err(restore) = transport.set_network_filter(previous_network).await {
                warn!(error = %restore, "failed to restore the network filter");
            }
            Err(Error::association(format!("no boiler announcement: {}", err)))
        }
    }
}
