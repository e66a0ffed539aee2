//! Per-unit protocol state: association and message sequencing

use crate::core::{Error, Result, UNASSOCIATED};
use super::frame::{Header, MessageKind};

/// Pairing state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    /// No association id, network operations are refused
    Unassociated,
    /// An association exchange is in flight
    Associating,
    /// Paired with the boiler
    Associated,
}

/// State common to every role: unit id, association and sequence counter
#[derive(Debug, Clone)]
pub struct Device {
    /// Wire id of the unit
    unit_id: u8,
    /// Association id, `UNASSOCIATED` when never paired
    association_id: u8,
    /// Sequence number of the last exchange
    sequence: u8,
    /// Current pairing state
    state: AssociationState,
}

impl Device {
    /// Creates the state of an unassociated unit
    pub fn new(unit_id: u8) -> Self {
        Device {
            unit_id,
            association_id: UNASSOCIATED,
            sequence: 0,
            state: AssociationState::Unassociated,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn association_id(&self) -> u8 {
        self.association_id
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Last sequence number handed out
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn is_associated(&self) -> bool {
        self.association_id != UNASSOCIATED
    }

    /// Adopts a persisted association id
    pub fn restore(&mut self, association_id: u8) {
        self.association_id = association_id;
        self.state = if association_id == UNASSOCIATED {
            AssociationState::Unassociated
        } else {
            AssociationState::Associated
        };
    }

    /// Fails with `NotAssociated` unless the unit is paired
    pub fn require_associated(&self) -> Result<()> {
        if self.is_associated() {
            Ok(())
        } else {
            Err(Error::NotAssociated(self.unit_id))
        }
    }

    /// Advances the sequence counter, wrapping modulo 256
    pub fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Header of a new logical exchange; consumes one sequence number
    pub fn header(&mut self, destination: u8, reception: u8, kind: MessageKind) -> Header {
        let sequence = self.next_sequence();
        Header::new(destination, self.unit_id, self.association_id, sequence, reception, kind)
    }

    /// Enters `Associating`, returning what to restore on failure
    pub(crate) fn begin_association(&mut self) -> AssociationState {
        std::mem::replace(&mut self.state, AssociationState::Associating)
    }

    /// Adopts the association id returned by the boiler
    pub(crate) fn complete_association(&mut self, association_id: u8) {
        self.association_id = association_id;
        self.state = AssociationState::Associated;
    }

    /// Leaves `Associating` without touching the previous pairing
    pub(crate) fn abort_association(&mut self, previous: AssociationState) {
        self.state = previous;
    }
}
