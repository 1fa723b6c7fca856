//! Logical ring over process ids
//!
//! The ring is independent of numeric order. Crashed processes are removed,
//! so the successor of a crashed process's predecessor becomes the crashed
//! process's successor.

use coordsim_core::{CoordError, CoordResult, ProcessId};

/// Ring order used by the token and by ring election
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingTopology {
    order: Vec<ProcessId>,
}

impl RingTopology {
    /// Build a ring from an explicit order
    pub fn new(order: Vec<ProcessId>) -> CoordResult<Self> {
        if order.len() < 2 {
            return Err(CoordError::InvalidTopology(format!(
                "ring needs at least 2 members, got {}",
                order.len()
            )));
        }
        for (i, id) in order.iter().enumerate() {
            if order[..i].contains(id) {
                return Err(CoordError::InvalidTopology(format!(
                    "{} appears twice in the ring",
                    id
                )));
            }
        }
        Ok(RingTopology { order })
    }

    pub fn members(&self) -> &[ProcessId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.order.contains(&id)
    }

    /// Next member after `id`, `None` if `id` is absent or alone
    pub fn successor(&self, id: ProcessId) -> Option<ProcessId> {
        successors_in(&self.order, id).first().copied()
    }

    /// Every other member, starting after `id`
    pub fn successors_of(&self, id: ProcessId) -> Vec<ProcessId> {
        successors_in(&self.order, id)
    }

    /// Drop a member. Returns false if it was not in the ring.
    pub fn remove(&mut self, id: ProcessId) -> bool {
        let before = self.order.len();
        self.order.retain(|member| *member != id);
        self.order.len() != before
    }

    /// Fail unless at least two members remain
    pub fn ensure_ring(&self) -> CoordResult<()> {
        if self.order.len() < 2 {
            return Err(CoordError::InvalidTopology(format!(
                "ring needs at least 2 live members, got {}",
                self.order.len()
            )));
        }
        Ok(())
    }
}

/// Members after `id` in ring order, wrapping around, excluding `id`.
/// Empty when `id` is not a member.
pub fn successors_in(order: &[ProcessId], id: ProcessId) -> Vec<ProcessId> {
    match order.iter().position(|member| *member == id) {
        Some(pos) => order[pos + 1..]
            .iter()
            .chain(order[..pos].iter())
            .copied()
            .collect(),
        None => Vec::new(),
    }
}

/// Relay targets for a pass started by `initiator`, seen from `from`.
///
/// The initiator itself tries every other member in order. Any other member
/// tries its successors up to and including the initiator, so a pass never
/// skips past the process waiting for it.
pub fn relay_targets(order: &[ProcessId], from: ProcessId, initiator: ProcessId) -> Vec<ProcessId> {
    let successors = successors_in(order, from);
    if from == initiator {
        return successors;
    }
    match successors.iter().position(|id| *id == initiator) {
        Some(pos) => successors[..=pos].to_vec(),
        None => successors,
    }
}
