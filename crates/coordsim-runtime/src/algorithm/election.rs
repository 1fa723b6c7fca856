//! Shared election pieces: outcome, per-round state, coordinator announcement

use std::collections::BTreeSet;

use tokio::time::Instant;

use coordsim_core::{
    CoordError, CoordResult, ElectionAlgorithm, Message, MessageKind, Payload, ProcessId,
};

use crate::actor::{LogicalProcess, Wait};
use crate::topology::relay_targets;

/// Result of one election
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub algorithm: ElectionAlgorithm,
    pub initiator: ProcessId,
    pub coordinator: ProcessId,
    /// `ELECTION` messages sent (bully probes, or ring hops)
    pub election_messages: usize,
    /// Processes that took part, initiator first
    pub participants: Vec<ProcessId>,
}

/// Election bookkeeping, fresh per round
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectionState {
    pub coordinator: Option<ProcessId>,
    pub pending_acks: BTreeSet<ProcessId>,
}

impl ElectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest responder wins; `fallback` wins when nobody answered
    pub fn decide(&mut self, fallback: ProcessId, responders: &[ProcessId]) -> ProcessId {
        let coordinator = responders.iter().copied().max().unwrap_or(fallback);
        self.coordinator = Some(coordinator);
        self.pending_acks.clear();
        coordinator
    }
}

impl LogicalProcess {
    /// Record `coordinator` locally and broadcast it, then wait for every
    /// live peer to acknowledge or for the ack timeout.
    pub(crate) async fn announce(
        &mut self,
        coordinator: ProcessId,
        epoch: u64,
    ) -> CoordResult<Vec<ProcessId>> {
        let id = self.id();
        self.handle.set_coordinator(Some(coordinator));

        let mut pending: BTreeSet<ProcessId> = self.alive_peers().into_iter().collect();
        self.send(Message::coordinator_broadcast(id, coordinator, epoch));

        let mut acknowledged = Vec::new();
        let deadline = Instant::now() + self.ctx.config.election_ack_timeout;
        while !pending.is_empty() {
            match self.next_message(deadline).await {
                Wait::Message(message)
                    if is_coordinator_ack(&message, coordinator, epoch)
                        && pending.remove(&message.sender()) =>
                {
                    acknowledged.push(message.sender());
                }
                Wait::Message(message) => self.dispatch(message),
                Wait::Timeout => {
                    tracing::warn!(process = %id, missing = ?pending, "coordinator acks timed out");
                    break;
                }
                Wait::Stopped => return Err(CoordError::ShutDown),
            }
        }
        Ok(acknowledged)
    }

    pub(crate) fn on_coordinator(&mut self, message: Message) {
        let id = self.id();
        let sender = message.sender();
        if let Payload::Leader {
            epoch,
            coordinator,
            pass,
        } = message.into_payload()
        {
            self.handle.set_coordinator(Some(coordinator));
            tracing::debug!(process = %id, %coordinator, epoch, "coordinator recorded");

            match pass {
                None => {
                    self.send(Message::coordinator_ack(id, sender, coordinator, epoch));
                }
                Some(pass) if pass.initiator == id => {
                    tracing::debug!(process = %id, epoch, "stale coordinator pass dropped");
                }
                Some(pass) => {
                    let relayed = self.relay_along(&pass.ring, pass.initiator, |to| {
                        Message::coordinator_relay(id, to, coordinator, pass.clone())
                    });
                    if relayed.is_none() {
                        tracing::warn!(process = %id, epoch, "coordinator pass has no live successor");
                    }
                }
            }
        }
    }

    /// Try the relay targets in ring order until one delivery succeeds.
    /// Returns the process that accepted the message.
    pub(crate) fn relay_along(
        &self,
        ring: &[ProcessId],
        initiator: ProcessId,
        build: impl Fn(ProcessId) -> Message,
    ) -> Option<ProcessId> {
        relay_targets(ring, self.id(), initiator)
            .into_iter()
            .find(|to| self.send(build(*to)) > 0)
    }
}

fn is_coordinator_ack(message: &Message, coordinator: ProcessId, epoch: u64) -> bool {
    message.kind() == MessageKind::Ok
        && matches!(
            message.payload(),
            Payload::Leader { epoch: e, coordinator: c, pass: None } if *e == epoch && *c == coordinator
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_picks_highest_responder() {
        let mut state = ElectionState::new();
        state.pending_acks.extend([ProcessId(3), ProcessId(4), ProcessId(5)]);

        let coordinator = state.decide(ProcessId(2), &[ProcessId(3), ProcessId(4)]);
        assert_eq!(coordinator, ProcessId(4));
        assert_eq!(state.coordinator, Some(ProcessId(4)));
        assert!(state.pending_acks.is_empty());
    }

    #[test]
    fn test_decide_falls_back_to_initiator() {
        let mut state = ElectionState::new();
        assert_eq!(state.decide(ProcessId(2), &[]), ProcessId(2));
    }

    #[test]
    fn test_coordinator_ack_matching() {
        let ack = Message::coordinator_ack(ProcessId(1), ProcessId(4), ProcessId(4), 7);
        assert!(is_coordinator_ack(&ack, ProcessId(4), 7));
        assert!(!is_coordinator_ack(&ack, ProcessId(4), 8));
        assert!(!is_coordinator_ack(&ack, ProcessId(3), 7));

        let plain = Message::ack(ProcessId(1), ProcessId(4), 7);
        assert!(!is_coordinator_ack(&plain, ProcessId(4), 7));
    }
}
