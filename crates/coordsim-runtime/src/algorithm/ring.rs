//! Ring election
//!
//! The initiator snapshots the ring and sends its own id to its successor.
//! Each process appends its id and forwards along the snapshot, skipping
//! successors that cannot be reached. Once the list is back at the
//! initiator the highest id wins, and a second pass carries the result
//! around the ring.
//!
//! A process that joins or dies after the snapshot was taken does not change
//! the current pass; a pass that fails to return is retried on a fresh
//! snapshot.

use tokio::time::Instant;

use coordsim_core::{
    CoordError, CoordResult, ElectionAlgorithm, Message, MessageKind, Payload, ProcessId, RingPass,
};

use super::election::ElectionOutcome;
use crate::actor::{LogicalProcess, Wait};

impl LogicalProcess {
    pub(crate) async fn run_ring_election(&mut self, epoch: u64) -> CoordResult<ElectionOutcome> {
        self.ensure_alive()?;
        let id = self.id();
        let retries = self.ctx.config.election_retries;
        let mut attempt = 0;

        let candidates = loop {
            let ring = self.ring_snapshot()?;
            let budget = self.ctx.config.election_ack_timeout * ring.len() as u32;
            let pass = RingPass::new(epoch, id, ring).with_attempt(attempt);
            tracing::debug!(process = %id, epoch, attempt, ring = ?pass.ring, "ring election started");

            if self
                .relay_along(&pass.ring, id, |to| Message::ring_election(id, to, pass.clone()))
                .is_none()
            {
                tracing::warn!(process = %id, epoch, "no live successor, electing self");
                break pass.ids;
            }

            match self
                .await_returning_pass(MessageKind::Election, &pass, Instant::now() + budget)
                .await?
            {
                Some(ids) => break ids,
                None if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(process = %id, epoch, attempt, "ring election lost, retrying");
                }
                None => {
                    return Err(CoordError::ReplyTimeout {
                        stage: "ring election",
                        timeout: budget,
                    })
                }
            }
        };

        let coordinator = candidates.iter().copied().max().unwrap_or(id);
        self.handle.set_coordinator(Some(coordinator));

        let ring = self.ring_snapshot()?;
        let budget = self.ctx.config.election_ack_timeout * ring.len() as u32;
        let pass = RingPass::new(epoch, id, ring);
        let relayed = self
            .relay_along(&pass.ring, id, |to| {
                Message::coordinator_relay(id, to, coordinator, pass.clone())
            })
            .is_some();
        let returned = relayed
            && self
                .await_returning_pass(MessageKind::Coordinator, &pass, Instant::now() + budget)
                .await?
                .is_some();
        if relayed && !returned {
            tracing::warn!(process = %id, epoch, "coordinator pass lost, broadcasting instead");
            self.announce(coordinator, epoch).await?;
        }

        tracing::info!(
            process = %id,
            %coordinator,
            epoch,
            candidates = ?candidates,
            "ring election decided"
        );

        Ok(ElectionOutcome {
            algorithm: ElectionAlgorithm::Ring,
            initiator: id,
            coordinator,
            election_messages: candidates.len(),
            participants: candidates,
        })
    }

    /// Append this process to a candidate list and pass it on
    pub(crate) fn relay_ring_election(&mut self, mut pass: RingPass) {
        let id = self.id();
        if pass.initiator == id {
            tracing::debug!(process = %id, epoch = pass.epoch, "stale election pass dropped");
            return;
        }
        if pass.ids.contains(&id) {
            tracing::warn!(process = %id, epoch = pass.epoch, "election pass visited twice, dropping");
            return;
        }

        pass.ids.push(id);
        let relayed = self.relay_along(&pass.ring, pass.initiator, |to| {
            Message::ring_election(id, to, pass.clone())
        });
        match relayed {
            Some(to) => tracing::debug!(process = %id, %to, candidates = ?pass.ids, "election pass forwarded"),
            None => tracing::warn!(process = %id, epoch = pass.epoch, "election pass has no live successor"),
        }
    }

    /// Current ring, which must still hold this process and one other
    fn ring_snapshot(&self) -> CoordResult<Vec<ProcessId>> {
        let topology = self.ctx.topology.read();
        topology.ensure_ring()?;
        if !topology.contains(self.id()) {
            return Err(CoordError::ProcessDead(self.id()));
        }
        Ok(topology.members().to_vec())
    }

    /// Wait for `sent`, a pass of `kind`, to come back around.
    /// Returns the collected ids, or `None` on timeout.
    async fn await_returning_pass(
        &mut self,
        kind: MessageKind,
        sent: &RingPass,
        deadline: Instant,
    ) -> CoordResult<Option<Vec<ProcessId>>> {
        loop {
            match self.next_message(deadline).await {
                Wait::Message(message) => match returned_ids(&message, kind, sent) {
                    Some(ids) => return Ok(Some(ids)),
                    None => self.dispatch(message),
                },
                Wait::Timeout => return Ok(None),
                Wait::Stopped => return Err(CoordError::ShutDown),
            }
        }
    }
}

/// Ids carried by `message` if it is `sent` coming back: same kind,
/// initiator, epoch and attempt. Passes from earlier attempts are not.
fn returned_ids(message: &Message, kind: MessageKind, sent: &RingPass) -> Option<Vec<ProcessId>> {
    if message.kind() != kind {
        return None;
    }
    let pass = match message.payload() {
        Payload::Ring(pass) => pass,
        Payload::Leader {
            pass: Some(pass), ..
        } => pass,
        _ => return None,
    };
    let own = pass.initiator == sent.initiator
        && pass.epoch == sent.epoch
        && pass.attempt == sent.attempt;
    own.then(|| pass.ids.clone())
}
