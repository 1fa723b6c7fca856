//! Bully election
//!
//! The initiator probes every live process with a higher id. The highest
//! process that answers within the ack timeout becomes coordinator; if none
//! answers, the initiator wins. Silent processes count as dead for the round.

use tokio::time::Instant;

use coordsim_core::{CoordError, CoordResult, ElectionAlgorithm, Message, Payload, ProcessId};

use super::election::{ElectionOutcome, ElectionState};
use crate::actor::{LogicalProcess, Wait};

impl LogicalProcess {
    pub(crate) async fn run_bully_election(&mut self, epoch: u64) -> CoordResult<ElectionOutcome> {
        self.ensure_alive()?;
        let id = self.id();
        let mut state = ElectionState::new();

        let higher: Vec<ProcessId> = self
            .alive_peers()
            .into_iter()
            .filter(|peer| *peer > id)
            .collect();
        for &to in &higher {
            if self.send(Message::election(id, to, epoch)) > 0 {
                state.pending_acks.insert(to);
            }
        }
        let election_messages = higher.len();
        tracing::debug!(process = %id, epoch, probed = ?higher, "bully election started");

        let mut responders = Vec::new();
        let deadline = Instant::now() + self.ctx.config.election_ack_timeout;
        while !state.pending_acks.is_empty() {
            match self.next_message(deadline).await {
                Wait::Message(message)
                    if message.acknowledges(epoch)
                        && state.pending_acks.remove(&message.sender()) =>
                {
                    responders.push(message.sender());
                }
                Wait::Message(message) => self.dispatch(message),
                Wait::Timeout => {
                    tracing::warn!(
                        process = %id,
                        epoch,
                        silent = ?state.pending_acks,
                        "treating silent processes as dead"
                    );
                    break;
                }
                Wait::Stopped => return Err(CoordError::ShutDown),
            }
        }

        let coordinator = state.decide(id, &responders);
        self.announce(coordinator, epoch).await?;
        tracing::info!(process = %id, %coordinator, epoch, election_messages, "bully election decided");

        responders.sort();
        let mut participants = vec![id];
        participants.extend(responders);
        Ok(ElectionOutcome {
            algorithm: ElectionAlgorithm::Bully,
            initiator: id,
            coordinator,
            election_messages,
            participants,
        })
    }

    /// Answer a probe or relay a ring candidate list
    pub(crate) fn on_election(&mut self, message: Message) {
        let id = self.id();
        let sender = message.sender();
        match message.into_payload() {
            Payload::Round(epoch) => {
                tracing::debug!(process = %id, from = %sender, epoch, "answering election probe");
                self.send(Message::ack(id, sender, epoch));
            }
            Payload::Ring(pass) => self.relay_ring_election(pass),
            other => {
                tracing::warn!(process = %id, from = %sender, payload = ?other, "malformed election message");
            }
        }
    }
}
