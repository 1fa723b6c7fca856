//! Berkeley clock synchronization round
//!
//! The master polls every live peer, waits until all replied or the reply
//! timeout elapsed, then averages the readings it got (its own included) and
//! sends each responder the offset onto that average. Nothing is corrected
//! before collection ends.

use std::collections::BTreeSet;

use tokio::time::Instant;

use coordsim_core::{CoordError, CoordResult, Message, MessageKind, Payload, ProcessId};
use coordsim_time::SyncPlan;

use crate::actor::{LogicalProcess, Wait};

/// Result of one synchronization round
#[derive(Clone, Debug, PartialEq)]
pub struct SyncReport {
    pub round: u64,
    pub master: ProcessId,
    /// Time every included clock was moved to
    pub average: f64,
    /// Readings used, master first
    pub readings: Vec<(ProcessId, f64)>,
    pub corrections: Vec<(ProcessId, f64)>,
    /// Live processes that did not reply in time
    pub excluded: Vec<ProcessId>,
    /// Responders that never confirmed their correction
    pub unconfirmed: Vec<ProcessId>,
}

impl SyncReport {
    pub fn correction_for(&self, id: ProcessId) -> Option<f64> {
        self.corrections
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, c)| *c)
    }
}

impl LogicalProcess {
    /// Run one round with this process as master
    pub(crate) async fn run_sync_round(&mut self, round: u64) -> CoordResult<SyncReport> {
        self.ensure_alive()?;
        let master = self.id();
        let reply_timeout = self.ctx.config.reply_timeout;

        let mut pending: BTreeSet<ProcessId> = BTreeSet::new();
        for peer in self.alive_peers() {
            if self.send(Message::time_request(master, peer, round)) > 0 {
                pending.insert(peer);
            }
        }
        let mut readings = vec![(master, self.handle.read_clock())];
        tracing::debug!(%master, round, polled = pending.len(), "sync round started");

        let deadline = Instant::now() + reply_timeout;
        while !pending.is_empty() {
            match self.next_message(deadline).await {
                Wait::Message(message) => {
                    let reading = match (message.kind(), message.payload()) {
                        (MessageKind::TimeReply, Payload::Reading { round: r, value })
                            if *r == round =>
                        {
                            Some(*value)
                        }
                        _ => None,
                    };
                    match reading {
                        Some(value) if pending.remove(&message.sender()) => {
                            readings.push((message.sender(), value));
                        }
                        _ => self.dispatch(message),
                    }
                }
                Wait::Timeout => {
                    tracing::warn!(%master, round, missing = ?pending, "time replies timed out");
                    break;
                }
                Wait::Stopped => return Err(CoordError::ShutDown),
            }
        }
        let excluded: Vec<ProcessId> = pending.into_iter().collect();

        let plan = SyncPlan::compute(&readings, self.ctx.config.average_mode)
            .ok_or(CoordError::ProcessDead(master))?;

        let mut awaiting: BTreeSet<ProcessId> = BTreeSet::new();
        for &(id, delta) in &plan.corrections {
            if id == master {
                self.handle.apply_correction(delta);
            } else if self.send(Message::time_adjust(master, id, round, delta)) > 0 {
                awaiting.insert(id);
            }
        }

        let deadline = Instant::now() + reply_timeout;
        while !awaiting.is_empty() {
            match self.next_message(deadline).await {
                Wait::Message(message)
                    if message.acknowledges(round) && awaiting.remove(&message.sender()) => {}
                Wait::Message(message) => self.dispatch(message),
                Wait::Timeout => {
                    tracing::warn!(%master, round, missing = ?awaiting, "correction acks timed out");
                    break;
                }
                Wait::Stopped => return Err(CoordError::ShutDown),
            }
        }

        tracing::info!(
            %master,
            round,
            average = plan.average,
            included = readings.len(),
            excluded = excluded.len(),
            "clocks synchronized"
        );

        Ok(SyncReport {
            round,
            master,
            average: plan.average,
            readings,
            corrections: plan.corrections,
            excluded,
            unconfirmed: awaiting.into_iter().collect(),
        })
    }

    pub(crate) fn answer_time_request(&self, message: &Message) {
        if let Payload::Round(round) = message.payload() {
            let value = self.handle.read_clock();
            tracing::debug!(process = %self.id(), round, value, "reporting clock");
            self.send(Message::time_reply(
                self.id(),
                message.sender(),
                *round,
                value,
            ));
        }
    }

    pub(crate) fn apply_time_adjust(&self, message: &Message) {
        if let Payload::Correction { round, delta } = message.payload() {
            if let Some(value) = self.handle.apply_correction(*delta) {
                tracing::debug!(process = %self.id(), round, delta, value, "clock corrected");
                self.send(Message::ack(self.id(), message.sender(), *round));
            }
        }
    }
}
