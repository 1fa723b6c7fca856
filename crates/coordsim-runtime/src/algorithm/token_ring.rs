//! Token ring mutual exclusion
//!
//! A single token travels the ring. Its holder may run the critical section
//! if it asked to, then passes the token to the next live successor,
//! clearing its own flag before the send. The section is a timer in the
//! protocol loop; the holder keeps answering messages while it runs. A run ends when the token has gone
//! around the requested number of times and is back at the process that
//! started it; the token then rests there until the next run.

use std::sync::atomic::Ordering;

use tokio::time::Instant;

use coordsim_core::{Message, ProcessId, TokenPass};

use crate::actor::{HeldToken, LogicalProcess};
use crate::invariants::TokenLocation;

/// Result of a finished token run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationReport {
    pub initiator: ProcessId,
    /// Holders during the last rotation, in order
    pub visited: Vec<ProcessId>,
    /// Completed rotations
    pub rotations: u32,
    /// Processes that ran their critical section during the run
    pub served: Vec<ProcessId>,
    /// Where the token now rests
    pub holder: ProcessId,
}

impl RotationReport {
    fn from_pass(pass: &TokenPass, holder: ProcessId) -> Self {
        RotationReport {
            initiator: pass.initiator,
            visited: pass.visited.clone(),
            rotations: pass.completed,
            served: pass.served.clone(),
            holder,
        }
    }
}

impl LogicalProcess {
    /// Begin a run at `initiator`. This process must hold the resting
    /// token, unless no token exists yet.
    pub(crate) fn start_token(&mut self, initiator: ProcessId, rotations: Option<u32>) {
        let id = self.id();
        if !self.handle.is_alive() {
            return;
        }
        let fresh = matches!(
            self.ctx.monitor.location(),
            TokenLocation::NotIssued | TokenLocation::Lost
        );
        if self.parked.take().is_none() && !fresh {
            tracing::warn!(process = %id, "asked to start a token it does not hold");
            return;
        }

        let pass = TokenPass::new(initiator, rotations);
        if initiator == id {
            tracing::info!(process = %id, ?rotations, "token run started");
            self.take_token(pass);
            return;
        }

        self.handle.with_state(|state| state.holds_token = false);
        self.ctx.monitor.hand_off(id, initiator);
        if self.send(Message::token(id, initiator, pass)) == 0 {
            tracing::warn!(process = %id, %initiator, "initiator unreachable, token stays here");
            self.rest_token(None);
        }
    }

    pub(crate) fn on_token(&mut self, mut pass: TokenPass) {
        let id = self.id();
        if pass.is_parked() {
            tracing::debug!(process = %id, "resting token moved here");
            self.rest_token(None);
            return;
        }
        if self.ctx.stop_token.swap(false, Ordering::AcqRel) {
            tracing::info!(process = %id, "circulation stopped");
            let report = RotationReport::from_pass(&pass, id);
            self.rest_token(Some(report));
            return;
        }

        if pass.initiator != id && !self.ctx.bus.is_alive(pass.initiator) {
            tracing::warn!(process = %id, initiator = %pass.initiator, "token run orphaned, adopting it");
            pass.initiator = id;
            pass.visited.clear();
        }

        if pass.initiator == id && !pass.visited.is_empty() {
            pass.completed += 1;
            pass.remaining = pass.remaining.map(|left| left.saturating_sub(1));
            tracing::info!(
                process = %id,
                rotation = pass.completed,
                visited = ?pass.visited,
                "token rotation complete"
            );
            if pass.is_parked() {
                let report = RotationReport::from_pass(&pass, id);
                self.rest_token(Some(report));
                return;
            }
            pass.visited.clear();
        }

        self.take_token(pass);
    }

    /// Hold the token and either start the critical section or pass it on.
    /// The section runs on a timer in the protocol loop, so this process
    /// keeps answering its mailbox while it holds the token.
    fn take_token(&mut self, mut pass: TokenPass) {
        let id = self.id();
        self.handle.with_state(|state| state.holds_token = true);
        self.ctx.monitor.acquire(id);
        pass.visited.push(id);
        tracing::debug!(process = %id, "token acquired");

        let wants = self.handle.with_state(|state| {
            if state.wants_critical_section {
                state.in_critical_section = true;
                state.critical_section_entries += 1;
            }
            state.wants_critical_section
        });
        if !wants {
            self.forward_token(pass);
            return;
        }

        self.ctx.monitor.enter_critical_section(id);
        tracing::info!(process = %id, "entering critical section");
        self.holding = Some(HeldToken {
            pass,
            until: Instant::now() + self.ctx.config.critical_section,
        });
    }

    /// Leave the critical section once its time is up and pass the token
    /// on. A process that crashed meanwhile is not counted as served.
    pub(crate) fn finish_critical_section(&mut self) {
        let Some(HeldToken { mut pass, .. }) = self.holding.take() else {
            return;
        };
        let id = self.id();
        let completed = self.handle.with_state(|state| {
            state.in_critical_section = false;
            if state.alive {
                state.wants_critical_section = false;
            }
            state.alive
        });
        self.ctx.monitor.exit_critical_section(id);
        tracing::info!(process = %id, completed, "left critical section");

        if completed {
            pass.served.push(id);
        }
        self.forward_token(pass);
    }

    fn forward_token(&mut self, pass: TokenPass) {
        let id = self.id();
        if !self.handle.is_alive() {
            self.handle.with_state(|state| state.holds_token = false);
            tracing::warn!(process = %id, "holder died with the token");
            self.salvaged.push(pass);
            return;
        }

        let successors = self.ctx.topology.read().successors_of(id);
        for next in successors {
            self.handle.with_state(|state| state.holds_token = false);
            self.ctx.monitor.hand_off(id, next);
            if self.ctx.bus.send(Message::token(id, next, pass.clone())) > 0 {
                tracing::debug!(process = %id, %next, "token passed");
                return;
            }
            tracing::debug!(process = %id, %next, "successor unreachable, skipping");
        }

        tracing::warn!(process = %id, "no live successor, keeping the token");
        let report = RotationReport::from_pass(&pass, id);
        self.rest_token(Some(report));
    }

    /// Keep the token here until the next run
    fn rest_token(&mut self, report: Option<RotationReport>) {
        let id = self.id();
        self.handle.with_state(|state| state.holds_token = true);
        self.ctx.monitor.park(id);
        self.parked = Some(TokenPass::parked(id));
        tracing::debug!(process = %id, "token resting");

        if let Some(report) = report {
            if let Some(reply) = self.ctx.rotation_waiter.lock().take() {
                let _ = reply.send(report);
            }
        }
    }
}
