//! Logical process actor
//!
//! Each process runs two tasks: a drift loop that advances its clock once
//! per tick, and a protocol loop that serves orchestrator commands and its
//! mailbox. While a round waits for replies, unrelated messages are handled
//! inline so two processes waiting on each other never deadlock.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use coordsim_core::{
    CoordError, CoordResult, ElectionAlgorithm, Message, MessageKind, Payload, ProcessId,
    SimConfig, TokenPass,
};
use coordsim_transport::{Mailbox, MessageBus, Received};

use crate::algorithm::{ElectionOutcome, RotationReport, SyncReport};
use crate::invariants::TokenMonitor;
use crate::process::ProcessHandle;
use crate::topology::RingTopology;

/// Orchestrator request to one process
pub(crate) enum Command {
    /// Act as Berkeley master for one round
    Sync {
        round: u64,
        reply: oneshot::Sender<CoordResult<SyncReport>>,
    },
    /// Initiate an election
    Elect {
        algorithm: ElectionAlgorithm,
        epoch: u64,
        reply: oneshot::Sender<CoordResult<ElectionOutcome>>,
    },
    /// Start a token run at `initiator`, handing over a parked token if needed
    StartToken {
        initiator: ProcessId,
        rotations: Option<u32>,
    },
    /// The process was marked dead; return every token it still had
    Crash {
        reply: oneshot::Sender<Vec<TokenPass>>,
    },
}

/// Everything a process shares with its peers and the orchestrator
#[derive(Clone)]
pub(crate) struct ProcessContext {
    pub bus: MessageBus,
    pub peers: Arc<[ProcessHandle]>,
    pub topology: Arc<RwLock<RingTopology>>,
    pub monitor: Arc<TokenMonitor>,
    pub config: Arc<SimConfig>,
    pub shutdown: watch::Receiver<bool>,
    /// Completed when the token parks
    pub rotation_waiter: Arc<Mutex<Option<oneshot::Sender<RotationReport>>>>,
    /// Asks a circulating token to park at its next holder
    pub stop_token: Arc<AtomicBool>,
}

/// Outcome of a bounded wait inside a round
pub(crate) enum Wait {
    Message(Message),
    Timeout,
    /// Shutdown, crash of this process, or bus gone
    Stopped,
}

/// Token kept while its holder is in the critical section
pub(crate) struct HeldToken {
    pub pass: TokenPass,
    /// When the section ends
    pub until: Instant,
}

/// One simulated process
pub struct LogicalProcess {
    pub(crate) handle: ProcessHandle,
    mailbox: Mailbox,
    pub(crate) ctx: ProcessContext,
    commands: mpsc::Receiver<Command>,
    /// Token resting here between runs
    pub(crate) parked: Option<TokenPass>,
    pub(crate) holding: Option<HeldToken>,
    /// Tokens that reached this process after it died
    pub(crate) salvaged: Vec<TokenPass>,
}

impl LogicalProcess {
    pub(crate) fn new(
        handle: ProcessHandle,
        mailbox: Mailbox,
        ctx: ProcessContext,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        LogicalProcess {
            handle,
            mailbox,
            ctx,
            commands,
            parked: None,
            holding: None,
            salvaged: Vec::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.handle.id()
    }

    /// Spawn the drift loop and the protocol loop
    pub(crate) fn spawn(self) -> Vec<JoinHandle<()>> {
        let drift = tokio::spawn(drift_loop(
            self.handle.clone(),
            self.ctx.config.tick_interval,
            self.ctx.shutdown.clone(),
        ));
        let protocol = tokio::spawn(self.run());
        vec![drift, protocol]
    }

    async fn run(mut self) {
        let id = self.id();
        tracing::debug!(process = %id, "process started");

        loop {
            if *self.ctx.shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = self.ctx.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = section_elapsed(&self.holding) => self.finish_critical_section(),
                command = self.commands.recv() => match command {
                    Some(Command::Crash { reply }) => {
                        self.crash(reply);
                        break;
                    }
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                message = self.mailbox.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => break,
                },
            }
        }

        tracing::debug!(process = %id, "process stopped");
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Sync { round, reply } => {
                let result = self.run_sync_round(round).await;
                let _ = reply.send(result);
            }
            Command::Elect {
                algorithm,
                epoch,
                reply,
            } => {
                let result = match algorithm {
                    ElectionAlgorithm::Bully => self.run_bully_election(epoch).await,
                    ElectionAlgorithm::Ring => self.run_ring_election(epoch).await,
                };
                let _ = reply.send(result);
            }
            Command::StartToken {
                initiator,
                rotations,
            } => self.start_token(initiator, rotations),
            Command::Crash { reply } => self.crash(reply),
        }
    }

    /// Handle a message that is not the one a round is waiting for
    pub(crate) fn dispatch(&mut self, message: Message) {
        if !self.handle.is_alive() {
            if let Payload::Token(pass) = message.into_payload() {
                self.salvaged.push(pass);
            }
            return;
        }

        match message.kind() {
            MessageKind::TimeRequest => self.answer_time_request(&message),
            MessageKind::TimeAdjust => self.apply_time_adjust(&message),
            MessageKind::Election => self.on_election(message),
            MessageKind::Coordinator => self.on_coordinator(message),
            MessageKind::Token => {
                if let Payload::Token(pass) = message.into_payload() {
                    self.on_token(pass);
                }
            }
            MessageKind::Ok | MessageKind::TimeReply => {
                tracing::debug!(
                    process = %self.id(),
                    from = %message.sender(),
                    kind = ?message.kind(),
                    "ignoring stale reply"
                );
            }
        }
    }

    /// Wait for the next message until `deadline`. A critical section
    /// that ends meanwhile is closed and its token passed on.
    pub(crate) async fn next_message(&mut self, deadline: Instant) -> Wait {
        loop {
            if !self.handle.is_alive() || *self.ctx.shutdown.borrow() {
                return Wait::Stopped;
            }
            let wait = tokio::select! {
                biased;
                _ = self.ctx.shutdown.changed() => Some(Wait::Stopped),
                _ = self.handle.killed() => Some(Wait::Stopped),
                _ = section_elapsed(&self.holding) => None,
                received = self.mailbox.receive_until(deadline) => Some(match received {
                    Received::Message(message) => Wait::Message(message),
                    Received::Timeout => Wait::Timeout,
                    Received::Closed => Wait::Stopped,
                }),
            };
            match wait {
                Some(wait) => return wait,
                None => self.finish_critical_section(),
            }
        }
    }

    /// Send unless this process is dead
    pub(crate) fn send(&self, message: Message) -> usize {
        if !self.handle.is_alive() {
            return 0;
        }
        self.ctx.bus.send(message)
    }

    /// Live peers other than this process, ascending
    pub(crate) fn alive_peers(&self) -> Vec<ProcessId> {
        let id = self.id();
        self.ctx
            .peers
            .iter()
            .filter(|peer| peer.id() != id && peer.is_alive())
            .map(|peer| peer.id())
            .collect()
    }

    pub(crate) fn ensure_alive(&self) -> CoordResult<()> {
        if self.handle.is_alive() {
            Ok(())
        } else {
            Err(CoordError::ProcessDead(self.id()))
        }
    }

    fn crash(&mut self, reply: oneshot::Sender<Vec<TokenPass>>) {
        self.handle.with_state(|state| {
            state.holds_token = false;
            state.in_critical_section = false;
        });

        let mut salvaged = std::mem::take(&mut self.salvaged);
        if let Some(held) = self.holding.take() {
            self.ctx.monitor.exit_critical_section(self.id());
            salvaged.push(held.pass);
        }
        salvaged.extend(self.parked.take());
        for message in self.mailbox.drain() {
            if let Payload::Token(pass) = message.into_payload() {
                salvaged.push(pass);
            }
        }

        tracing::warn!(process = %self.id(), tokens = salvaged.len(), "process crashed");
        let _ = reply.send(salvaged);
    }
}

/// Resolves when the current critical section is over; never without one
async fn section_elapsed(holding: &Option<HeldToken>) {
    match holding {
        Some(held) => tokio::time::sleep_until(held.until).await,
        None => std::future::pending().await,
    }
}

/// Advance the clock once per tick until shutdown or crash
async fn drift_loop(handle: ProcessHandle, tick: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = interval.tick() => {
                match handle.advance_clock(1.0) {
                    Some(value) => tracing::trace!(process = %handle.id(), value, "tick"),
                    None => break,
                }
            }
        }
    }
}
