//! Simulation orchestrator
//!
//! Owns the processes, the bus and the ring. It starts every process task,
//! drives the periodic Berkeley round, injects crashes and exposes the
//! control and observation API. Algorithm rounds are started by commanding
//! the initiating process and awaiting its completion signal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use coordsim_core::{
    CoordError, CoordResult, ElectionAlgorithm, Message, ProcessId, SimConfig, TokenPass,
};
use coordsim_time::{sample_symmetric, SimulatedClock};
use coordsim_transport::{BusStats, MessageBus};

use crate::actor::{Command, LogicalProcess, ProcessContext};
use crate::algorithm::{
    CoordinationAlgorithm, ElectionOutcome, RotationReport, SyncReport,
};
use crate::invariants::{TokenLocation, TokenMonitor};
use crate::process::{ProcessHandle, ProcessSnapshot, ProcessState};
use crate::topology::RingTopology;

const COMMAND_BUFFER: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What a crash injection changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillReport {
    pub id: ProcessId,
    pub was_coordinator: bool,
    /// Process that received a token the crashed one was holding
    pub token_recovered_to: Option<ProcessId>,
    /// Election run because the coordinator crashed
    pub reelection: Option<ElectionOutcome>,
}

struct Shared {
    config: Arc<SimConfig>,
    handles: Arc<[ProcessHandle]>,
    bus: MessageBus,
    topology: Arc<RwLock<RingTopology>>,
    monitor: Arc<TokenMonitor>,
    commands: BTreeMap<ProcessId, mpsc::Sender<Command>>,
    coordinator: Mutex<Option<ProcessId>>,
    rotation_waiter: Arc<Mutex<Option<oneshot::Sender<RotationReport>>>>,
    stop_token: Arc<AtomicBool>,
    started: AtomicBool,
    rounds: AtomicU64,
    epochs: AtomicU64,
}

impl Shared {
    fn ensure_started(&self) -> CoordResult<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoordError::NotStarted)
        }
    }

    fn handle(&self, id: ProcessId) -> CoordResult<&ProcessHandle> {
        self.handles
            .iter()
            .find(|handle| handle.id() == id)
            .ok_or(CoordError::UnknownProcess(id))
    }

    fn is_alive(&self, id: ProcessId) -> bool {
        self.handle(id).map(|h| h.is_alive()).unwrap_or(false)
    }

    async fn command(&self, id: ProcessId, command: Command) -> CoordResult<()> {
        let tx = self
            .commands
            .get(&id)
            .ok_or(CoordError::UnknownProcess(id))?;
        tx.send(command).await.map_err(|_| CoordError::ShutDown)
    }

    /// Send a command and await its result. A failure caused by the
    /// target crashing mid-round comes back as `Ok(None)`.
    async fn request<T>(
        &self,
        id: ProcessId,
        command: Command,
        reply: oneshot::Receiver<CoordResult<T>>,
    ) -> CoordResult<Option<T>> {
        let outcome = match self.command(id, command).await {
            Ok(()) => reply.await.unwrap_or(Err(CoordError::ShutDown)),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if !self.is_alive(id) => {
                tracing::debug!(process = %id, error = %e, "round abandoned by crashed process");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Designated master, or the coordinator while the master is down
    fn acting_master(&self) -> Option<ProcessId> {
        let master = self.config.master_id;
        if self.is_alive(master) {
            return Some(master);
        }
        (*self.coordinator.lock()).filter(|c| self.is_alive(*c))
    }

    async fn sync_round(&self) -> CoordResult<Option<SyncReport>> {
        self.ensure_started()?;
        let Some(master) = self.acting_master() else {
            tracing::warn!("no live master or coordinator, skipping sync round");
            return Ok(None);
        };
        if master != self.config.master_id {
            tracing::info!(%master, "master down, coordinator runs the sync round");
        }

        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply, rx) = oneshot::channel();
        self.request(master, Command::Sync { round, reply }, rx).await
    }

    async fn elect(
        &self,
        initiator: ProcessId,
        algorithm: ElectionAlgorithm,
    ) -> CoordResult<Option<ElectionOutcome>> {
        self.ensure_started()?;
        if !self.handle(initiator)?.is_alive() {
            return Ok(None);
        }
        if algorithm == ElectionAlgorithm::Ring {
            self.topology.read().ensure_ring()?;
        }

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            %initiator,
            epoch,
            algorithm = CoordinationAlgorithm::from(algorithm).name(),
            "election requested"
        );
        let (reply, rx) = oneshot::channel();
        let outcome = self
            .request(
                initiator,
                Command::Elect {
                    algorithm,
                    epoch,
                    reply,
                },
                rx,
            )
            .await?;

        if let Some(outcome) = &outcome {
            if self.is_alive(outcome.coordinator) {
                *self.coordinator.lock() = Some(outcome.coordinator);
            } else {
                tracing::warn!(coordinator = %outcome.coordinator, "elected coordinator crashed during the round");
            }
        }
        Ok(outcome)
    }

    fn alive_ids(&self) -> Vec<ProcessId> {
        self.handles
            .iter()
            .filter(|handle| handle.is_alive())
            .map(|handle| handle.id())
            .collect()
    }

    /// Worst-case time for `rotations` full turns of the ring
    fn rotation_budget(&self, rotations: u32) -> Duration {
        let hop = self.config.critical_section + self.config.reply_timeout;
        hop * self.handles.len() as u32 * rotations.max(1) + self.config.reply_timeout
    }
}

/// Periodically run a Berkeley round until shutdown
async fn sync_driver(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.config.sync_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => match shared.sync_round().await {
                Ok(Some(report)) => tracing::debug!(round = report.round, "periodic sync done"),
                Ok(None) => tracing::debug!("periodic sync skipped"),
                Err(CoordError::ShutDown) => break,
                Err(e) => tracing::warn!(error = %e, "periodic sync failed"),
            }
        }
    }
}

/// Runs a simulation of `process_count` logical processes
pub struct Orchestrator {
    shared: Arc<Shared>,
    /// Processes not yet spawned
    actors: Vec<LogicalProcess>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build every process from `config`. Nothing runs until [`start`].
    ///
    /// [`start`]: Orchestrator::start
    pub fn new(config: SimConfig) -> CoordResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let ids = config.process_ids();
        let topology = RingTopology::new(config.ring_order())?;
        let coordinator = config.starting_coordinator();

        let initial: Vec<f64> = match &config.initial_clocks {
            Some(clocks) => clocks.clone(),
            None => ids
                .iter()
                .map(|_| config.base_time + sample_symmetric(&mut rng, config.initial_offset_range))
                .collect(),
        };
        let handles: Vec<ProcessHandle> = ids
            .iter()
            .zip(initial)
            .map(|(&id, value)| {
                let clock = SimulatedClock::with_random_drift(value, config.drift_range, &mut rng);
                let mut state = ProcessState::new(id, clock);
                state.coordinator = Some(coordinator);
                state.wants_critical_section = config.critical_section_requests.contains(&id);
                tracing::debug!(process = %id, value, drift = state.clock.drift(), "process created");
                ProcessHandle::new(state)
            })
            .collect();
        let handles: Arc<[ProcessHandle]> = handles.into();

        let config = Arc::new(config);
        let (bus, mailboxes) = MessageBus::new(ids);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let topology = Arc::new(RwLock::new(topology));
        let monitor = Arc::new(TokenMonitor::new());
        let rotation_waiter = Arc::new(Mutex::new(None));
        let stop_token = Arc::new(AtomicBool::new(false));

        let ctx = ProcessContext {
            bus: bus.clone(),
            peers: handles.clone(),
            topology: topology.clone(),
            monitor: monitor.clone(),
            config: config.clone(),
            shutdown: shutdown_rx,
            rotation_waiter: rotation_waiter.clone(),
            stop_token: stop_token.clone(),
        };

        let mut commands = BTreeMap::new();
        let mut actors = Vec::with_capacity(handles.len());
        for (handle, mailbox) in handles.iter().cloned().zip(mailboxes) {
            let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
            commands.insert(handle.id(), tx);
            actors.push(LogicalProcess::new(handle, mailbox, ctx.clone(), rx));
        }

        let shared = Arc::new(Shared {
            config,
            handles,
            bus,
            topology,
            monitor,
            commands,
            coordinator: Mutex::new(Some(coordinator)),
            rotation_waiter,
            stop_token,
            started: AtomicBool::new(false),
            rounds: AtomicU64::new(0),
            epochs: AtomicU64::new(0),
        });

        Ok(Orchestrator {
            shared,
            actors,
            shutdown,
            tasks: Vec::new(),
        })
    }

    /// Spawn every process and the periodic sync driver.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> CoordResult<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for actor in self.actors.drain(..) {
            self.tasks.extend(actor.spawn());
        }
        if !self.shared.config.sync_interval.is_zero() {
            self.tasks.push(tokio::spawn(sync_driver(
                self.shared.clone(),
                self.shutdown.subscribe(),
            )));
        }
        tracing::info!(
            processes = self.shared.handles.len(),
            coordinator = ?self.coordinator(),
            "simulation started"
        );
        Ok(())
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("task did not stop within the grace period");
            }
        }
        tracing::info!("simulation stopped");
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Run one Berkeley round now. `Ok(None)` when neither the master nor
    /// the coordinator is alive.
    pub async fn trigger_sync_round(&self) -> CoordResult<Option<SyncReport>> {
        self.shared.sync_round().await
    }

    /// Run an election from `initiator`. `Ok(None)` if it is dead.
    pub async fn trigger_election(
        &self,
        initiator: ProcessId,
        algorithm: ElectionAlgorithm,
    ) -> CoordResult<Option<ElectionOutcome>> {
        self.shared.elect(initiator, algorithm).await
    }

    /// Ask `id` to enter its critical section on the next token visit.
    /// Returns false if `id` is dead.
    pub fn request_critical_section(&self, id: ProcessId) -> CoordResult<bool> {
        Ok(self.shared.handle(id)?.request_critical_section())
    }

    /// Circulate the token `rotations` times starting at `initiator` and
    /// wait until it rests there again. A resting token elsewhere is
    /// handed to `initiator` first.
    pub async fn run_token_rotation(
        &self,
        initiator: ProcessId,
        rotations: u32,
    ) -> CoordResult<Option<RotationReport>> {
        self.shared.ensure_started()?;
        if rotations == 0 {
            return Err(CoordError::InvalidConfig(
                "token run needs at least one rotation".into(),
            ));
        }
        if !self.shared.handle(initiator)?.is_alive() {
            return Ok(None);
        }

        let (reply, rx) = oneshot::channel();
        self.launch_token(initiator, Some(rotations), Some(reply))
            .await?;

        let budget = self.shared.rotation_budget(rotations);
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(report)) => {
                tracing::info!(
                    initiator = %report.initiator,
                    rotations = report.rotations,
                    served = ?report.served,
                    "token run finished"
                );
                Ok(Some(report))
            }
            Ok(Err(_)) => Err(CoordError::ShutDown),
            Err(_) => {
                self.shared.rotation_waiter.lock().take();
                self.check_token_invariant()?;
                Err(CoordError::ReplyTimeout {
                    stage: CoordinationAlgorithm::TokenRingMutex.name(),
                    timeout: budget,
                })
            }
        }
    }

    /// Start the token circulating without end. Returns false if
    /// `initiator` is dead.
    pub async fn circulate_token(&self, initiator: ProcessId) -> CoordResult<bool> {
        self.shared.ensure_started()?;
        if !self.shared.handle(initiator)?.is_alive() {
            return Ok(false);
        }
        self.launch_token(initiator, None, None).await?;
        Ok(true)
    }

    /// Park a circulating token at its next holder
    pub async fn stop_circulation(&self) -> CoordResult<Option<RotationReport>> {
        self.shared.ensure_started()?;
        let moving = matches!(
            self.shared.monitor.location(),
            TokenLocation::InFlight { .. } | TokenLocation::Held { parked: false, .. }
        );
        if !moving {
            return Ok(None);
        }

        let (reply, rx) = oneshot::channel();
        *self.shared.rotation_waiter.lock() = Some(reply);
        self.shared.stop_token.store(true, Ordering::Release);

        let budget = self.shared.rotation_budget(1);
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(report)) => Ok(Some(report)),
            Ok(Err(_)) => Err(CoordError::ShutDown),
            Err(_) => {
                self.shared.stop_token.store(false, Ordering::Release);
                self.shared.rotation_waiter.lock().take();
                self.check_token_invariant()?;
                Err(CoordError::ReplyTimeout {
                    stage: "stop token",
                    timeout: budget,
                })
            }
        }
    }

    async fn launch_token(
        &self,
        initiator: ProcessId,
        rotations: Option<u32>,
        reply: Option<oneshot::Sender<RotationReport>>,
    ) -> CoordResult<()> {
        let shared = &self.shared;
        let holder = match shared.monitor.location() {
            TokenLocation::NotIssued | TokenLocation::Lost => initiator,
            TokenLocation::Held {
                holder,
                parked: true,
            } if shared.is_alive(holder) => holder,
            TokenLocation::Held { parked: true, .. } => return Err(CoordError::MissingToken),
            TokenLocation::Held { .. } | TokenLocation::InFlight { .. } => {
                return Err(CoordError::TokenBusy)
            }
        };

        if let Some(reply) = reply {
            let mut waiter = shared.rotation_waiter.lock();
            if waiter.is_some() {
                return Err(CoordError::TokenBusy);
            }
            *waiter = Some(reply);
        }
        shared.stop_token.store(false, Ordering::Release);

        tracing::debug!(%holder, %initiator, ?rotations, "launching token run");
        shared
            .command(
                holder,
                Command::StartToken {
                    initiator,
                    rotations,
                },
            )
            .await
    }

    /// Crash `id`: it stops ticking, stops receiving, leaves the ring and
    /// gives up any token it had. A crashed coordinator triggers a new
    /// election when `auto_reelect` is on. `Ok(None)` if already dead.
    pub async fn kill_process(&self, id: ProcessId) -> CoordResult<Option<KillReport>> {
        self.shared.ensure_started()?;
        let shared = &self.shared;
        if !shared.handle(id)?.mark_dead() {
            return Ok(None);
        }
        shared.bus.mark_dead(id);

        let successor = {
            let mut topology = shared.topology.write();
            let next = topology
                .successors_of(id)
                .into_iter()
                .find(|p| shared.bus.is_alive(*p));
            topology.remove(id);
            next
        };
        tracing::warn!(process = %id, ?successor, "process killed");

        let salvaged = self.crash_actor(id).await;
        let resting = salvaged.iter().any(TokenPass::is_parked);
        let token_recovered_to = self.recover_tokens(id, successor, salvaged);
        if let Some(to) = token_recovered_to.filter(|_| resting) {
            self.await_resting_token(to).await;
        }

        for handle in shared.handles.iter().filter(|h| h.is_alive()) {
            if handle.coordinator() == Some(id) {
                handle.set_coordinator(None);
            }
        }
        let was_coordinator = {
            let mut coordinator = shared.coordinator.lock();
            if *coordinator == Some(id) {
                *coordinator = None;
                true
            } else {
                false
            }
        };

        let reelection = if was_coordinator && shared.config.auto_reelect {
            self.reelect().await?
        } else {
            None
        };

        Ok(Some(KillReport {
            id,
            was_coordinator,
            token_recovered_to,
            reelection,
        }))
    }

    /// Crash the current coordinator. `Ok(None)` if there is none.
    pub async fn kill_coordinator(&self) -> CoordResult<Option<KillReport>> {
        match self.coordinator() {
            Some(coordinator) => self.kill_process(coordinator).await,
            None => Ok(None),
        }
    }

    async fn crash_actor(&self, id: ProcessId) -> Vec<TokenPass> {
        let (reply, rx) = oneshot::channel();
        if self.shared.command(id, Command::Crash { reply }).await.is_err() {
            return Vec::new();
        }
        let config = &self.shared.config;
        let grace = config.reply_timeout * 2 + config.election_ack_timeout;
        match tokio::time::timeout(grace, rx).await {
            Ok(Ok(salvaged)) => salvaged,
            _ => {
                tracing::warn!(process = %id, "crashed process did not hand back its tokens");
                Vec::new()
            }
        }
    }

    fn recover_tokens(
        &self,
        id: ProcessId,
        successor: Option<ProcessId>,
        salvaged: Vec<TokenPass>,
    ) -> Option<ProcessId> {
        let shared = &self.shared;
        let mut recovered = None;
        for pass in salvaged {
            match successor.filter(|s| shared.bus.is_alive(*s)) {
                Some(to) => {
                    shared.monitor.hand_off(id, to);
                    if shared.bus.send(Message::token(id, to, pass)) > 0 {
                        tracing::info!(from = %id, %to, "token recovered");
                        recovered = Some(to);
                    }
                }
                None => tracing::warn!(process = %id, "token lost: no live successor"),
            }
        }
        if recovered.is_none() {
            shared.monitor.discard(id);
        }
        recovered
    }

    /// Wait until a resting token moved to `to` has arrived there
    async fn await_resting_token(&self, to: ProcessId) {
        let deadline = Instant::now() + self.shared.config.reply_timeout;
        while self.shared.monitor.parked_holder() != Some(to) {
            if Instant::now() >= deadline {
                tracing::warn!(process = %to, "recovered token has not arrived");
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn reelect(&self) -> CoordResult<Option<ElectionOutcome>> {
        let alive = self.alive_ids();
        let Some(&initiator) = alive.first() else {
            return Ok(None);
        };
        let algorithm = match self.shared.config.reelection_algorithm {
            ElectionAlgorithm::Ring if alive.len() >= 2 => ElectionAlgorithm::Ring,
            _ => ElectionAlgorithm::Bully,
        };
        tracing::info!(%initiator, ?algorithm, "coordinator lost, re-electing");
        self.shared.elect(initiator, algorithm).await
    }

    /// Advance every live clock by `ticks` right away
    pub fn advance_ticks(&self, ticks: u32) {
        for handle in self.shared.handles.iter() {
            handle.advance_clock(f64::from(ticks));
        }
    }

    /// State of every live process, by id
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.shared
            .handles
            .iter()
            .filter(|handle| handle.is_alive())
            .map(|handle| handle.snapshot())
            .collect()
    }

    pub fn coordinator(&self) -> Option<ProcessId> {
        *self.shared.coordinator.lock()
    }

    pub fn alive_ids(&self) -> Vec<ProcessId> {
        self.shared.alive_ids()
    }

    /// Current ring order over live processes
    pub fn ring_order(&self) -> Vec<ProcessId> {
        self.shared.topology.read().members().to_vec()
    }

    /// Critical sections `id` has run so far
    pub fn critical_section_entries(&self, id: ProcessId) -> CoordResult<u64> {
        Ok(self
            .shared
            .handle(id)?
            .with_state(|state| state.critical_section_entries))
    }

    pub fn bus_stats(&self) -> BusStats {
        self.shared.bus.stats()
    }

    pub fn token_monitor(&self) -> &TokenMonitor {
        &self.shared.monitor
    }

    /// Fail on a duplicate or lost token
    pub fn check_token_invariant(&self) -> CoordResult<()> {
        let shared = &self.shared;
        shared.monitor.check(|id| shared.is_alive(id))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n: usize) -> SimConfig {
        SimConfig::with_processes(n)
            .with_seed(7)
            .with_drift_range(0.0)
            .with_tick_interval(Duration::from_secs(3600))
            .with_sync_interval(Duration::ZERO)
            .with_reply_timeout(Duration::from_millis(200))
            .with_election_ack_timeout(Duration::from_millis(200))
            .with_critical_section(Duration::from_millis(10))
    }

    #[test]
    fn test_new_rejects_bad_config() {
        assert!(matches!(
            Orchestrator::new(SimConfig::with_processes(1)),
            Err(CoordError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_seeded_clocks_are_reproducible() {
        let a = Orchestrator::new(config(4).with_initial_offset_range(5.0)).unwrap();
        let b = Orchestrator::new(config(4).with_initial_offset_range(5.0)).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(a
            .snapshot()
            .iter()
            .all(|p| (p.clock_value - a.config().base_time).abs() <= 5.0));
    }

    #[tokio::test]
    async fn test_operations_need_start() {
        let orchestrator = Orchestrator::new(config(3)).unwrap();
        assert_eq!(
            orchestrator.trigger_sync_round().await,
            Err(CoordError::NotStarted)
        );
        assert_eq!(
            orchestrator.kill_process(ProcessId(1)).await,
            Err(CoordError::NotStarted)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_round_converges() {
        let mut orchestrator =
            Orchestrator::new(config(3).with_initial_clocks(vec![840.0, 826.0, 860.0])).unwrap();
        orchestrator.start().unwrap();

        let report = orchestrator.trigger_sync_round().await.unwrap().unwrap();
        assert_eq!(report.master, ProcessId(1));
        assert_eq!(report.average, 842.0);
        assert!(report.excluded.is_empty());
        assert!(orchestrator
            .snapshot()
            .iter()
            .all(|p| p.clock_value == 842.0));

        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_sync_runs_unprompted() {
        let mut orchestrator = Orchestrator::new(
            config(3)
                .with_initial_clocks(vec![10.0, 20.0, 30.0])
                .with_sync_interval(Duration::from_millis(50)),
        )
        .unwrap();
        orchestrator.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !orchestrator
            .snapshot()
            .iter()
            .all(|p| p.clock_value == 20.0)
        {
            assert!(Instant::now() < deadline, "no periodic round ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_and_dead_targets() {
        let mut orchestrator = Orchestrator::new(config(3)).unwrap();
        orchestrator.start().unwrap();

        assert_eq!(
            orchestrator
                .trigger_election(ProcessId(9), ElectionAlgorithm::Bully)
                .await,
            Err(CoordError::UnknownProcess(ProcessId(9)))
        );

        orchestrator.kill_process(ProcessId(1)).await.unwrap();
        assert_eq!(orchestrator.kill_process(ProcessId(1)).await, Ok(None));
        assert_eq!(
            orchestrator
                .trigger_election(ProcessId(1), ElectionAlgorithm::Bully)
                .await,
            Ok(None)
        );
        assert_eq!(orchestrator.request_critical_section(ProcessId(1)), Ok(false));

        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ring_election_needs_two_live_members() {
        let mut orchestrator = Orchestrator::new(config(2).with_auto_reelect(false)).unwrap();
        orchestrator.start().unwrap();

        orchestrator.kill_process(ProcessId(2)).await.unwrap();
        assert!(matches!(
            orchestrator
                .trigger_election(ProcessId(1), ElectionAlgorithm::Ring)
                .await,
            Err(CoordError::InvalidTopology(_))
        ));

        let outcome = orchestrator
            .trigger_election(ProcessId(1), ElectionAlgorithm::Bully)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.coordinator, ProcessId(1));
        assert_eq!(outcome.election_messages, 0);

        orchestrator.shutdown().await;
    }
}
