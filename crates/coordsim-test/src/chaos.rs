//! Chaos harness
//!
//! Runs a seeded random sequence of sync rounds, elections, token runs,
//! critical-section requests and crashes against one simulation, checking
//! after every step that:
//! - a finished election picked the highest live id
//! - a sync round left every live clock on the average
//! - a token run visited each live process exactly once, in ring order
//! - the token ledger recorded no duplicate or lost token
//! - no crashed process is reported as coordinator

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use coordsim_core::{CoordResult, ElectionAlgorithm, ProcessId};
use coordsim_runtime::Orchestrator;

use crate::scenario::ScenarioBuilder;

// ============================================================================
// CHAOS CONFIGURATION
// ============================================================================

/// Chaos run configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    pub processes: usize,
    pub steps: usize,
    pub seed: u64,
    /// Crashes stop once this many processes are left
    pub min_alive: usize,
    /// Relative weight of a crash among the other actions
    pub kill_weight: u32,
    /// Ring election for re-elections instead of bully
    pub ring_reelection: bool,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            processes: 6,
            steps: 30,
            seed: 0xC0FFEE,
            min_alive: 2,
            kill_weight: 1,
            ring_reelection: false,
        }
    }
}

impl ChaosConfig {
    /// Few processes, no crashes
    pub fn calm() -> Self {
        Self {
            processes: 4,
            steps: 15,
            kill_weight: 0,
            ..Self::default()
        }
    }

    /// Frequent crashes down to two survivors
    pub fn hostile() -> Self {
        Self {
            processes: 8,
            steps: 40,
            kill_weight: 4,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_ring_reelection(mut self, enabled: bool) -> Self {
        self.ring_reelection = enabled;
        self
    }
}

/// One step of a chaos run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChaosAction {
    Sync,
    Elect {
        initiator: ProcessId,
        algorithm: ElectionAlgorithm,
    },
    Rotate {
        initiator: ProcessId,
    },
    RequestCriticalSection(ProcessId),
    Kill(ProcessId),
    Tick(u32),
}

// ============================================================================
// CHAOS HARNESS
// ============================================================================

/// Result of a chaos run
#[derive(Clone, Debug, Default)]
pub struct ChaosResult {
    pub actions: Vec<ChaosAction>,
    pub kills: usize,
    pub elections: usize,
    pub rotations: usize,
    pub syncs: usize,
    pub violations: Vec<String>,
    pub survivors: Vec<ProcessId>,
}

impl ChaosResult {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Seeded chaos runner
pub struct ChaosHarness {
    config: ChaosConfig,
    rng: StdRng,
}

impl ChaosHarness {
    pub fn new(config: ChaosConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        ChaosHarness { config, rng }
    }

    /// Run every step. Must be called from within a multi-threaded tokio runtime.
    pub async fn run(&mut self) -> CoordResult<ChaosResult> {
        let reelection = if self.config.ring_reelection {
            ElectionAlgorithm::Ring
        } else {
            ElectionAlgorithm::Bully
        };
        let seed = self.config.seed;
        let mut sim = ScenarioBuilder::new()
            .with_processes(self.config.processes)
            .configure(|c| {
                c.with_seed(seed)
                    .with_drift_range(0.01)
                    .with_initial_offset_range(5.0)
                    .with_reelection_algorithm(reelection)
            })
            .start()?;

        let mut result = ChaosResult::default();
        for step in 0..self.config.steps {
            let alive = sim.alive_ids();
            let action = self.next_action(&alive);
            tracing::debug!(step, ?action, "chaos step");
            result.actions.push(action);

            if let Err(e) = self.apply(&sim, action, &mut result).await {
                result
                    .violations
                    .push(format!("step {step}: {action:?} failed: {e}"));
            }
            check_global(&sim, step, &mut result.violations);
        }

        result.survivors = sim.alive_ids();
        sim.shutdown().await;
        Ok(result)
    }

    fn next_action(&mut self, alive: &[ProcessId]) -> ChaosAction {
        let can_kill = alive.len() > self.config.min_alive;
        let kill_weight = if can_kill { self.config.kill_weight } else { 0 };
        let Some(&pick) = alive.choose(&mut self.rng) else {
            return ChaosAction::Sync;
        };

        let roll = self.rng.gen_range(0..(10 + kill_weight));
        match roll {
            0 | 1 => ChaosAction::Sync,
            2 => ChaosAction::Elect {
                initiator: pick,
                algorithm: ElectionAlgorithm::Bully,
            },
            3 => ChaosAction::Elect {
                initiator: pick,
                algorithm: ElectionAlgorithm::Ring,
            },
            4 | 5 => ChaosAction::Rotate { initiator: pick },
            6 | 7 => ChaosAction::RequestCriticalSection(pick),
            8 | 9 => ChaosAction::Tick(self.rng.gen_range(1..50)),
            _ => ChaosAction::Kill(pick),
        }
    }

    async fn apply(
        &self,
        sim: &Orchestrator,
        action: ChaosAction,
        result: &mut ChaosResult,
    ) -> CoordResult<()> {
        let violations = &mut result.violations;
        match action {
            ChaosAction::Sync => {
                if let Some(report) = sim.trigger_sync_round().await? {
                    result.syncs += 1;
                    for process in sim.snapshot() {
                        if (process.clock_value - report.average).abs() > 1e-6 {
                            violations.push(format!(
                                "round {}: {} at {} after sync to {}",
                                report.round, process.id, process.clock_value, report.average
                            ));
                        }
                    }
                }
            }
            ChaosAction::Elect {
                initiator,
                algorithm,
            } => {
                if let Some(outcome) = sim.trigger_election(initiator, algorithm).await? {
                    result.elections += 1;
                    expect_highest(sim, outcome.coordinator, violations);
                }
            }
            ChaosAction::Rotate { initiator } => {
                if let Some(report) = sim.run_token_rotation(initiator, 1).await? {
                    result.rotations += 1;
                    let expected = rotated(&sim.ring_order(), initiator);
                    if report.visited != expected {
                        violations.push(format!(
                            "token visited {:?}, expected {:?}",
                            report.visited, expected
                        ));
                    }
                }
            }
            ChaosAction::RequestCriticalSection(id) => {
                sim.request_critical_section(id)?;
            }
            ChaosAction::Kill(id) => {
                if let Some(report) = sim.kill_process(id).await? {
                    result.kills += 1;
                    if let Some(outcome) = report.reelection {
                        expect_highest(sim, outcome.coordinator, violations);
                    }
                }
            }
            ChaosAction::Tick(ticks) => sim.advance_ticks(ticks),
        }
        Ok(())
    }
}

fn expect_highest(sim: &Orchestrator, coordinator: ProcessId, violations: &mut Vec<String>) {
    let highest = sim.alive_ids().into_iter().max();
    if highest != Some(coordinator) {
        violations.push(format!(
            "{coordinator} elected while {highest:?} is the highest live process"
        ));
    }
}

fn check_global(sim: &Orchestrator, step: usize, violations: &mut Vec<String>) {
    if let Err(e) = sim.check_token_invariant() {
        violations.push(format!("step {step}: {e}"));
    }

    let alive = sim.alive_ids();
    if let Some(coordinator) = sim.coordinator() {
        if !alive.contains(&coordinator) {
            violations.push(format!("step {step}: dead {coordinator} is coordinator"));
        }
    }
    let holders = sim.snapshot().iter().filter(|s| s.holds_token).count();
    if holders > 1 {
        violations.push(format!("step {step}: {holders} processes hold the token"));
    }
}

/// `order` starting at `start`
pub fn rotated(order: &[ProcessId], start: ProcessId) -> Vec<ProcessId> {
    match order.iter().position(|id| *id == start) {
        Some(pos) => order[pos..].iter().chain(&order[..pos]).copied().collect(),
        None => order.to_vec(),
    }
}

/// Run the default chaos configuration
pub async fn run_standard_chaos() -> CoordResult<ChaosResult> {
    ChaosHarness::new(ChaosConfig::default()).run().await
}
