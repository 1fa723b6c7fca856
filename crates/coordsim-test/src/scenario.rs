//! Scenario builder and literal coordination scenarios

use std::time::Duration;

use coordsim_core::{CoordResult, ProcessId, SimConfig};
use coordsim_runtime::Orchestrator;

// ============================================================================
// SCENARIO BUILDER
// ============================================================================

/// Builds an orchestrator with timings suited to tests: clocks only move
/// when told to, there is no periodic sync, and every wait is short.
pub struct ScenarioBuilder {
    config: SimConfig,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder {
            config: SimConfig::with_processes(5)
                .with_seed(1)
                .with_drift_range(0.0)
                .with_initial_offset_range(0.0)
                .with_tick_interval(Duration::from_secs(3600))
                .with_sync_interval(Duration::ZERO)
                .with_reply_timeout(Duration::from_millis(250))
                .with_election_ack_timeout(Duration::from_millis(250))
                .with_critical_section(Duration::from_millis(20)),
        }
    }

    pub fn with_processes(mut self, count: usize) -> Self {
        self.config.process_count = count;
        self
    }

    pub fn with_clocks(mut self, clocks: Vec<f64>) -> Self {
        self.config.process_count = clocks.len();
        self.config.initial_clocks = Some(clocks);
        self
    }

    pub fn with_topology(mut self, order: &[u32]) -> Self {
        self.config.topology_order = Some(ids(order));
        self
    }

    pub fn with_auto_reelect(mut self, enabled: bool) -> Self {
        self.config.auto_reelect = enabled;
        self
    }

    pub fn with_critical_section_requests(mut self, requests: &[u32]) -> Self {
        self.config.critical_section_requests = ids(requests);
        self
    }

    /// Apply any other configuration change
    pub fn configure(mut self, f: impl FnOnce(SimConfig) -> SimConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn build(self) -> CoordResult<Orchestrator> {
        Orchestrator::new(self.config)
    }

    /// Build and start. Must be called from within a tokio runtime.
    pub fn start(self) -> CoordResult<Orchestrator> {
        let mut orchestrator = self.build()?;
        orchestrator.start()?;
        Ok(orchestrator)
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids from raw numbers
pub fn ids(raw: &[u32]) -> Vec<ProcessId> {
    raw.iter().copied().map(ProcessId::new).collect()
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn settle(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coordsim_core::{AverageMode, CoordError, ElectionAlgorithm};

    fn p(id: u32) -> ProcessId {
        ProcessId::new(id)
    }

    fn coordinators(orchestrator: &Orchestrator) -> Vec<ProcessId> {
        orchestrator
            .snapshot()
            .iter()
            .filter(|s| s.is_coordinator)
            .map(|s| s.id)
            .collect()
    }

    fn holders(orchestrator: &Orchestrator) -> Vec<ProcessId> {
        orchestrator
            .snapshot()
            .iter()
            .filter(|s| s.holds_token)
            .map(|s| s.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Berkeley
    // ------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_berkeley_three_node_literal() {
        // 14:00, 13:46 and 14:20 in minutes
        let mut sim = ScenarioBuilder::new()
            .with_clocks(vec![840.0, 826.0, 860.0])
            .configure(|c| c.with_average_mode(AverageMode::Floor))
            .start()
            .unwrap();

        let report = sim.trigger_sync_round().await.unwrap().unwrap();
        assert_eq!(report.average, 842.0);
        assert_eq!(report.correction_for(p(1)), Some(2.0));
        assert_eq!(report.correction_for(p(2)), Some(16.0));
        assert_eq!(report.correction_for(p(3)), Some(-18.0));
        assert!(report.excluded.is_empty());
        assert!(report.unconfirmed.is_empty());

        for process in sim.snapshot() {
            assert_eq!(process.clock_value, 842.0, "{} not at 14:02", process.id);
        }

        let second = sim.trigger_sync_round().await.unwrap().unwrap();
        assert_eq!(second.average, 842.0);
        assert!(second.corrections.iter().all(|(_, c)| *c == 0.0));

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_berkeley_corrected_sum_matches_average() {
        let mut sim = ScenarioBuilder::new()
            .with_processes(6)
            .configure(|c| c.with_drift_range(0.05).with_initial_offset_range(5.0))
            .start()
            .unwrap();
        sim.advance_ticks(100);

        let before: Vec<f64> = sim.snapshot().iter().map(|s| s.clock_value).collect();
        let report = sim.trigger_sync_round().await.unwrap().unwrap();
        assert_eq!(report.readings.len(), 6);

        let corrected: f64 = report
            .readings
            .iter()
            .map(|(id, t)| t + report.correction_for(*id).unwrap())
            .sum();
        assert!((corrected - 6.0 * report.average).abs() < 1e-6);

        let after: Vec<f64> = sim.snapshot().iter().map(|s| s.clock_value).collect();
        assert!(after.iter().all(|t| (t - report.average).abs() < 1e-9));
        assert_ne!(before, after);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_berkeley_skips_dead_process() {
        let mut sim = ScenarioBuilder::new()
            .with_clocks(vec![100.0, 110.0, 120.0, 130.0])
            .with_auto_reelect(false)
            .start()
            .unwrap();

        sim.kill_process(p(4)).await.unwrap().unwrap();
        let report = sim.trigger_sync_round().await.unwrap().unwrap();

        assert_eq!(report.average, 110.0);
        assert_eq!(report.readings.len(), 3);
        assert!(report.correction_for(p(4)).is_none());
        assert!(sim.snapshot().iter().all(|s| s.id != p(4)));

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_berkeley_coordinator_stands_in_for_dead_master() {
        let mut sim = ScenarioBuilder::new().start().unwrap();

        sim.kill_process(p(1)).await.unwrap();
        let report = sim.trigger_sync_round().await.unwrap().unwrap();
        assert_eq!(report.master, p(5));

        sim.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Elections
    // ------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bully_literal() {
        let mut sim = ScenarioBuilder::new()
            .with_auto_reelect(false)
            .start()
            .unwrap();
        sim.kill_process(p(5)).await.unwrap();

        let outcome = sim
            .trigger_election(p(2), ElectionAlgorithm::Bully)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.coordinator, p(4));
        assert_eq!(outcome.election_messages, 2);
        assert_eq!(outcome.participants, ids(&[2, 3, 4]));

        assert_eq!(sim.coordinator(), Some(p(4)));
        assert!(settle(Duration::from_millis(500), || coordinators(&sim) == vec![p(4)]).await);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bully_from_highest_sends_nothing() {
        let mut sim = ScenarioBuilder::new().start().unwrap();

        let outcome = sim
            .trigger_election(p(5), ElectionAlgorithm::Bully)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.coordinator, p(5));
        assert_eq!(outcome.election_messages, 0);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ring_literal() {
        let mut sim = ScenarioBuilder::new()
            .with_auto_reelect(false)
            .start()
            .unwrap();
        sim.kill_process(p(5)).await.unwrap();

        let outcome = sim
            .trigger_election(p(2), ElectionAlgorithm::Ring)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.participants, ids(&[2, 3, 4, 1]));
        assert_eq!(outcome.coordinator, p(4));
        assert_eq!(outcome.election_messages, 4);
        assert!(settle(Duration::from_millis(500), || coordinators(&sim) == vec![p(4)]).await);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ring_follows_custom_order() {
        let mut sim = ScenarioBuilder::new()
            .with_topology(&[3, 1, 4, 2, 5])
            .start()
            .unwrap();

        let outcome = sim
            .trigger_election(p(1), ElectionAlgorithm::Ring)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.participants, ids(&[1, 4, 2, 5, 3]));
        assert_eq!(outcome.coordinator, p(5));

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coordinator_failure_reelects_highest_survivor() {
        let mut sim = ScenarioBuilder::new().start().unwrap();
        assert_eq!(sim.coordinator(), Some(p(5)));

        let report = sim.kill_coordinator().await.unwrap().unwrap();
        assert_eq!(report.id, p(5));
        assert!(report.was_coordinator);
        assert_eq!(report.reelection.map(|o| o.coordinator), Some(p(4)));
        assert_eq!(sim.coordinator(), Some(p(4)));

        let report = sim.kill_coordinator().await.unwrap().unwrap();
        assert_eq!(report.reelection.map(|o| o.coordinator), Some(p(3)));

        let survivors = coordinators(&sim);
        assert!(!survivors.contains(&p(5)));
        assert!(!survivors.contains(&p(4)));

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ring_reelection_after_coordinator_failure() {
        let mut sim = ScenarioBuilder::new()
            .configure(|c| c.with_reelection_algorithm(ElectionAlgorithm::Ring))
            .start()
            .unwrap();

        let report = sim.kill_process(p(5)).await.unwrap().unwrap();
        let outcome = report.reelection.unwrap();
        assert_eq!(outcome.algorithm, ElectionAlgorithm::Ring);
        assert_eq!(outcome.initiator, p(1));
        assert_eq!(outcome.coordinator, p(4));

        sim.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Token ring
    // ------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_rotation_serves_requests() {
        let mut sim = ScenarioBuilder::new()
            .with_critical_section_requests(&[2, 4])
            .start()
            .unwrap();

        let report = sim.run_token_rotation(p(1), 1).await.unwrap().unwrap();
        assert_eq!(report.visited, ids(&[1, 2, 3, 4, 5]));
        assert_eq!(report.served, ids(&[2, 4]));
        assert_eq!(report.rotations, 1);
        assert_eq!(report.holder, p(1));

        assert_eq!(sim.critical_section_entries(p(2)), Ok(1));
        assert_eq!(sim.critical_section_entries(p(3)), Ok(0));
        assert_eq!(holders(&sim), vec![p(1)]);
        assert!(sim.token_monitor().violations().is_empty());
        sim.check_token_invariant().unwrap();

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_skips_dead_process() {
        let mut sim = ScenarioBuilder::new().start().unwrap();
        sim.kill_process(p(3)).await.unwrap();

        let report = sim.run_token_rotation(p(1), 2).await.unwrap().unwrap();
        assert_eq!(report.visited, ids(&[1, 2, 4, 5]));
        assert_eq!(report.rotations, 2);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_follows_custom_order() {
        let mut sim = ScenarioBuilder::new()
            .with_topology(&[3, 1, 4, 2, 5])
            .start()
            .unwrap();

        let report = sim.run_token_rotation(p(4), 1).await.unwrap().unwrap();
        assert_eq!(report.visited, ids(&[4, 2, 5, 3, 1]));

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_recovered_from_dead_holder() {
        let mut sim = ScenarioBuilder::new().start().unwrap();
        sim.run_token_rotation(p(1), 1).await.unwrap().unwrap();

        let report = sim.kill_process(p(1)).await.unwrap().unwrap();
        assert_eq!(report.token_recovered_to, Some(p(2)));
        assert!(
            settle(Duration::from_millis(500), || {
                sim.token_monitor().parked_holder() == Some(p(2))
            })
            .await
        );
        sim.check_token_invariant().unwrap();

        let report = sim.run_token_rotation(p(3), 1).await.unwrap().unwrap();
        assert_eq!(report.visited, ids(&[3, 4, 5, 2]));
        assert_eq!(holders(&sim), vec![p(3)]);

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_circulating_token_is_busy_until_stopped() {
        let mut sim = ScenarioBuilder::new().start().unwrap();
        assert!(sim.circulate_token(p(2)).await.unwrap());

        assert!(settle(Duration::from_millis(500), || sim.token_monitor().hand_offs() > 10).await);
        assert_eq!(
            sim.run_token_rotation(p(1), 1).await,
            Err(CoordError::TokenBusy)
        );

        let stopped = sim.stop_circulation().await.unwrap().unwrap();
        assert_eq!(holders(&sim), vec![stopped.holder]);

        let report = sim.run_token_rotation(p(1), 1).await.unwrap().unwrap();
        assert_eq!(report.visited, ids(&[1, 2, 3, 4, 5]));
        assert!(sim.token_monitor().violations().is_empty());

        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rotation_rejects_zero_turns() {
        let mut sim = ScenarioBuilder::new().start().unwrap();
        assert!(matches!(
            sim.run_token_rotation(p(1), 0).await,
            Err(CoordError::InvalidConfig(_))
        ));
        sim.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Rounds overlapping a critical section
    // ------------------------------------------------------------------

    /// Critical sections far longer than any round's reply wait
    fn long_sections(requests: &[u32]) -> ScenarioBuilder {
        ScenarioBuilder::new()
            .configure(|c| {
                c.with_critical_section(Duration::from_millis(600))
                    .with_election_ack_timeout(Duration::from_millis(100))
                    .with_reply_timeout(Duration::from_millis(100))
            })
            .with_critical_section_requests(requests)
    }

    async fn wait_in_section(sim: &Orchestrator, id: ProcessId) {
        let inside = settle(Duration::from_secs(2), || {
            sim.snapshot()
                .iter()
                .any(|s| s.id == id && s.in_critical_section)
        })
        .await;
        assert!(inside, "{id} never entered its critical section");
    }

    fn in_section(sim: &Orchestrator, id: ProcessId) -> bool {
        sim.snapshot()
            .iter()
            .any(|s| s.id == id && s.in_critical_section)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bully_reaches_process_in_critical_section() {
        let mut sim = long_sections(&[5]).start().unwrap();
        assert!(sim.circulate_token(p(1)).await.unwrap());
        wait_in_section(&sim, p(5)).await;

        let outcome = sim
            .trigger_election(p(2), ElectionAlgorithm::Bully)
            .await
            .unwrap()
            .unwrap();
        assert!(in_section(&sim, p(5)));
        assert_eq!(outcome.coordinator, p(5));
        assert_eq!(outcome.participants, ids(&[2, 3, 4, 5]));
        assert_eq!(coordinators(&sim), vec![p(5)]);

        sim.stop_circulation().await.unwrap();
        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ring_pass_crosses_process_in_critical_section() {
        let mut sim = long_sections(&[4]).start().unwrap();
        assert!(sim.circulate_token(p(1)).await.unwrap());
        wait_in_section(&sim, p(4)).await;

        let outcome = sim
            .trigger_election(p(2), ElectionAlgorithm::Ring)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.coordinator, p(5));
        assert_eq!(outcome.participants, ids(&[2, 3, 4, 5, 1]));

        sim.stop_circulation().await.unwrap();
        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_includes_process_in_critical_section() {
        let mut sim = long_sections(&[3])
            .with_clocks(vec![10.0, 20.0, 30.0, 40.0, 50.0])
            .start()
            .unwrap();
        assert!(sim.circulate_token(p(1)).await.unwrap());
        wait_in_section(&sim, p(3)).await;

        let report = sim.trigger_sync_round().await.unwrap().unwrap();
        assert!(report.excluded.is_empty());
        assert!(report.unconfirmed.is_empty());
        assert_eq!(report.average, 30.0);
        assert_eq!(report.correction_for(p(3)), Some(0.0));

        sim.stop_circulation().await.unwrap();
        sim.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_holder_runs_its_own_round_mid_section() {
        let mut sim = long_sections(&[2]).start().unwrap();
        assert!(sim.circulate_token(p(1)).await.unwrap());
        wait_in_section(&sim, p(2)).await;

        let started = tokio::time::Instant::now();
        let outcome = sim
            .trigger_election(p(2), ElectionAlgorithm::Bully)
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(in_section(&sim, p(2)));
        assert_eq!(outcome.coordinator, p(5));

        let stopped = sim.stop_circulation().await.unwrap().unwrap();
        assert_eq!(stopped.served, ids(&[2]));
        assert_eq!(sim.critical_section_entries(p(2)), Ok(1));
        assert!(sim.token_monitor().violations().is_empty());

        sim.shutdown().await;
    }
}
