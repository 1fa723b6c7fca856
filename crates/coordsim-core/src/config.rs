//! Simulation configuration

use std::collections::HashSet;
use std::time::Duration;

use crate::{CoordError, CoordResult, ProcessId};

/// How the Berkeley master averages collected readings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AverageMode {
    /// Floating point mean; corrections sum to zero
    #[default]
    Exact,
    /// Mean rounded down to a whole time unit
    Floor,
}

/// Leader election algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ElectionAlgorithm {
    #[default]
    Bully,
    Ring,
}

/// Simulation configuration
///
/// Processes are numbered `1..=process_count`. One tick of simulated time
/// advances every clock by `1 + drift` units and takes `tick_interval` of
/// real time.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Number of processes (at least 2)
    pub process_count: usize,
    /// Drift bound: each clock samples a fixed drift in `[-r, r]`, `0 <= r < 1`
    pub drift_range: f64,
    /// Bound on the random skew of initial clock values
    pub initial_offset_range: f64,
    /// Reference time the initial skew is applied to
    pub base_time: f64,
    /// Explicit initial clock values, one per process
    pub initial_clocks: Option<Vec<f64>>,
    /// Real duration of one simulated tick
    pub tick_interval: Duration,
    /// Period of automatic Berkeley rounds; zero disables them
    pub sync_interval: Duration,
    /// Bound on every Berkeley reply and correction acknowledgement wait
    pub reply_timeout: Duration,
    /// Bound on every election acknowledgement wait (per ring hop for rings)
    pub election_ack_timeout: Duration,
    /// Extra attempts for a ring rotation that never came back
    pub election_retries: u32,
    /// Time a process spends inside the critical section
    pub critical_section: Duration,
    /// Designated Berkeley master
    pub master_id: ProcessId,
    /// Coordinator at start; defaults to the highest id
    pub initial_coordinator: Option<ProcessId>,
    /// Ring order for token and ring election; defaults to ascending ids
    pub topology_order: Option<Vec<ProcessId>>,
    pub average_mode: AverageMode,
    /// Elect a new coordinator as soon as the current one is killed
    pub auto_reelect: bool,
    pub reelection_algorithm: ElectionAlgorithm,
    /// Processes that want the critical section at start
    pub critical_section_requests: Vec<ProcessId>,
    /// RNG seed for drift and skew; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            process_count: 6,
            drift_range: 0.05,
            initial_offset_range: 5.0,
            base_time: 0.0,
            initial_clocks: None,
            tick_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(20),
            reply_timeout: Duration::from_millis(500),
            election_ack_timeout: Duration::from_millis(500),
            election_retries: 3,
            critical_section: Duration::from_secs(1),
            master_id: ProcessId(1),
            initial_coordinator: None,
            topology_order: None,
            average_mode: AverageMode::Exact,
            auto_reelect: true,
            reelection_algorithm: ElectionAlgorithm::Bully,
            critical_section_requests: Vec::new(),
            seed: None,
        }
    }
}

impl SimConfig {
    /// Configuration with `count` processes and defaults elsewhere
    pub fn with_processes(count: usize) -> Self {
        SimConfig {
            process_count: count,
            ..Self::default()
        }
    }

    pub fn with_drift_range(mut self, range: f64) -> Self {
        self.drift_range = range;
        self
    }

    pub fn with_initial_offset_range(mut self, range: f64) -> Self {
        self.initial_offset_range = range;
        self
    }

    pub fn with_base_time(mut self, base: f64) -> Self {
        self.base_time = base;
        self
    }

    pub fn with_initial_clocks(mut self, clocks: Vec<f64>) -> Self {
        self.initial_clocks = Some(clocks);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_election_ack_timeout(mut self, timeout: Duration) -> Self {
        self.election_ack_timeout = timeout;
        self
    }

    pub fn with_election_retries(mut self, retries: u32) -> Self {
        self.election_retries = retries;
        self
    }

    pub fn with_critical_section(mut self, duration: Duration) -> Self {
        self.critical_section = duration;
        self
    }

    pub fn with_master(mut self, master: ProcessId) -> Self {
        self.master_id = master;
        self
    }

    pub fn with_initial_coordinator(mut self, coordinator: ProcessId) -> Self {
        self.initial_coordinator = Some(coordinator);
        self
    }

    pub fn with_topology(mut self, order: Vec<ProcessId>) -> Self {
        self.topology_order = Some(order);
        self
    }

    pub fn with_average_mode(mut self, mode: AverageMode) -> Self {
        self.average_mode = mode;
        self
    }

    pub fn with_auto_reelect(mut self, enabled: bool) -> Self {
        self.auto_reelect = enabled;
        self
    }

    pub fn with_reelection_algorithm(mut self, algorithm: ElectionAlgorithm) -> Self {
        self.reelection_algorithm = algorithm;
        self
    }

    pub fn with_critical_section_requests(mut self, ids: Vec<ProcessId>) -> Self {
        self.critical_section_requests = ids;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// All process ids, ascending
    pub fn process_ids(&self) -> Vec<ProcessId> {
        (1..=self.process_count as u32).map(ProcessId::new).collect()
    }

    /// Ring order used by token and ring election
    pub fn ring_order(&self) -> Vec<ProcessId> {
        self.topology_order
            .clone()
            .unwrap_or_else(|| self.process_ids())
    }

    /// Coordinator at start
    pub fn starting_coordinator(&self) -> ProcessId {
        self.initial_coordinator
            .unwrap_or(ProcessId::new(self.process_count as u32))
    }

    /// Check every option; configuration errors are fatal
    pub fn validate(&self) -> CoordResult<()> {
        if self.process_count < 2 {
            return Err(CoordError::InvalidConfig(format!(
                "process_count must be at least 2, got {}",
                self.process_count
            )));
        }
        if !self.drift_range.is_finite() || !(0.0..1.0).contains(&self.drift_range) {
            return Err(CoordError::InvalidConfig(format!(
                "drift_range must be in [0, 1), got {}",
                self.drift_range
            )));
        }
        if !self.initial_offset_range.is_finite() || self.initial_offset_range < 0.0 {
            return Err(CoordError::InvalidConfig(format!(
                "initial_offset_range must be non-negative, got {}",
                self.initial_offset_range
            )));
        }
        if !self.base_time.is_finite() {
            return Err(CoordError::InvalidConfig("base_time must be finite".into()));
        }
        if self.tick_interval.is_zero()
            || self.reply_timeout.is_zero()
            || self.election_ack_timeout.is_zero()
        {
            return Err(CoordError::InvalidConfig(
                "tick_interval, reply_timeout and election_ack_timeout must be non-zero".into(),
            ));
        }
        if let Some(clocks) = &self.initial_clocks {
            if clocks.len() != self.process_count {
                return Err(CoordError::InvalidConfig(format!(
                    "initial_clocks has {} values for {} processes",
                    clocks.len(),
                    self.process_count
                )));
            }
            if clocks.iter().any(|c| !c.is_finite()) {
                return Err(CoordError::InvalidConfig(
                    "initial_clocks must be finite".into(),
                ));
            }
        }

        let ids: HashSet<ProcessId> = self.process_ids().into_iter().collect();
        let known = |id: ProcessId| {
            if ids.contains(&id) {
                Ok(())
            } else {
                Err(CoordError::UnknownProcess(id))
            }
        };
        known(self.master_id)?;
        if let Some(coordinator) = self.initial_coordinator {
            known(coordinator)?;
        }
        for id in &self.critical_section_requests {
            known(*id)?;
        }

        if let Some(order) = &self.topology_order {
            if order.len() < 2 {
                return Err(CoordError::InvalidTopology(format!(
                    "ring needs at least 2 members, got {}",
                    order.len()
                )));
            }
            let unique: HashSet<ProcessId> = order.iter().copied().collect();
            if unique.len() != order.len() {
                return Err(CoordError::InvalidTopology(
                    "ring order lists a process twice".into(),
                ));
            }
            if unique != ids {
                return Err(CoordError::InvalidTopology(
                    "ring order must list every process exactly once".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.process_ids().len(), 6);
        assert_eq!(config.starting_coordinator(), ProcessId(6));
    }

    #[test]
    fn test_rejects_single_process() {
        let err = SimConfig::with_processes(1).validate().unwrap_err();
        assert!(matches!(err, CoordError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_runaway_drift() {
        let config = SimConfig::with_processes(3).with_drift_range(1.5);
        assert!(matches!(
            config.validate(),
            Err(CoordError::InvalidConfig(_))
        ));

        let config = SimConfig::with_processes(3).with_drift_range(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_master() {
        let config = SimConfig::with_processes(3).with_master(ProcessId(9));
        assert_eq!(
            config.validate(),
            Err(CoordError::UnknownProcess(ProcessId(9)))
        );
    }

    #[test]
    fn test_topology_validation() {
        let short = SimConfig::with_processes(2).with_topology(vec![ProcessId(1)]);
        assert!(matches!(
            short.validate(),
            Err(CoordError::InvalidTopology(_))
        ));

        let duplicate = SimConfig::with_processes(3)
            .with_topology(vec![ProcessId(1), ProcessId(2), ProcessId(2)]);
        assert!(matches!(
            duplicate.validate(),
            Err(CoordError::InvalidTopology(_))
        ));

        let custom = SimConfig::with_processes(3)
            .with_topology(vec![ProcessId(3), ProcessId(1), ProcessId(2)]);
        assert!(custom.validate().is_ok());
        assert_eq!(custom.ring_order()[0], ProcessId(3));
    }

    #[test]
    fn test_initial_clocks_length() {
        let config = SimConfig::with_processes(3).with_initial_clocks(vec![840.0, 826.0]);
        assert!(config.validate().is_err());

        let config = SimConfig::with_processes(3).with_initial_clocks(vec![840.0, 826.0, 860.0]);
        assert!(config.validate().is_ok());
    }
}
