//! Berkeley averaging step
//!
//! The master collects one reading per responsive process (its own
//! included), averages them and hands every process the signed offset that
//! moves its clock onto the average. Positive corrections push a clock
//! forward, negative ones pull it back.

use coordsim_core::{AverageMode, ProcessId};

/// Outcome of the averaging step for one round
#[derive(Clone, Debug, PartialEq)]
pub struct SyncPlan {
    /// Target time every included clock is moved to
    pub average: f64,
    /// Signed correction per included process, in reading order
    pub corrections: Vec<(ProcessId, f64)>,
}

impl SyncPlan {
    /// Build the plan for a set of readings. `None` when nothing was read.
    pub fn compute(readings: &[(ProcessId, f64)], mode: AverageMode) -> Option<SyncPlan> {
        let average = average(readings.iter().map(|(_, t)| *t), mode)?;
        let corrections = readings
            .iter()
            .map(|(id, t)| (*id, average - t))
            .collect();
        Some(SyncPlan {
            average,
            corrections,
        })
    }

    /// Correction planned for `id`
    pub fn correction_for(&self, id: ProcessId) -> Option<f64> {
        self.corrections
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, c)| *c)
    }

    /// Sum of all corrections; `count * average - sum(readings)`
    pub fn total_correction(&self) -> f64 {
        self.corrections.iter().map(|(_, c)| c).sum()
    }

    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }
}

/// Average of a set of readings
pub fn average(readings: impl IntoIterator<Item = f64>, mode: AverageMode) -> Option<f64> {
    let (sum, count) = readings
        .into_iter()
        .fold((0.0_f64, 0_usize), |(sum, count), t| (sum + t, count + 1));
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    Some(match mode {
        AverageMode::Exact => mean,
        AverageMode::Floor => mean.floor(),
    })
}
