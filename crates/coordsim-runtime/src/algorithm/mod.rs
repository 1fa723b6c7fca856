//! Coordination algorithms
//!
//! Each algorithm is a set of steps run by a [`LogicalProcess`]: the
//! initiating side lives in a `run_*` method driven by an orchestrator
//! command, the responding side in handlers called from the process's
//! message dispatch. Nothing survives between invocations except the ring
//! order, the token and each process's view of the coordinator.
//!
//! [`LogicalProcess`]: crate::actor::LogicalProcess

mod berkeley;
mod bully;
mod election;
mod ring;
mod token_ring;

pub use berkeley::SyncReport;
pub use election::{ElectionOutcome, ElectionState};
pub use token_ring::RotationReport;

/// Algorithm families a process can run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordinationAlgorithm {
    BerkeleySync,
    TokenRingMutex,
    BullyElection,
    RingElection,
}

impl CoordinationAlgorithm {
    /// Name used in logs and timeout errors
    pub fn name(self) -> &'static str {
        match self {
            CoordinationAlgorithm::BerkeleySync => "berkeley sync",
            CoordinationAlgorithm::TokenRingMutex => "token rotation",
            CoordinationAlgorithm::BullyElection => "bully election",
            CoordinationAlgorithm::RingElection => "ring election",
        }
    }
}

impl From<coordsim_core::ElectionAlgorithm> for CoordinationAlgorithm {
    fn from(algorithm: coordsim_core::ElectionAlgorithm) -> Self {
        match algorithm {
            coordsim_core::ElectionAlgorithm::Bully => CoordinationAlgorithm::BullyElection,
            coordsim_core::ElectionAlgorithm::Ring => CoordinationAlgorithm::RingElection,
        }
    }
}
