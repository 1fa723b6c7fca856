//! Coordination simulator runtime
//!
//! This crate provides:
//! - The logical process actor and its clock drift loop
//! - Berkeley clock synchronization, token ring mutual exclusion,
//!   bully election and ring election
//! - A ledger that checks the token ring's safety properties
//! - The orchestrator that wires processes together and injects crashes
//!
//! # Example
//!
//! ```no_run
//! use coordsim_core::{ElectionAlgorithm, ProcessId, SimConfig};
//! use coordsim_runtime::Orchestrator;
//!
//! # async fn run() -> coordsim_core::CoordResult<()> {
//! let mut sim = Orchestrator::new(SimConfig::with_processes(5).with_seed(42))?;
//! sim.start()?;
//!
//! sim.trigger_sync_round().await?;
//! sim.kill_process(ProcessId::new(5)).await?;
//! let outcome = sim.trigger_election(ProcessId::new(2), ElectionAlgorithm::Ring).await?;
//! assert_eq!(outcome.map(|o| o.coordinator), Some(ProcessId::new(4)));
//!
//! sim.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod algorithm;
pub mod invariants;
pub mod orchestrator;
pub mod process;
pub mod telemetry;
pub mod topology;

pub use actor::LogicalProcess;
pub use algorithm::*;
pub use invariants::{TokenLocation, TokenMonitor, TokenViolation};
pub use orchestrator::{KillReport, Orchestrator};
pub use process::{ProcessHandle, ProcessSnapshot, ProcessState};
pub use telemetry::{init_tracing, init_tracing_with};
pub use topology::RingTopology;
