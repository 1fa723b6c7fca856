//! Coordination simulator test harness
//!
//! This crate provides:
//! - A scenario builder with timings suited to fast, deterministic runs
//! - Literal scenarios for clock sync, elections and the token ring
//! - A seeded chaos harness that interleaves crashes with every algorithm
//!   and checks the coordination properties after each step

pub mod chaos;
pub mod scenario;

pub use chaos::*;
pub use scenario::*;
