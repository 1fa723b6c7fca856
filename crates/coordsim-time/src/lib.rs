//! Coordination simulator time - simulated clocks and clock averaging
//!
//! This crate implements:
//! - Drifting per-process clocks that advance once per simulated tick
//! - Signed corrections that bypass drift
//! - The Berkeley averaging step (mean of readings, per-process corrections)

pub mod berkeley;
pub mod clock;

pub use berkeley::*;
pub use clock::*;
