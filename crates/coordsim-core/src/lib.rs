//! Coordination simulator core - Fundamental types and primitives
//!
//! This crate defines the types shared by every layer of the simulator:
//! - Identifiers (ProcessId)
//! - Protocol messages (Message, MessageKind, Payload)
//! - Simulation configuration (SimConfig)
//! - Error taxonomy (CoordError)

pub mod config;
pub mod error;
pub mod id;
pub mod message;

pub use config::*;
pub use error::*;
pub use id::*;
pub use message::*;
