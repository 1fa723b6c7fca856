//! Coordination simulator transport - in-process message delivery
//!
//! This crate provides:
//! - A message bus connecting every simulated process
//! - Per-process mailboxes with bounded-wait receive
//! - Silent loss of messages addressed to dead processes

pub mod bus;

pub use bus::*;
