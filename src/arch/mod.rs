//! # Architecture Layer
//!
//! Target assembly for the port. Everything above this module is plain
//! Rust over the `context::Machine` and `timer::TickRegisters` seams and
//! builds on the host too.

#[cfg(target_arch = "avr")]
pub mod avr;
