//! # avrport: AVR Port Layer for a Preemptive RTOS
//!
//! The machine-specific layer beneath a portable scheduler core on 8-bit
//! ATmega parts (ATmega328P, ATmega2560, ATmega32U4). It owns the only
//! code that touches registers directly: building a new task's first
//! register image, saving and restoring the register file on a switch,
//! programming the periodic tick, and handing control to the first task.
//! Task selection, tick bookkeeping and delays belong to the core, reached
//! through [`kernel::SchedulerCore`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Application Tasks                      │
//! ├────────────────────────────────────────────────────────┤
//! │             Scheduler Core (external)                  │
//! │        increment_tick() · switch_context()             │
//! ├────────────────────────────────────────────────────────┤
//! │            Kernel Interface (kernel.rs)                │
//! │  initialise_task · start_scheduler · yield_task · end  │
//! ├──────────────┬───────────────┬────────────────┬────────┤
//! │ Frame        │ Context       │ Tick Timer     │ Hooks  │
//! │ frame.rs     │ context.rs    │ timer.rs       │hooks.rs│
//! │ ─ image      │ ─ save        │ ─ threshold    │ ─ idle │
//! │ ─ layout     │ ─ restore     │ ─ configure    │ ─ fault│
//! ├──────────────┴───────────────┴────────────────┴────────┤
//! │  Task Record (task.rs) · Current Task (sync.rs)        │
//! ├────────────────────────────────────────────────────────┤
//! │         Arch Port (arch/avr.rs, target only)           │
//! │   naked save/restore · port_yield · tick vector        │
//! ├────────────────────────────────────────────────────────┤
//! │   ATmega hardware   │   Host model (sim.rs, tests)     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! One physical thread of control. Exactly one task's registers are live;
//! every other task is frozen, byte-exact, on its own stack. A task is
//! suspended only at an explicit yield or at the tick interrupt, and the
//! save/restore window runs with interrupts disabled. A tick that fires in
//! that window stays latched in the peripheral and is delivered once the
//! resumed task's SREG re-enables interrupts.
//!
//! ## Configuration
//!
//! Chip, tick source and scheduling policy are Cargo features; clock, tick
//! rate and minimal stack size are constants in [`config`]. Invalid
//! combinations fail the build.
//!
//! ## Memory Model
//!
//! - **No heap**: task stacks are `TaskStack<N>` statics owned by the application
//! - **No `alloc`**: pure `core`
//! - **Critical sections**: the `critical-section` crate, implemented by
//!   `avr-device` on target

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch, abi_avr_interrupt))]

pub mod arch;
pub mod config;
pub mod context;
pub mod frame;
pub mod hooks;
pub mod kernel;
#[cfg(not(target_arch = "avr"))]
pub mod sim;
pub mod sync;
pub mod task;
pub mod timer;
