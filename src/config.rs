//! # Port Configuration
//!
//! Compile-time constants governing the tick, the register image and the
//! scheduling policy. Chip, tick source and policy come from Cargo features;
//! everything else is fixed here.
//!
//! Every derived value is computed in a `const` item, so an invalid
//! combination (a reserved timer, a rate the counter cannot express, a stack
//! too small for its first frame) fails the build rather than misprogramming
//! the hardware.

use crate::frame::FrameLayout;
use crate::timer::{Chip, ConfigError, TickMode, TickSource, TimerSetup, WATCHDOG_TICK_HZ};

/// CPU clock in Hz (16 MHz crystal on Uno/Mega/Leonardo class boards).
pub const CPU_CLOCK_HZ: u32 = 16_000_000;

/// Target part, from the chip feature.
pub const CHIP: Chip = if cfg!(feature = "atmega2560") {
    Chip::Atmega2560
} else if cfg!(feature = "atmega32u4") {
    Chip::Atmega32u4
} else {
    Chip::Atmega328p
};

/// Drive the tick from the watchdog interrupt instead of a timer.
pub const USE_WATCHDOG_TICK: bool = cfg!(feature = "watchdog-tick");

/// Hardware timer that generates the tick. Timers 0 and 1 are reserved.
pub const MCU_TIMER: u8 = if cfg!(feature = "timer3") { 3 } else { 2 };

/// Scheduler tick rate in Hz. The watchdog only offers its 15 ms period.
pub const TICK_RATE_HZ: u32 = if USE_WATCHDOG_TICK {
    WATCHDOG_TICK_HZ
} else {
    1000
};

/// Whether the tick interrupt may switch tasks, and how eagerly.
pub const TICK_MODE: TickMode = if cfg!(feature = "cooperative") {
    TickMode::Cooperative
} else if cfg!(feature = "switch-every-tick") {
    TickMode::PreemptiveEveryTick
} else {
    TickMode::Preemptive
};

/// Smallest task stack in bytes. Must hold the initial register image plus
/// the deepest call chain of the smallest task (the idle task).
pub const MINIMAL_STACK_SIZE: usize = 112;

/// Register image shape for the configured part.
pub const FRAME_LAYOUT: FrameLayout = CHIP.frame_layout();

/// Resolved tick peripheral.
pub const TICK_SOURCE: TickSource = match TickSource::select(CHIP, MCU_TIMER, USE_WATCHDOG_TICK) {
    Ok(source) => source,
    Err(err) => err.abort(),
};

/// Resolved tick configuration, including the compare threshold.
pub const TICK_SETUP: TimerSetup = match TimerSetup::derive(TICK_SOURCE, CPU_CLOCK_HZ, TICK_RATE_HZ) {
    Ok(setup) => setup,
    Err(err) => err.abort(),
};

const _: () = {
    // Force evaluation even when nothing references the setup
    let _ = TICK_SETUP;
    if MINIMAL_STACK_SIZE < FRAME_LAYOUT.frame_len() {
        ConfigError::StackTooSmall.abort();
    }
};
