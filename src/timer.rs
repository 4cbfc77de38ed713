//! # Tick Timer Driver
//!
//! Claims exactly one periodic interrupt source and turns it into the
//! scheduler's time base. The source is fixed at build time:
//!
//! | Source   | Counter | Prescaler | Parts                  |
//! |----------|---------|-----------|------------------------|
//! | Timer 2  | 8-bit   | 64        | ATmega328P, ATmega2560 |
//! | Timer 3  | 16-bit  | 64        | ATmega2560, ATmega32U4 |
//! | Watchdog | -       | -         | all (≈15 ms period)    |
//!
//! Timers 0 and 1 belong to the board runtime (millis, PWM, tone) and are
//! never claimed.
//!
//! The compare threshold is derived in a `const fn` so that an impossible
//! configuration stops the build instead of programming the wrong rate.

use crate::frame::FrameLayout;
use crate::kernel::SchedulerCore;

/// Prescaler selected for both compare-match timers.
pub const CLOCK_PRESCALER: u32 = 64;

/// Tick rate when the watchdog's shortest timeout (15 ms) drives the tick.
pub const WATCHDOG_TICK_HZ: u32 = 1000 / 15;

/// Supported parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    Atmega328p,
    Atmega2560,
    Atmega32u4,
}

impl Chip {
    /// Register image shape for this part.
    pub const fn frame_layout(self) -> FrameLayout {
        match self {
            Chip::Atmega2560 => FrameLayout::EXTENDED,
            Chip::Atmega328p | Chip::Atmega32u4 => FrameLayout::CLASSIC,
        }
    }

    /// Whether the part has timer `number`.
    pub const fn has_timer(self, number: u8) -> bool {
        match self {
            Chip::Atmega328p => number <= 2,
            Chip::Atmega2560 => number <= 5,
            Chip::Atmega32u4 => matches!(number, 0 | 1 | 3 | 4),
        }
    }
}

/// Build configuration problems. Never seen at run time: `config` turns
/// them into compile errors through [`ConfigError::abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Timer 0 or 1, already used by the board runtime.
    ReservedTimer(u8),
    /// The part has no such timer, or it cannot drive the tick.
    TimerUnavailable(u8),
    /// Zero tick rate or prescaler.
    ZeroRate,
    /// Tick rate faster than one prescaled timer clock.
    TickRateTooHigh,
    /// Threshold does not fit the counter.
    CompareOverflow,
    /// The watchdog runs at a fixed rate other than the configured one.
    WatchdogRateMismatch,
    /// Minimal stack cannot hold an initial register image.
    StackTooSmall,
}

impl ConfigError {
    /// Stop const evaluation with a message naming the problem.
    pub const fn abort(self) -> ! {
        match self {
            ConfigError::ReservedTimer(_) => {
                panic!("timers 0 and 1 are used by the board runtime; choose timer 2, timer 3 or the watchdog")
            }
            ConfigError::TimerUnavailable(_) => {
                panic!("the selected tick timer is not available on this part")
            }
            ConfigError::ZeroRate => panic!("tick rate and prescaler must be non-zero"),
            ConfigError::TickRateTooHigh => {
                panic!("tick rate exceeds the prescaled timer clock")
            }
            ConfigError::CompareOverflow => {
                panic!("tick rate too low: compare threshold overflows the timer counter")
            }
            ConfigError::WatchdogRateMismatch => {
                panic!("the watchdog tick runs at WATCHDOG_TICK_HZ only")
            }
            ConfigError::StackTooSmall => {
                panic!("MINIMAL_STACK_SIZE cannot hold an initial register image")
            }
        }
    }
}

/// Peripheral that generates the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    Timer2,
    Timer3,
    Watchdog,
}

impl TickSource {
    /// Resolve the configured timer number (or the watchdog) for `chip`.
    pub const fn select(chip: Chip, timer: u8, watchdog: bool) -> Result<Self, ConfigError> {
        if watchdog {
            return Ok(TickSource::Watchdog);
        }
        match timer {
            0 | 1 => Err(ConfigError::ReservedTimer(timer)),
            2 if chip.has_timer(2) => Ok(TickSource::Timer2),
            3 if chip.has_timer(3) => Ok(TickSource::Timer3),
            _ => Err(ConfigError::TimerUnavailable(timer)),
        }
    }

    /// Counter width in bits; zero for the watchdog, which has no compare register.
    pub const fn counter_bits(self) -> u32 {
        match self {
            TickSource::Timer2 => 8,
            TickSource::Timer3 => 16,
            TickSource::Watchdog => 0,
        }
    }
}

/// `floor(clock_hz / tick_hz / prescaler) - 1`, checked against the counter width.
pub const fn compare_match(
    clock_hz: u32,
    tick_hz: u32,
    prescaler: u32,
    counter_bits: u32,
) -> Result<u16, ConfigError> {
    if tick_hz == 0 || prescaler == 0 {
        return Err(ConfigError::ZeroRate);
    }
    let counts = clock_hz / tick_hz / prescaler;
    if counts == 0 {
        return Err(ConfigError::TickRateTooHigh);
    }
    let compare = counts - 1;
    let max = (1u32 << counter_bits) - 1;
    if compare > max {
        return Err(ConfigError::CompareOverflow);
    }
    Ok(compare as u16)
}

/// Fully resolved tick configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetup {
    pub source: TickSource,
    /// Compare-match threshold (unused by the watchdog).
    pub compare: u16,
    pub tick_hz: u32,
}

impl TimerSetup {
    pub const fn derive(source: TickSource, clock_hz: u32, tick_hz: u32) -> Result<Self, ConfigError> {
        match source {
            TickSource::Watchdog => {
                if tick_hz != WATCHDOG_TICK_HZ {
                    return Err(ConfigError::WatchdogRateMismatch);
                }
                Ok(Self {
                    source,
                    compare: 0,
                    tick_hz,
                })
            }
            TickSource::Timer2 | TickSource::Timer3 => {
                match compare_match(clock_hz, tick_hz, CLOCK_PRESCALER, source.counter_bits()) {
                    Ok(compare) => Ok(Self {
                        source,
                        compare,
                        tick_hz,
                    }),
                    Err(err) => Err(err),
                }
            }
        }
    }
}

/// The tick peripherals, one method per programming step the driver takes.
///
/// On target this is the `avr-device` register API; on the host it is the
/// register model in `sim`.
pub trait TickRegisters {
    /// OCR2A = `compare`, CTC mode, clk/64, compare-match A interrupt on.
    fn start_timer2(&mut self, compare: u8);
    /// Compare-match A interrupt off. The counter keeps running.
    fn stop_timer2(&mut self);

    /// OCR3A = `compare` (high byte first), CTC mode, clk/64, compare-match
    /// A interrupt on.
    fn start_timer3(&mut self, compare: u16);
    fn stop_timer3(&mut self);

    /// Watchdog in interrupt mode at its 15 ms timeout.
    fn start_watchdog(&mut self);
    fn stop_watchdog(&mut self);
}

/// Program the tick source and enable its interrupt. Runs once, with
/// interrupts globally disabled, before the first task is restored.
pub fn configure<R: TickRegisters + ?Sized>(regs: &mut R, setup: &TimerSetup) {
    log::debug!(
        "tick source {:?}: compare {} at {} Hz",
        setup.source,
        setup.compare,
        setup.tick_hz
    );

    match setup.source {
        // `derive` keeps an 8-bit threshold for timer 2
        TickSource::Timer2 => regs.start_timer2(setup.compare as u8),
        TickSource::Timer3 => regs.start_timer3(setup.compare),
        TickSource::Watchdog => regs.start_watchdog(),
    }
}

/// Mask the tick interrupt again.
pub fn disable<R: TickRegisters + ?Sized>(regs: &mut R, setup: &TimerSetup) {
    match setup.source {
        TickSource::Timer2 => regs.stop_timer2(),
        TickSource::Timer3 => regs.stop_timer3(),
        TickSource::Watchdog => regs.stop_watchdog(),
    }
}

/// What the tick interrupt does besides counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Count only; switches happen at explicit yields.
    Cooperative,
    /// Select a task when the tick accounting reports a reschedule is due.
    Preemptive,
    /// Select a task on every tick.
    PreemptiveEveryTick,
}

impl TickMode {
    /// Whether the interrupt saves and restores a context at all.
    #[inline]
    pub const fn is_preemptive(self) -> bool {
        !matches!(self, TickMode::Cooperative)
    }
}

/// Tick accounting half of the tick interrupt: advances the tick count
/// exactly once and reports whether task selection must follow.
#[inline]
pub fn account_tick<C: SchedulerCore + ?Sized>(core: &mut C, mode: TickMode) -> bool {
    let due = core.increment_tick();
    match mode {
        TickMode::Cooperative => false,
        TickMode::Preemptive => due,
        TickMode::PreemptiveEveryTick => true,
    }
}
