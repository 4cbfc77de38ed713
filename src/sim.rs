//! # Host Model
//!
//! A cycle-free model of the parts of an AVR the port touches: the register
//! file, data memory with a descending stack, the program counter, one
//! latched tick interrupt flag, and the tick peripheral's registers. The
//! switch sequences in [`crate::context`] run against it unchanged, which
//! lets the register-image contract be checked off target.
//!
//! ```text
//!   raise_tick() ──► pending flag ──► service_interrupts()
//!                        ▲                 │  delivered only while SREG.I = 1
//!                        │                 ▼
//!               latched while I = 0   push PC, clear I
//!                                     call yield_from_tick   (preemptive)
//!                                     reti                   (unless switched away)
//! ```

use crate::context::{self, Machine, RegisterFile, SREG_I};
use crate::frame::FrameLayout;
use crate::kernel::{self, SchedulerCore};
use crate::sync::CurrentTask;
use crate::task::TaskControlRecord;
use crate::timer::{self, TickMode, TickRegisters};

/// Resume address inside the simulated tick vector stub, i.e. the `reti`
/// following `call port_yield_from_tick`.
pub const TICK_ISR_RESUME: u32 = 0x0010;

/// Single-core AVR with `RAM` bytes of data space.
pub struct SimulatedMcu<const RAM: usize> {
    layout: FrameLayout,
    registers: RegisterFile,
    sp: u16,
    pc: u32,
    ram: [u8; RAM],
    current: CurrentTask,
    tick_pending: bool,
}

impl<const RAM: usize> SimulatedMcu<RAM> {
    const SIZE_OK: () = assert!(
        RAM > 0 && RAM <= 0x1_0000,
        "data space must fit a 16-bit stack pointer"
    );

    /// Reset state: registers cleared, interrupts off, SP at the last byte
    /// of data space.
    pub fn new(layout: FrameLayout) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_OK;
        Self {
            layout,
            registers: RegisterFile::default(),
            sp: (RAM - 1) as u16,
            pc: 0,
            ram: [0; RAM],
            current: CurrentTask::new(),
            tick_pending: false,
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.ram
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.registers.sreg & SREG_I != 0
    }

    pub fn set_interrupts_enabled(&mut self, enabled: bool) {
        if enabled {
            self.registers.sreg |= SREG_I;
        } else {
            self.registers.sreg &= !SREG_I;
        }
    }

    /// Whether a tick is latched and waiting for the I flag.
    pub fn tick_pending(&self) -> bool {
        self.tick_pending
    }

    /// Create a task whose stack occupies `base .. base + size` of data space.
    pub fn create_task(
        &mut self,
        record: &TaskControlRecord,
        base: u16,
        size: usize,
        entry: u32,
        parameter: u16,
    ) {
        let start = usize::from(base);
        let layout = self.layout;
        kernel::initialise_task(record, &mut self.ram[start..start + size], base, layout, entry, parameter);
    }

    /// The running task executes `call port_yield`.
    pub fn call_yield<C: SchedulerCore + ?Sized>(&mut self, core: &mut C) {
        let resume = self.pc;
        context::push_return_address(self, resume);
        context::yield_now(self, core);
        self.resume_switched_in_task();
    }

    /// The tick peripheral fires. A second firing before delivery merges
    /// into the same flag, as on hardware.
    pub fn raise_tick(&mut self) {
        self.tick_pending = true;
    }

    /// Deliver a pending tick if the I flag allows it. Returns whether an
    /// interrupt was taken.
    pub fn service_interrupts<C: SchedulerCore + ?Sized>(&mut self, core: &mut C, mode: TickMode) -> bool {
        if !self.tick_pending || !self.interrupts_enabled() {
            return false;
        }
        self.tick_pending = false;

        // Hardware entry: push PC, clear I
        let resume = self.pc;
        context::push_return_address(self, resume);
        self.set_interrupts_enabled(false);

        if mode.is_preemptive() {
            context::push_return_address(self, TICK_ISR_RESUME);
            context::yield_from_tick(self, core, mode);
            self.resume_switched_in_task();
        } else {
            // Compiler-generated handler: preserves what it touches
            timer::account_tick(core, mode);
            self.return_from_interrupt();
        }
        true
    }

    /// A task switched in from a yield or a fresh entry resumes directly;
    /// only a task suspended inside the tick stub executes its `reti`.
    fn resume_switched_in_task(&mut self) {
        if self.pc == TICK_ISR_RESUME {
            self.return_from_interrupt();
        }
    }

    fn return_from_interrupt(&mut self) {
        context::procedure_return(self);
        self.set_interrupts_enabled(true);
    }
}

impl<const RAM: usize> Machine for SimulatedMcu<RAM> {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    fn push(&mut self, value: u8) {
        self.ram[usize::from(self.sp)] = value;
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.ram[usize::from(self.sp)]
    }

    fn stack_pointer(&self) -> u16 {
        self.sp
    }

    fn set_stack_pointer(&mut self, sp: u16) {
        self.sp = sp;
    }

    fn program_counter(&self) -> u32 {
        self.pc
    }

    fn jump(&mut self, target: u32) {
        self.pc = target;
    }

    fn current_task(&self) -> &CurrentTask {
        &self.current
    }
}

// ---------------------------------------------------------------------------
// Tick peripheral
// ---------------------------------------------------------------------------

/// Data-space addresses and bit values of the tick peripherals.
pub mod regs {
    pub const TCCR2A: u16 = 0xB0;
    pub const TCCR2B: u16 = 0xB1;
    pub const OCR2A: u16 = 0xB3;
    pub const TIMSK2: u16 = 0x70;

    pub const TCCR3A: u16 = 0x90;
    pub const TCCR3B: u16 = 0x91;
    pub const OCR3AL: u16 = 0x98;
    pub const OCR3AH: u16 = 0x99;
    pub const TIMSK3: u16 = 0x71;

    pub const WDTCSR: u16 = 0x60;

    /// WGM21: clear timer 2 on compare match.
    pub const CTC_TIMER2: u8 = 0x02;
    /// CS22: timer 2 clock / 64.
    pub const PRESCALE_64_TIMER2: u8 = 0x04;
    /// WGM32: clear timer 3 on compare match.
    pub const CTC_TIMER3: u8 = 0x08;
    /// CS31 | CS30: timer 3 clock / 64.
    pub const PRESCALE_64_TIMER3: u8 = 0x03;
    /// OCIExA in TIMSKx.
    pub const COMPARE_MATCH_A_INTERRUPT_ENABLE: u8 = 0x02;
    /// WDIE, with WDE and WDP2..0 clear: interrupt mode, 15 ms.
    pub const WATCHDOG_INTERRUPT_ENABLE: u8 = 0x40;
}

/// Register file of the tick peripherals plus a cycle accumulator. The
/// firing period is read back from whatever the driver programmed.
///
/// 16-bit registers go through the shared TEMP latch as on hardware:
/// writing the high byte only fills TEMP, writing the low byte commits
/// both. A low-byte-first write therefore programs a stale high byte.
pub struct SimulatedTimer {
    clock_hz: u32,
    io: [u8; 256],
    temp: u8,
    elapsed: u64,
}

impl SimulatedTimer {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            io: [0; 256],
            temp: 0,
            elapsed: 0,
        }
    }

    /// Current value of an I/O register.
    pub fn register(&self, address: u16) -> u8 {
        self.io[usize::from(address)]
    }

    /// Byte write as the CPU performs it, TEMP latch included.
    pub fn write_register(&mut self, address: u16, value: u8) {
        match address {
            regs::OCR3AH => self.temp = value,
            regs::OCR3AL => {
                self.io[usize::from(regs::OCR3AL)] = value;
                self.io[usize::from(regs::OCR3AH)] = self.temp;
            }
            _ => self.io[usize::from(address)] = value,
        }
    }

    fn modify(&mut self, address: u16, f: impl FnOnce(u8) -> u8) {
        let value = f(self.register(address));
        self.write_register(address, value);
    }

    /// CPU cycles between two firings, or `None` while no tick interrupt is
    /// enabled.
    pub fn period_cycles(&self) -> Option<u64> {
        let io = |address: u16| self.register(address);

        if io(regs::TIMSK2) & regs::COMPARE_MATCH_A_INTERRUPT_ENABLE != 0 {
            let divider: u64 = match io(regs::TCCR2B) & 0x07 {
                1 => 1,
                2 => 8,
                3 => 32,
                4 => 64,
                5 => 128,
                6 => 256,
                7 => 1024,
                _ => return None,
            };
            return Some((u64::from(io(regs::OCR2A)) + 1) * divider);
        }

        if io(regs::TIMSK3) & regs::COMPARE_MATCH_A_INTERRUPT_ENABLE != 0 {
            let divider: u64 = match io(regs::TCCR3B) & 0x07 {
                1 => 1,
                2 => 8,
                3 => 64,
                4 => 256,
                5 => 1024,
                _ => return None,
            };
            let compare = u16::from_be_bytes([io(regs::OCR3AH), io(regs::OCR3AL)]);
            return Some((u64::from(compare) + 1) * divider);
        }

        if io(regs::WDTCSR) & regs::WATCHDOG_INTERRUPT_ENABLE != 0 {
            return Some(u64::from(self.clock_hz) * 15 / 1000);
        }

        None
    }

    /// Let `cycles` CPU cycles pass. Returns how many times the compare
    /// match (or watchdog timeout) fired.
    pub fn advance(&mut self, cycles: u64) -> u64 {
        match self.period_cycles() {
            Some(period) => {
                self.elapsed += cycles;
                let firings = self.elapsed / period;
                self.elapsed %= period;
                firings
            }
            None => {
                self.elapsed = 0;
                0
            }
        }
    }
}

impl TickRegisters for SimulatedTimer {
    fn start_timer2(&mut self, compare: u8) {
        self.write_register(regs::OCR2A, compare);
        self.modify(regs::TCCR2A, |v| v | regs::CTC_TIMER2);
        self.modify(regs::TCCR2B, |v| v | regs::PRESCALE_64_TIMER2);
        self.modify(regs::TIMSK2, |v| v | regs::COMPARE_MATCH_A_INTERRUPT_ENABLE);
    }

    fn stop_timer2(&mut self) {
        self.modify(regs::TIMSK2, |v| v & !regs::COMPARE_MATCH_A_INTERRUPT_ENABLE);
    }

    fn start_timer3(&mut self, compare: u16) {
        let [high, low] = compare.to_be_bytes();
        self.write_register(regs::OCR3AH, high);
        self.write_register(regs::OCR3AL, low);
        self.write_register(regs::TCCR3B, regs::CTC_TIMER3 | regs::PRESCALE_64_TIMER3);
        self.modify(regs::TIMSK3, |v| v | regs::COMPARE_MATCH_A_INTERRUPT_ENABLE);
    }

    fn stop_timer3(&mut self) {
        self.modify(regs::TIMSK3, |v| v & !regs::COMPARE_MATCH_A_INTERRUPT_ENABLE);
    }

    fn start_watchdog(&mut self) {
        self.write_register(regs::WDTCSR, regs::WATCHDOG_INTERRUPT_ENABLE);
    }

    fn stop_watchdog(&mut self) {
        self.modify(regs::WDTCSR, |v| v & !regs::WATCHDOG_INTERRUPT_ENABLE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TickSource, TimerSetup};

    #[test]
    fn test_push_pop_descend_like_avr() {
        let mut mcu = SimulatedMcu::<64>::new(FrameLayout::CLASSIC);
        assert_eq!(mcu.stack_pointer(), 63);
        mcu.push(0xAB);
        assert_eq!(mcu.stack_pointer(), 62);
        assert_eq!(mcu.memory()[63], 0xAB);
        assert_eq!(mcu.pop(), 0xAB);
        assert_eq!(mcu.stack_pointer(), 63);
    }

    #[test]
    fn test_call_and_ret_byte_order() {
        let mut mcu = SimulatedMcu::<64>::new(FrameLayout::EXTENDED);
        context::push_return_address(&mut mcu, 0x01_2345);
        // Low byte at the highest address
        assert_eq!(&mcu.memory()[61..64], &[0x01, 0x23, 0x45]);
        context::procedure_return(&mut mcu);
        assert_eq!(mcu.program_counter(), 0x01_2345);
        assert_eq!(mcu.stack_pointer(), 63);
    }

    #[test]
    fn test_full_data_space_puts_sp_on_the_last_byte() {
        let mcu = SimulatedMcu::<0x1_0000>::new(FrameLayout::CLASSIC);
        assert_eq!(mcu.stack_pointer(), 0xFFFF);
        assert_eq!(mcu.memory().len(), 0x1_0000);
    }

    #[test]
    fn test_timer_period_follows_programmed_registers() {
        let mut timer = SimulatedTimer::new(16_000_000);
        assert_eq!(timer.period_cycles(), None);
        assert_eq!(timer.advance(1_000_000), 0);

        let setup = TimerSetup::derive(TickSource::Timer2, 16_000_000, 1000).unwrap();
        timer::configure(&mut timer, &setup);
        assert_eq!(timer.period_cycles(), Some(16_000));
        assert_eq!(timer.advance(15_999), 0);
        assert_eq!(timer.advance(1), 1);
        assert_eq!(timer.advance(48_000), 3);

        timer::disable(&mut timer, &setup);
        assert_eq!(timer.advance(48_000), 0);
    }

    #[test]
    fn test_timer2_keeps_bits_it_does_not_own() {
        let mut timer = SimulatedTimer::new(16_000_000);
        // Set by the board runtime
        timer.write_register(regs::TIMSK2, 0x01);

        let setup = TimerSetup::derive(TickSource::Timer2, 16_000_000, 1000).unwrap();
        timer::configure(&mut timer, &setup);

        assert_eq!(timer.register(regs::OCR2A), 249);
        assert_eq!(timer.register(regs::TCCR2A), regs::CTC_TIMER2);
        assert_eq!(timer.register(regs::TCCR2B), regs::PRESCALE_64_TIMER2);
        assert_eq!(timer.register(regs::TIMSK2), 0x03);
        // Nothing else claimed
        assert_eq!(timer.register(regs::TIMSK3), 0);
        assert_eq!(timer.register(regs::WDTCSR), 0);

        timer::disable(&mut timer, &setup);
        assert_eq!(timer.register(regs::TIMSK2), 0x01);
    }

    #[test]
    fn test_timer3_compare_goes_through_the_latch() {
        let mut timer = SimulatedTimer::new(16_000_000);
        let setup = TimerSetup::derive(TickSource::Timer3, 16_000_000, 100).unwrap();
        timer::configure(&mut timer, &setup);

        // 2499 = 0x09C3
        assert_eq!(timer.register(regs::OCR3AH), 0x09);
        assert_eq!(timer.register(regs::OCR3AL), 0xC3);
        assert_eq!(timer.register(regs::TCCR3B), 0x0B);
        assert_eq!(timer.register(regs::TIMSK3), 0x02);
        assert_eq!(timer.period_cycles(), Some(2500 * 64));

        // Low byte first commits a stale high byte
        let mut wrong = SimulatedTimer::new(16_000_000);
        wrong.write_register(regs::OCR3AL, 0xC3);
        wrong.write_register(regs::OCR3AH, 0x09);
        assert_eq!(wrong.register(regs::OCR3AH), 0x00);
    }

    #[test]
    fn test_watchdog_interrupt_mode() {
        let mut timer = SimulatedTimer::new(16_000_000);
        let setup = TimerSetup::derive(TickSource::Watchdog, 16_000_000, timer::WATCHDOG_TICK_HZ).unwrap();
        timer::configure(&mut timer, &setup);
        assert_eq!(timer.register(regs::WDTCSR), 0x40);
        assert_eq!(timer.register(regs::TIMSK2), 0);
        assert_eq!(timer.period_cycles(), Some(240_000));

        timer::disable(&mut timer, &setup);
        assert_eq!(timer.period_cycles(), None);
    }

    #[test]
    fn test_pending_tick_waits_for_interrupt_flag() {
        struct Counter(u32);
        impl SchedulerCore for Counter {
            fn increment_tick(&mut self) -> bool {
                self.0 += 1;
                false
            }
            fn switch_context(&mut self, _current: &CurrentTask, _cs: critical_section::CriticalSection<'_>) {}
        }

        let mut mcu = SimulatedMcu::<64>::new(FrameLayout::CLASSIC);
        let mut core = Counter(0);
        mcu.jump(0x0123);

        mcu.raise_tick();
        mcu.raise_tick();
        assert!(!mcu.service_interrupts(&mut core, TickMode::Cooperative));
        assert!(mcu.tick_pending());

        mcu.set_interrupts_enabled(true);
        assert!(mcu.service_interrupts(&mut core, TickMode::Cooperative));
        assert!(!mcu.service_interrupts(&mut core, TickMode::Cooperative));
        assert_eq!(core.0, 1);
        assert_eq!(mcu.program_counter(), 0x0123);
        assert!(mcu.interrupts_enabled());
        assert_eq!(mcu.stack_pointer(), 63);
    }
}
