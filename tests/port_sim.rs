//! End-to-end behaviour of the port on the host model: two tasks, a mock
//! scheduler core, and the tick peripheral programmed by the bootstrap.

use avrport::context::{Machine, RegisterFile, SREG_I};
use avrport::frame::FrameLayout;
use avrport::kernel::{self, SchedulerCore};
use avrport::sim::{SimulatedMcu, SimulatedTimer};
use avrport::sync::CurrentTask;
use avrport::task::TaskControlRecord;
use avrport::timer::{compare_match, ConfigError, TickMode, TickSource, TimerSetup};
use critical_section::CriticalSection;

const RAM: usize = 0x0900;
type Mcu = SimulatedMcu<RAM>;

const CLOCK_HZ: u32 = 16_000_000;
const STACK_SIZE: usize = 0x100;
const STACK_A: u16 = 0x0100;
const STACK_B: u16 = 0x0200;
const ENTRY_A: u32 = 0x0400;
const ENTRY_B: u32 = 0x0500;
const PARAM_A: u16 = 0x1111;
const PARAM_B: u16 = 0x2222;

/// Round-robin over two tasks. `due` is what every tick reports.
struct MockCore<'a> {
    tasks: &'a [TaskControlRecord; 2],
    running: usize,
    due: bool,
    ticks: u64,
    switches: u32,
}

impl SchedulerCore for MockCore<'_> {
    fn increment_tick(&mut self) -> bool {
        self.ticks += 1;
        self.due
    }

    fn switch_context(&mut self, current: &CurrentTask, cs: CriticalSection<'_>) {
        self.running ^= 1;
        self.switches += 1;
        current.set(cs, &self.tasks[self.running]);
    }
}

fn tick_setup() -> TimerSetup {
    TimerSetup::derive(TickSource::Timer2, CLOCK_HZ, 1000).unwrap()
}

/// Two fresh tasks, task A made current and started through the bootstrap.
fn boot(layout: FrameLayout, records: &[TaskControlRecord; 2], due: bool) -> (Mcu, MockCore<'_>, SimulatedTimer) {
    let mut mcu = Mcu::new(layout);
    mcu.create_task(&records[0], STACK_A, STACK_SIZE, ENTRY_A, PARAM_A);
    mcu.create_task(&records[1], STACK_B, STACK_SIZE, ENTRY_B, PARAM_B);
    critical_section::with(|cs| mcu.current_task().set(cs, &records[0]));

    let mut timer = SimulatedTimer::new(CLOCK_HZ);
    kernel::bootstrap(&mut mcu, &mut timer, &tick_setup());

    let core = MockCore {
        tasks: records,
        running: 0,
        due,
        ticks: 0,
        switches: 0,
    };
    (mcu, core, timer)
}

fn running(mcu: &Mcu, records: &[TaskControlRecord; 2]) -> usize {
    critical_section::with(|cs| usize::from(mcu.current_task().is(cs, &records[1])))
}

/// Arbitrary live state with interrupts enabled.
fn pattern(layout: FrameLayout, seed: u8) -> RegisterFile {
    let mut regs = RegisterFile::default();
    for (n, r) in regs.r.iter_mut().enumerate() {
        *r = seed.wrapping_add(n as u8 * 7);
    }
    regs.sreg = SREG_I | (seed & 0x3F);
    if layout.has_extended_registers() {
        regs.rampz = seed ^ 0x01;
        regs.eind = seed ^ 0x02;
    }
    regs
}

fn new_records() -> [TaskControlRecord; 2] {
    [TaskControlRecord::new(), TaskControlRecord::new()]
}

#[test]
fn bootstrap_enters_first_task_like_a_call() {
    for (layout, entry) in [
        (FrameLayout::CLASSIC, 0x0000),
        (FrameLayout::CLASSIC, 0xFFFF),
        (FrameLayout::EXTENDED, 0x0000),
        (FrameLayout::EXTENDED, 0x01_FFFF),
    ] {
        let record = TaskControlRecord::new();
        let mut mcu = Mcu::new(layout);
        mcu.create_task(&record, STACK_A, STACK_SIZE, entry, 0xBEEF);
        critical_section::with(|cs| mcu.current_task().set(cs, &record));

        let mut timer = SimulatedTimer::new(CLOCK_HZ);
        kernel::bootstrap(&mut mcu, &mut timer, &tick_setup());

        assert_eq!(mcu.program_counter(), entry);
        let regs = *mcu.registers();
        assert_eq!(regs.r[24], 0xEF);
        assert_eq!(regs.r[25], 0xBE);
        assert_eq!(regs.parameter(), 0xBEEF);
        assert_eq!(regs.r[0], 0);
        assert_eq!(regs.r[1], 0);
        assert_eq!(regs.r[17], 0x17);
        assert_eq!(regs.sreg, SREG_I);
        assert!(mcu.interrupts_enabled());
        assert_eq!((regs.rampz, regs.eind), (0, 0));

        // Only the diagnostic markers stay above the stack pointer
        let top = STACK_A + STACK_SIZE as u16 - 1;
        assert_eq!(mcu.stack_pointer(), top - 3);

        // Tick source armed before the task ran
        assert_eq!(timer.period_cycles(), Some(16_000));
    }
}

#[test]
fn yield_round_trip_preserves_every_register() {
    for layout in [FrameLayout::CLASSIC, FrameLayout::EXTENDED] {
        let records = new_records();
        let (mut mcu, mut core, _timer) = boot(layout, &records, false);
        assert_eq!(mcu.program_counter(), ENTRY_A);

        let state_a = pattern(layout, 0x30);
        *mcu.registers_mut() = state_a;
        mcu.jump(0x0123);
        let sp_a = mcu.stack_pointer();

        mcu.call_yield(&mut core);
        assert_eq!(running(&mcu, &records), 1);
        assert_eq!(mcu.program_counter(), ENTRY_B);
        assert_eq!(mcu.registers().parameter(), PARAM_B);

        // A stays frozen, byte-exact, while B works on its own stack
        let a_region = usize::from(STACK_A)..usize::from(STACK_A) + STACK_SIZE;
        let frozen = mcu.memory()[a_region.clone()].to_vec();
        *mcu.registers_mut() = pattern(layout, 0x50);
        mcu.jump(0x0456);
        mcu.call_yield(&mut core);
        assert_eq!(&mcu.memory()[a_region], &frozen[..]);

        assert_eq!(running(&mcu, &records), 0);
        assert_eq!(*mcu.registers(), state_a);
        assert_eq!(mcu.program_counter(), 0x0123);
        assert_eq!(mcu.stack_pointer(), sp_a);
        assert_eq!(core.ticks, 0);
    }
}

#[test]
fn tick_switch_resumes_like_a_yield() {
    let layout = FrameLayout::CLASSIC;
    let state_a = pattern(layout, 0x61);

    let resume = |by_tick: bool| {
        let records = new_records();
        let (mut mcu, mut core, _timer) = boot(layout, &records, true);
        *mcu.registers_mut() = state_a;
        mcu.jump(0x0222);
        let sp_before = mcu.stack_pointer();

        if by_tick {
            mcu.raise_tick();
            assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
        } else {
            mcu.call_yield(&mut core);
        }
        assert_eq!(running(&mcu, &records), 1);

        // B hands the CPU back voluntarily in both cases
        mcu.call_yield(&mut core);
        assert_eq!(running(&mcu, &records), 0);
        (*mcu.registers(), mcu.program_counter(), mcu.stack_pointer(), sp_before)
    };

    let (regs_y, pc_y, sp_y, before_y) = resume(false);
    let (regs_t, pc_t, sp_t, before_t) = resume(true);

    assert_eq!(regs_y, state_a);
    assert_eq!(regs_t, state_a);
    assert_eq!(pc_y, pc_t);
    assert_eq!(sp_y, before_y);
    assert_eq!(sp_t, before_t);
}

#[test]
fn every_firing_counts_once_even_when_latched() {
    let records = new_records();
    let (mut mcu, mut core, _timer) = boot(FrameLayout::CLASSIC, &records, true);
    let mut fired = 0u64;

    for i in 0..50 {
        mcu.raise_tick();
        fired += 1;
        if i % 3 == 0 {
            // Firing lands while the running code has interrupts disabled
            mcu.set_interrupts_enabled(false);
            assert!(!mcu.service_interrupts(&mut core, TickMode::Preemptive));
            assert!(mcu.tick_pending());
            mcu.set_interrupts_enabled(true);
        }
        assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
        assert!(!mcu.service_interrupts(&mut core, TickMode::Preemptive));
    }
    assert_eq!(core.ticks, fired);

    // Firing during a yield's save/restore window is delivered afterwards
    mcu.raise_tick();
    fired += 1;
    mcu.call_yield(&mut core);
    assert!(mcu.tick_pending());
    assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
    assert!(!mcu.tick_pending());
    assert_eq!(core.ticks, fired);
}

#[test]
fn cooperative_tick_never_switches() {
    let layout = FrameLayout::CLASSIC;
    let records = new_records();
    let (mut mcu, mut core, _timer) = boot(layout, &records, true);

    let state = pattern(layout, 0x12);
    *mcu.registers_mut() = state;
    mcu.jump(0x0777);
    let sp = mcu.stack_pointer();

    for _ in 0..25 {
        mcu.raise_tick();
        assert!(mcu.service_interrupts(&mut core, TickMode::Cooperative));
    }

    assert_eq!(core.ticks, 25);
    assert_eq!(core.switches, 0);
    assert_eq!(running(&mcu, &records), 0);
    assert_eq!(*mcu.registers(), state);
    assert_eq!(mcu.program_counter(), 0x0777);
    assert_eq!(mcu.stack_pointer(), sp);

    // Explicit yields still switch
    mcu.call_yield(&mut core);
    assert_eq!(running(&mcu, &records), 1);
}

#[test]
fn preemptive_tick_switches_only_when_due() {
    let layout = FrameLayout::CLASSIC;

    // Never due: the tick saves and restores the same task
    let records = new_records();
    let (mut mcu, mut core, _timer) = boot(layout, &records, false);
    let state = pattern(layout, 0x2A);
    *mcu.registers_mut() = state;
    mcu.jump(0x0333);
    for _ in 0..10 {
        mcu.raise_tick();
        assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
    }
    assert_eq!(core.switches, 0);
    assert_eq!(*mcu.registers(), state);
    assert_eq!(mcu.program_counter(), 0x0333);

    // Always due: the running task changes on every firing
    let records = new_records();
    let (mut mcu, mut core, _timer) = boot(layout, &records, true);
    for n in 1..=10u32 {
        mcu.raise_tick();
        assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
        assert_eq!(core.switches, n);
        assert_eq!(running(&mcu, &records), (n % 2) as usize);
    }
    assert_eq!(core.ticks, 10);
}

#[test]
fn switch_every_tick_ignores_the_due_flag() {
    let records = new_records();
    let (mut mcu, mut core, _timer) = boot(FrameLayout::EXTENDED, &records, false);

    for n in 1..=6u32 {
        mcu.raise_tick();
        assert!(mcu.service_interrupts(&mut core, TickMode::PreemptiveEveryTick));
        assert_eq!(core.switches, n);
    }
    assert_eq!(core.ticks, 6);
    assert_eq!(running(&mcu, &records), 0);
}

#[test]
fn compare_threshold_is_exact_and_overflow_is_rejected() {
    assert_eq!(compare_match(16_000_000, 1000, 64, 8), Ok(249));
    assert_eq!(tick_setup().compare, 249);

    // 100 Hz would need 2499 in an 8-bit counter
    assert_eq!(
        TimerSetup::derive(TickSource::Timer2, 16_000_000, 100),
        Err(ConfigError::CompareOverflow)
    );
    // The 16-bit timer takes it
    assert_eq!(
        TimerSetup::derive(TickSource::Timer3, 16_000_000, 100).map(|setup| setup.compare),
        Ok(2499)
    );
}

#[test]
fn one_thousand_ticks_make_one_second() {
    let records = new_records();
    let (mut mcu, mut core, mut timer) = boot(FrameLayout::CLASSIC, &records, true);

    // One second of CPU time in 1000-cycle slices
    for _ in 0..16_000 {
        for _ in 0..timer.advance(1000) {
            mcu.raise_tick();
            assert!(mcu.service_interrupts(&mut core, TickMode::Preemptive));
        }
    }

    assert_eq!(core.ticks, 1000);
    assert_eq!(core.ticks, u64::from(tick_setup().tick_hz));
    assert_eq!(core.switches, 1000);
    assert_eq!(timer.advance(u64::from(CLOCK_HZ)), 1000);
}
