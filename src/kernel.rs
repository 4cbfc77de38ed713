//! # Kernel Interface
//!
//! The seam between this port and the scheduler core, plus the scheduler
//! bootstrap.
//!
//! Inbound, the core creates tasks through [`initialise_task`] and starts
//! the scheduler with [`start_scheduler`]. Outbound, the port calls exactly
//! two entry points of the core, both declared by [`SchedulerCore`]: tick
//! accounting and task selection.
//!
//! ## Startup Sequence
//!
//! ```text
//! main()
//!   ├─► kernel::initialise_task()  ← per task: paint stack, build frame (×N)
//!   ├─► core picks the first task  ← CURRENT_TASK.set()
//!   └─► kernel::start_scheduler()  ← no return
//!         ├─► timer::configure()   ← one interrupt source, still masked globally
//!         ├─► restore context      ← SREG of the task re-enables interrupts
//!         └─► ret                  ← pops the entry address
//! ```

use core::cell::UnsafeCell;

use critical_section::CriticalSection;

use crate::config::TICK_MODE;
use crate::context::{self, Machine};
use crate::frame::{self, FrameLayout};
use crate::sync::{CurrentTask, CURRENT_TASK};
use crate::task::{self, TaskControlRecord};
use crate::timer::{self, TickRegisters, TimerSetup};

/// The scheduler core as seen by the port.
pub trait SchedulerCore {
    /// Advance the tick count by exactly one. Returns `true` when a delay
    /// expired or a time slice ran out and a task switch is due.
    fn increment_tick(&mut self) -> bool;

    /// Choose the next task to run and make it current through `current`.
    fn switch_context(&mut self, current: &CurrentTask, cs: CriticalSection<'_>);
}

/// Scheduler core the target trampolines call into. Installed once by
/// `start_scheduler`, before the first task runs.
struct CoreSlot {
    core: UnsafeCell<Option<&'static mut dyn SchedulerCore>>,
}

// Safety: single core; every access requires a CriticalSection token.
unsafe impl Sync for CoreSlot {}

impl CoreSlot {
    const fn new() -> Self {
        Self {
            core: UnsafeCell::new(None),
        }
    }

    #[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
    fn install(&self, _cs: CriticalSection<'_>, core: &'static mut dyn SchedulerCore) {
        // Safety: interrupts are disabled for the lifetime of `_cs`.
        unsafe { *self.core.get() = Some(core) };
    }

    fn with<R>(&self, _cs: CriticalSection<'_>, f: impl FnOnce(&mut dyn SchedulerCore) -> R) -> Option<R> {
        // Safety: interrupts are disabled for the lifetime of `_cs`, and the
        // switch path is not reentrant.
        unsafe { (*self.core.get()).as_deref_mut().map(f) }
    }
}

static SCHEDULER: CoreSlot = CoreSlot::new();

/// Prepare a new task: paint its stack, build its first register image and
/// point its control record at it.
///
/// `region` is the task's whole stack, lowest address first, and `base` is
/// the data address of `region[0]`.
pub fn initialise_task(
    record: &TaskControlRecord,
    region: &mut [u8],
    base: u16,
    layout: FrameLayout,
    entry: u32,
    parameter: u16,
) {
    task::paint_stack(region);
    let top = (region.len() - 1) as u16;
    let sp = frame::initialise_stack(region, top, layout, entry, parameter);
    record.stack_limit.set(base);
    record.top_of_stack.set(base + sp);
}

/// Bootstrap over any [`Machine`]: configure the tick, restore the task the
/// core already made current and return into it.
pub fn bootstrap<M, R>(cpu: &mut M, regs: &mut R, setup: &TimerSetup)
where
    M: Machine + ?Sized,
    R: TickRegisters,
{
    timer::configure(regs, setup);
    log::info!("starting scheduler: {:?} tick at {} Hz", setup.source, setup.tick_hz);
    context::start_first_task(cpu);
}

// ---------------------------------------------------------------------------
// Trampolines called from the naked save/restore sequences
// ---------------------------------------------------------------------------

/// Store the stack pointer left by the save sequence into the running
/// task's record.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn port_store_stack_pointer(sp: u16) {
    // Safety: only reached from the save sequence, after `cli`.
    let cs = unsafe { CriticalSection::new() };
    if let Some(task) = CURRENT_TASK.get(cs) {
        task.top_of_stack.set(sp);
    }
}

/// Stack pointer the restore sequence should load.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn port_load_stack_pointer() -> u16 {
    // Safety: only reached from the restore sequence, interrupts disabled.
    let cs = unsafe { CriticalSection::new() };
    CURRENT_TASK.get(cs).map_or(0, TaskControlRecord::top_of_stack)
}

/// Task selection for a voluntary yield.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn port_select_task() {
    // Safety: only reached between save and restore.
    let cs = unsafe { CriticalSection::new() };
    SCHEDULER.with(cs, |core| core.switch_context(&CURRENT_TASK, cs));
}

/// Tick accounting, followed by task selection when the mode asks for it.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn port_tick() {
    // Safety: reached from the tick interrupt, where the I flag is clear.
    let cs = unsafe { CriticalSection::new() };
    SCHEDULER.with(cs, |core| {
        if timer::account_tick(core, TICK_MODE) {
            core.switch_context(&CURRENT_TASK, cs);
        }
    });
}

// ---------------------------------------------------------------------------
// Target entry points
// ---------------------------------------------------------------------------

/// Task entry point. Receives its parameter in r25:r24 and never returns.
#[cfg(target_arch = "avr")]
pub type TaskFunction = extern "C" fn(*mut core::ffi::c_void) -> !;

/// [`initialise_task`] for a statically allocated stack on target.
#[cfg(target_arch = "avr")]
pub fn create_task<const N: usize>(
    record: &TaskControlRecord,
    stack: &'static mut crate::task::TaskStack<N>,
    entry: TaskFunction,
    parameter: *mut core::ffi::c_void,
) {
    let region = stack.as_mut_slice();
    let base = region.as_ptr() as u16;
    initialise_task(
        record,
        region,
        base,
        crate::config::FRAME_LAYOUT,
        entry as usize as u32,
        parameter as u16,
    );
}

/// Start the scheduler. **Does not return.**
///
/// The core must already have made its first task current.
#[cfg(target_arch = "avr")]
pub fn start_scheduler(core: &'static mut dyn SchedulerCore) -> ! {
    avr_device::interrupt::disable();

    // Safety: interrupts were disabled above and stay disabled until the
    // first task's SREG is restored.
    let cs = unsafe { CriticalSection::new() };
    SCHEDULER.install(cs, core);

    if CURRENT_TASK.get(cs).is_none() {
        log::error!("start_scheduler called before a task was made current");
        crate::hooks::halt();
    }

    // Safety: the tick peripheral is owned by the port from here on.
    let mut regs = unsafe { crate::arch::avr::TickPeripheral::steal() };
    timer::configure(&mut regs, &crate::config::TICK_SETUP);
    log::info!(
        "starting scheduler: {:?} tick at {} Hz",
        crate::config::TICK_SOURCE,
        crate::config::TICK_RATE_HZ
    );

    // Safety: a current task exists and interrupts are disabled.
    unsafe { crate::arch::avr::start_first_task() }
}

/// Voluntarily give up the CPU.
#[cfg(target_arch = "avr")]
#[inline]
pub fn yield_task() {
    // Safety: the scheduler is running; port_yield saves and restores every
    // register it touches.
    unsafe { crate::arch::avr::port_yield() }
}

/// Stop the tick. Tasks keep whatever CPU they have; no further preemption.
#[cfg(target_arch = "avr")]
pub fn end_scheduler() {
    crate::sync::critical_section(|_cs| {
        // Safety: the port owns the tick peripheral.
        let mut regs = unsafe { crate::arch::avr::TickPeripheral::steal() };
        timer::disable(&mut regs, &crate::config::TICK_SETUP);
    });
    log::warn!("scheduler tick disabled");
}
