//! # Idle and Fault Hooks
//!
//! Application hooks the scheduler core invokes: idle when nothing is
//! ready, and fatal hooks on stack overflow or a failed task-stack
//! allocation. The port defines the call contract only. Every call is
//! forwarded to the installed [`ApplicationHooks`]; none is filtered,
//! deferred or swallowed.

use core::cell::UnsafeCell;

use critical_section::CriticalSection;

use crate::sync;
use crate::task::TaskControlRecord;

/// Hook bodies supplied by the application.
pub trait ApplicationHooks: Sync {
    /// One pass of the idle task. Must not block.
    fn idle(&self) {}

    /// A task's saved stack pointer left its region.
    fn stack_overflow(&self, task: &TaskControlRecord) -> ! {
        let _ = task;
        halt()
    }

    /// The core could not allocate a task stack or control record.
    fn allocation_failed(&self) -> ! {
        halt()
    }
}

/// Hooks in effect until the application installs its own.
struct DefaultHooks;

impl ApplicationHooks for DefaultHooks {}

static DEFAULT_HOOKS: DefaultHooks = DefaultHooks;

struct HookSlot {
    hooks: UnsafeCell<&'static dyn ApplicationHooks>,
}

// Safety: single core; every access requires a CriticalSection token.
unsafe impl Sync for HookSlot {}

impl HookSlot {
    fn get(&self, _cs: CriticalSection<'_>) -> &'static dyn ApplicationHooks {
        // Safety: interrupts are disabled for the lifetime of `_cs`.
        unsafe { *self.hooks.get() }
    }

    fn set(&self, _cs: CriticalSection<'_>, hooks: &'static dyn ApplicationHooks) {
        // Safety: interrupts are disabled for the lifetime of `_cs`.
        unsafe { *self.hooks.get() = hooks };
    }
}

static HOOKS: HookSlot = HookSlot {
    hooks: UnsafeCell::new(&DEFAULT_HOOKS as &dyn ApplicationHooks),
};

/// Install the application's hooks.
pub fn set_hooks(hooks: &'static dyn ApplicationHooks) {
    sync::critical_section(|cs| HOOKS.set(cs, hooks));
}

fn installed() -> &'static dyn ApplicationHooks {
    sync::critical_section(|cs| HOOKS.get(cs))
}

/// Called by the scheduler core's idle task.
pub fn idle_hook() {
    installed().idle();
}

/// Called by the scheduler core when a stack check fails.
pub fn stack_overflow_hook(task: &TaskControlRecord) -> ! {
    log::error!(
        "stack overflow: sp {:#06x} below limit {:#06x}",
        task.top_of_stack(),
        task.stack_limit.get()
    );
    installed().stack_overflow(task)
}

/// Called by the scheduler core when task memory cannot be allocated.
pub fn allocation_failed_hook() -> ! {
    log::error!("task allocation failed");
    installed().allocation_failed()
}

/// Check a switched-out task's saved stack pointer and raise the overflow
/// hook if it left its region.
pub fn check_stack(task: &TaskControlRecord) {
    if task.stack_overflowed() {
        stack_overflow_hook(task);
    }
}

/// Stop here with interrupts disabled.
pub fn halt() -> ! {
    #[cfg(target_arch = "avr")]
    avr_device::interrupt::disable();

    loop {
        core::hint::spin_loop();
    }
}
