//! # avrport Demo Firmware
//!
//! Two tasks over a minimal round-robin scheduler core, enough to watch
//! both switch paths on real hardware:
//!
//! | Task       | Behaviour                                     | Leaves the CPU by |
//! |------------|-----------------------------------------------|-------------------|
//! | `producer` | Bumps a counter, then yields                  | `yield_task()`    |
//! | `spinner`  | Busy-loops on its parameter, never yields     | tick preemption   |
//!
//! With the `cooperative` feature the spinner keeps the CPU forever once it
//! runs; that is the expected cooperative behaviour.

#![no_std]
#![no_main]

use core::ffi::c_void;
use core::ptr::addr_of_mut;

use critical_section::CriticalSection;
use panic_halt as _;

use avrport::hooks;
use avrport::kernel::{self, SchedulerCore};
use avrport::sync::{self, CurrentTask, CURRENT_TASK};
use avrport::task::{TaskControlRecord, TaskStack};

/// Ticks each task may run before the core asks for a switch.
const TIME_SLICE_TICKS: u32 = 10;

const STACK_SIZE: usize = 160;

static PRODUCER: TaskControlRecord = TaskControlRecord::new();
static SPINNER: TaskControlRecord = TaskControlRecord::new();

static mut PRODUCER_STACK: TaskStack<STACK_SIZE> = TaskStack::new();
static mut SPINNER_STACK: TaskStack<STACK_SIZE> = TaskStack::new();

// ---------------------------------------------------------------------------
// Scheduler core
// ---------------------------------------------------------------------------

struct RoundRobin {
    tasks: [&'static TaskControlRecord; 2],
    running: usize,
    ticks: u32,
}

impl SchedulerCore for RoundRobin {
    fn increment_tick(&mut self) -> bool {
        self.ticks = self.ticks.wrapping_add(1);
        self.ticks % TIME_SLICE_TICKS == 0
    }

    fn switch_context(&mut self, current: &CurrentTask, cs: CriticalSection<'_>) {
        hooks::check_stack(self.tasks[self.running]);
        self.running = (self.running + 1) % self.tasks.len();
        current.set(cs, self.tasks[self.running]);
    }
}

static mut CORE: RoundRobin = RoundRobin {
    tasks: [&PRODUCER, &SPINNER],
    running: 0,
    ticks: 0,
};

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

extern "C" fn producer(_parameter: *mut c_void) -> ! {
    let mut produced: u32 = 0;
    loop {
        produced = core::hint::black_box(produced.wrapping_add(1));
        kernel::yield_task();
    }
}

extern "C" fn spinner(parameter: *mut c_void) -> ! {
    let step = parameter as usize as u8;
    let mut value: u8 = 0;
    loop {
        value = core::hint::black_box(value.wrapping_add(step));
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[avr_device::entry]
fn main() -> ! {
    // Safety: the only references ever taken to these statics, before any
    // task runs.
    let (producer_stack, spinner_stack, scheduler) = unsafe {
        (
            &mut *addr_of_mut!(PRODUCER_STACK),
            &mut *addr_of_mut!(SPINNER_STACK),
            &mut *addr_of_mut!(CORE),
        )
    };

    kernel::create_task(&PRODUCER, producer_stack, producer, core::ptr::null_mut());
    kernel::create_task(&SPINNER, spinner_stack, spinner, 3usize as *mut c_void);

    sync::critical_section(|cs| CURRENT_TASK.set(cs, &PRODUCER));

    kernel::start_scheduler(scheduler)
}
