//! # Task Control Record
//!
//! The port-visible part of a task descriptor. The scheduler core owns the
//! record and may embed it in a larger structure; the port only reads and
//! writes the saved stack pointer, which is the first field so the naked
//! assembly can reach it at offset zero.
//!
//! Also home to per-task stack storage and the stack diagnostics the fault
//! hooks rely on: a painted fill pattern for high-water-mark measurement and
//! a limit check for overflow detection.
//!
//! The idle task and the timer service task are created by the scheduler
//! core itself; their record and stack come from [`idle_task_memory`] and
//! [`timer_task_memory`] so no allocator is needed.

use core::cell::{Cell, UnsafeCell};

use crate::config::MINIMAL_STACK_SIZE;

/// Byte every stack is painted with at creation. Bytes still holding it
/// have never been used.
pub const STACK_FILL_BYTE: u8 = 0xA5;

/// Scheduler-owned descriptor as seen by the port.
///
/// `top_of_stack` is a 16-bit data address on every AVR part, including the
/// ones with a 3-byte program counter.
#[repr(C)]
#[derive(Debug)]
pub struct TaskControlRecord {
    /// Saved stack pointer. Written by a context save, read by a restore.
    pub top_of_stack: Cell<u16>,

    /// Lowest address of the task's stack region.
    pub stack_limit: Cell<u16>,
}

impl TaskControlRecord {
    /// An unused record. Initialised by `kernel::initialise_task`.
    pub const fn new() -> Self {
        Self {
            top_of_stack: Cell::new(0),
            stack_limit: Cell::new(0),
        }
    }

    /// Saved stack pointer.
    #[inline]
    pub fn top_of_stack(&self) -> u16 {
        self.top_of_stack.get()
    }

    /// True once the saved stack pointer is at or below the region start,
    /// i.e. the region has no free byte left. Only meaningful while the task
    /// is switched out.
    #[inline]
    pub fn stack_overflowed(&self) -> bool {
        self.top_of_stack.get() <= self.stack_limit.get()
    }
}

// Safety: single core. Fields are written before the scheduler starts or
// inside the interrupt-disabled switch window, never concurrently.
unsafe impl Sync for TaskControlRecord {}

impl Default for TaskControlRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Statically allocated task stack.
///
/// Sizes below [`MINIMAL_STACK_SIZE`] are rejected when the stack is
/// constructed in a `const`/`static` context.
#[repr(C)]
pub struct TaskStack<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> TaskStack<N> {
    const SIZE_OK: () = assert!(
        N >= MINIMAL_STACK_SIZE,
        "task stack smaller than MINIMAL_STACK_SIZE"
    );

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_OK;
        Self { bytes: [0; N] }
    }

    /// The whole region, lowest address first.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const N: usize> Default for TaskStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A record and a stack in static storage, handed out once.
pub struct StaticTaskMemory<const N: usize> {
    taken: critical_section::Mutex<Cell<bool>>,
    record: TaskControlRecord,
    stack: UnsafeCell<TaskStack<N>>,
}

// Safety: the stack is only reachable through `take`, which hands out the
// single mutable reference once.
unsafe impl<const N: usize> Sync for StaticTaskMemory<N> {}

impl<const N: usize> StaticTaskMemory<N> {
    pub const fn new() -> Self {
        Self {
            taken: critical_section::Mutex::new(Cell::new(false)),
            record: TaskControlRecord::new(),
            stack: UnsafeCell::new(TaskStack::new()),
        }
    }

    /// The record and stack on the first call, `None` afterwards.
    pub fn take(&'static self) -> Option<(&'static TaskControlRecord, &'static mut TaskStack<N>)> {
        let first = critical_section::with(|cs| !self.taken.borrow(cs).replace(true));
        if !first {
            return None;
        }
        // Safety: `taken` was clear, so no other reference to the stack exists.
        let stack = unsafe { &mut *self.stack.get() };
        Some((&self.record, stack))
    }
}

impl<const N: usize> Default for StaticTaskMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}

static IDLE_TASK_MEMORY: StaticTaskMemory<MINIMAL_STACK_SIZE> = StaticTaskMemory::new();
static TIMER_TASK_MEMORY: StaticTaskMemory<MINIMAL_STACK_SIZE> = StaticTaskMemory::new();

/// Record and stack for the core's idle task. `None` once handed out.
pub fn idle_task_memory() -> Option<(&'static TaskControlRecord, &'static mut TaskStack<MINIMAL_STACK_SIZE>)> {
    IDLE_TASK_MEMORY.take()
}

/// Record and stack for the core's timer service task. `None` once handed out.
pub fn timer_task_memory() -> Option<(&'static TaskControlRecord, &'static mut TaskStack<MINIMAL_STACK_SIZE>)> {
    TIMER_TASK_MEMORY.take()
}

/// Fill a stack region with [`STACK_FILL_BYTE`].
pub fn paint_stack(region: &mut [u8]) {
    region.fill(STACK_FILL_BYTE);
}

/// Number of bytes at the bottom of `region` that were never written since
/// painting. Zero means the task has used (or overrun) its whole stack.
pub fn high_water_mark(region: &[u8]) -> usize {
    region
        .iter()
        .take_while(|&&byte| byte == STACK_FILL_BYTE)
        .count()
}
