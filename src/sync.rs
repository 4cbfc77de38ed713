//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections and the single piece of cross-task
//! shared state the port touches: the reference to the currently running
//! task. On one core with one register file there is nothing to lock; the
//! interrupt-disable window is the only protection needed.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use critical_section::CriticalSection;

use crate::task::TaskControlRecord;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and the previous I flag is restored on
/// exit, so nesting is harmless.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Reference to the task whose register state is live.
///
/// Only the context switch path and the scheduler core's task selection
/// write it, always inside an interrupt-disabled window; every accessor
/// demands a [`CriticalSection`] token to prove it.
#[repr(transparent)]
pub struct CurrentTask {
    task: UnsafeCell<Option<NonNull<TaskControlRecord>>>,
}

// Safety: single core, and all access goes through methods that require a
// CriticalSection token.
unsafe impl Sync for CurrentTask {}

impl CurrentTask {
    pub const fn new() -> Self {
        Self {
            task: UnsafeCell::new(None),
        }
    }

    /// Make `task` the running task.
    ///
    /// The record must outlive its time as the current task; scheduler cores
    /// keep records in statics or in storage that outlives the scheduler.
    #[inline]
    pub fn set(&self, _cs: CriticalSection<'_>, task: &TaskControlRecord) {
        // Safety: interrupts are disabled for the lifetime of `_cs`.
        unsafe { *self.task.get() = Some(NonNull::from(task)) };
    }

    /// Record of the running task, if one has been chosen.
    #[inline]
    pub fn get<'cs>(&self, _cs: CriticalSection<'cs>) -> Option<&'cs TaskControlRecord> {
        // Safety: interrupts are disabled for the lifetime of `_cs`, and the
        // record outlives its time as the current task (see `set`).
        unsafe { (*self.task.get()).map(|task| &*task.as_ptr()) }
    }

    /// Whether `task` is the running task.
    #[inline]
    pub fn is(&self, cs: CriticalSection<'_>, task: &TaskControlRecord) -> bool {
        self.get(cs).is_some_and(|current| core::ptr::eq(current, task))
    }
}

impl Default for CurrentTask {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide running-task reference used on target.
pub static CURRENT_TASK: CurrentTask = CurrentTask::new();
