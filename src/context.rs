//! # Context Switch Primitive
//!
//! The save and restore sequences that move the single register file
//! between tasks, written against the [`Machine`] trait so the exact
//! instruction order can be exercised on the host. On target the same
//! sequences are the naked assembly in `arch::avr`; both follow
//! [`FrameLayout::save_order`].
//!
//! ## Save
//! ```text
//! push r0
//! in   r0, SREG
//! cli                      <- interrupts off after a single push
//! push r0                  (SREG, I flag as it was)
//! push RAMPZ, EIND         extended parts only
//! push r1
//! clr  r1                  <- compiler zero register
//! push r2 .. r31
//! current->top_of_stack = SP
//! ```
//!
//! ## Restore
//! The exact mirror: load SP from the current record, pop r31 .. r1, the
//! extended registers, SREG and r0. A procedure return then resumes
//! whatever address sits on top of the task's stack.

use critical_section::CriticalSection;

use crate::frame::{FrameLayout, RegisterSlot, GENERAL_REGISTERS, ZERO_REGISTER};
use crate::kernel::SchedulerCore;
use crate::sync::CurrentTask;
use crate::timer::{self, TickMode};

/// Global interrupt enable bit in SREG.
pub const SREG_I: u8 = 0x80;

/// Complete processor state that belongs to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    pub r: [u8; GENERAL_REGISTERS],
    pub sreg: u8,
    pub rampz: u8,
    pub eind: u8,
}

impl RegisterFile {
    #[inline]
    pub fn get(&self, slot: RegisterSlot) -> u8 {
        match slot {
            RegisterSlot::R(n) => self.r[usize::from(n)],
            RegisterSlot::Sreg => self.sreg,
            RegisterSlot::Rampz => self.rampz,
            RegisterSlot::Eind => self.eind,
        }
    }

    #[inline]
    pub fn set(&mut self, slot: RegisterSlot, value: u8) {
        match slot {
            RegisterSlot::R(n) => self.r[usize::from(n)] = value,
            RegisterSlot::Sreg => self.sreg = value,
            RegisterSlot::Rampz => self.rampz = value,
            RegisterSlot::Eind => self.eind = value,
        }
    }

    /// Parameter register pair r25:r24 as a 16-bit value.
    #[inline]
    pub fn parameter(&self) -> u16 {
        u16::from_le_bytes([self.r[24], self.r[25]])
    }
}

/// The parts of an AVR core the switch sequences touch.
pub trait Machine {
    fn layout(&self) -> FrameLayout;

    fn registers(&self) -> &RegisterFile;
    fn registers_mut(&mut self) -> &mut RegisterFile;

    /// `*SP-- = value`
    fn push(&mut self, value: u8);
    /// `*++SP`
    fn pop(&mut self) -> u8;

    fn stack_pointer(&self) -> u16;
    fn set_stack_pointer(&mut self, sp: u16);

    fn program_counter(&self) -> u32;
    fn jump(&mut self, target: u32);

    /// The running-task reference this machine saves into and restores from.
    fn current_task(&self) -> &CurrentTask;
}

/// Push the full register file onto the running task's stack and record
/// the resulting stack pointer in its control record.
///
/// Leaves interrupts disabled and r1 cleared.
pub fn save_context<M: Machine + ?Sized>(cpu: &mut M) {
    let layout = cpu.layout();
    for slot in layout.save_order() {
        let value = cpu.registers().get(slot);
        cpu.push(value);
        match slot {
            RegisterSlot::Sreg => cpu.registers_mut().sreg &= !SREG_I,
            RegisterSlot::R(ZERO_REGISTER) => cpu.registers_mut().r[usize::from(ZERO_REGISTER)] = 0,
            _ => {}
        }
    }

    // Safety: the I flag was cleared right after SREG was pushed.
    let cs = unsafe { CriticalSection::new() };
    let sp = cpu.stack_pointer();
    if let Some(task) = cpu.current_task().get(cs) {
        task.top_of_stack.set(sp);
    }
}

/// Load the running task's stack pointer and pop its register file, in the
/// exact reverse of [`save_context`]. SREG, and with it the I flag, comes
/// back as the task left it.
pub fn restore_context<M: Machine + ?Sized>(cpu: &mut M) {
    // Safety: called with interrupts disabled, either after save_context or
    // from the bootstrap before the tick is running.
    let cs = unsafe { CriticalSection::new() };
    if let Some(task) = cpu.current_task().get(cs) {
        let sp = task.top_of_stack();
        cpu.set_stack_pointer(sp);
    }

    let layout = cpu.layout();
    for slot in layout.restore_order() {
        let value = cpu.pop();
        cpu.registers_mut().set(slot, value);
    }
}

/// Push a return address the way `call` does: low byte first.
pub fn push_return_address<M: Machine + ?Sized>(cpu: &mut M, address: u32) {
    for byte in 0..cpu.layout().pc_bytes() {
        cpu.push((address >> (8 * byte)) as u8);
    }
}

/// `ret`: pop a return address, most significant byte first, and jump there.
pub fn procedure_return<M: Machine + ?Sized>(cpu: &mut M) {
    let mut target = 0u32;
    for _ in 0..cpu.layout().pc_bytes() {
        target = (target << 8) | u32::from(cpu.pop());
    }
    cpu.jump(target);
}

/// Voluntary yield. Entered by `call`, so the caller's resume address is
/// already on its stack.
pub fn yield_now<M, C>(cpu: &mut M, core: &mut C)
where
    M: Machine + ?Sized,
    C: SchedulerCore + ?Sized,
{
    save_context(cpu);
    select_task(cpu, core);
    restore_context(cpu);
    procedure_return(cpu);
}

/// Switch requested by the tick interrupt. Identical to [`yield_now`] from
/// task selection onwards; only the tick accounting in front differs.
pub fn yield_from_tick<M, C>(cpu: &mut M, core: &mut C, mode: TickMode)
where
    M: Machine + ?Sized,
    C: SchedulerCore + ?Sized,
{
    save_context(cpu);
    if timer::account_tick(core, mode) {
        select_task(cpu, core);
    }
    restore_context(cpu);
    procedure_return(cpu);
}

fn select_task<M, C>(cpu: &mut M, core: &mut C)
where
    M: Machine + ?Sized,
    C: SchedulerCore + ?Sized,
{
    // Safety: save_context left interrupts disabled.
    let cs = unsafe { CriticalSection::new() };
    core.switch_context(cpu.current_task(), cs);
}

/// Dispatch the task the scheduler core already made current: restore its
/// image, then return into the address on top of its stack, which for a
/// fresh task is its entry point.
pub fn start_first_task<M: Machine + ?Sized>(cpu: &mut M) {
    restore_context(cpu);
    procedure_return(cpu);
}
