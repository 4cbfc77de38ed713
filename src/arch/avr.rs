//! # AVR Port Layer
//!
//! The save and restore sequences as naked functions, the two entry points
//! that switch tasks, and the tick interrupt vector.
//!
//! ## Register Image
//!
//! Every byte of processor state lives on the task's own stack. Push order
//! (restore pops the exact mirror):
//!
//! ```text
//! r0, SREG, [RAMPZ, EIND], r1, r2 .. r31
//! ```
//!
//! RAMPZ and EIND only exist on the ATmega2560 (3-byte program counter).
//!
//! ## Entry Points
//!
//! - `port_yield`: voluntary release. Save, `port_select_task`, restore, `ret`.
//! - `port_yield_from_tick`: the tick interrupt. Save, `port_tick`, restore,
//!   `ret`. Called from the vector stub, so the `ret` lands on the stub's
//!   `reti` for a task that was itself preempted, or directly in a task that
//!   last yielded.
//! - `start_first_task`: restore, `ret` into the first task's entry.
//!
//! [`TickPeripheral`] programs the tick source through the device crate.
//!
//! The stack pointer crosses into Rust through `port_store_stack_pointer`
//! (argument in r25:r24) and back through `port_load_stack_pointer`
//! (result in r25:r24). The save sequence leaves r1 at zero, as those
//! calls expect.

use core::arch::naked_asm;

use crate::kernel::{port_load_stack_pointer, port_select_task, port_store_stack_pointer, port_tick};
use crate::timer::TickRegisters;

// ---------------------------------------------------------------------------
// Save / restore sequences
// ---------------------------------------------------------------------------

// I/O addresses: SREG 0x3f, SPH 0x3e, SPL 0x3d, EIND 0x3c, RAMPZ 0x3b

#[cfg(feature = "atmega2560")]
macro_rules! push_extended {
    () => {
        concat!(
            "in r0, 0x3b\n",
            "push r0\n",
            "in r0, 0x3c\n",
            "push r0\n",
        )
    };
}

#[cfg(not(feature = "atmega2560"))]
macro_rules! push_extended {
    () => {
        ""
    };
}

#[cfg(feature = "atmega2560")]
macro_rules! pop_extended {
    () => {
        concat!(
            "pop r0\n",
            "out 0x3c, r0\n",
            "pop r0\n",
            "out 0x3b, r0\n",
        )
    };
}

#[cfg(not(feature = "atmega2560"))]
macro_rules! pop_extended {
    () => {
        ""
    };
}

/// Push the full register image and hand SP to the current record.
macro_rules! save_context {
    () => {
        concat!(
            "push r0\n",
            "in r0, 0x3f\n",
            "cli\n",
            "push r0\n",
            push_extended!(),
            "push r1\n",
            "clr r1\n",
            "push r2\n", "push r3\n", "push r4\n", "push r5\n",
            "push r6\n", "push r7\n", "push r8\n", "push r9\n",
            "push r10\n", "push r11\n", "push r12\n", "push r13\n",
            "push r14\n", "push r15\n", "push r16\n", "push r17\n",
            "push r18\n", "push r19\n", "push r20\n", "push r21\n",
            "push r22\n", "push r23\n", "push r24\n", "push r25\n",
            "push r26\n", "push r27\n", "push r28\n", "push r29\n",
            "push r30\n", "push r31\n",
            "in r24, 0x3d\n",
            "in r25, 0x3e\n",
            "call {store}\n",
        )
    };
}

/// Load SP from the current record and pop the register image.
macro_rules! restore_context {
    () => {
        concat!(
            "call {load}\n",
            "out 0x3e, r25\n",
            "out 0x3d, r24\n",
            "pop r31\n", "pop r30\n", "pop r29\n", "pop r28\n",
            "pop r27\n", "pop r26\n", "pop r25\n", "pop r24\n",
            "pop r23\n", "pop r22\n", "pop r21\n", "pop r20\n",
            "pop r19\n", "pop r18\n", "pop r17\n", "pop r16\n",
            "pop r15\n", "pop r14\n", "pop r13\n", "pop r12\n",
            "pop r11\n", "pop r10\n", "pop r9\n", "pop r8\n",
            "pop r7\n", "pop r6\n", "pop r5\n", "pop r4\n",
            "pop r3\n", "pop r2\n",
            "pop r1\n",
            pop_extended!(),
            "pop r0\n",
            "out 0x3f, r0\n",
            "pop r0\n",
        )
    };
}

// ---------------------------------------------------------------------------
// Switch entry points
// ---------------------------------------------------------------------------

/// Voluntary yield.
///
/// # Safety
/// The scheduler must be running: a current task and an installed core.
#[unsafe(naked)]
pub unsafe extern "C" fn port_yield() {
    naked_asm!(
        save_context!(),
        "call {select}",
        restore_context!(),
        "ret",
        store = sym port_store_stack_pointer,
        select = sym port_select_task,
        load = sym port_load_stack_pointer,
    )
}

/// Context switch requested by the tick interrupt.
///
/// # Safety
/// Only called from the tick vector stub.
#[cfg(not(feature = "cooperative"))]
#[unsafe(naked)]
pub unsafe extern "C" fn port_yield_from_tick() {
    naked_asm!(
        save_context!(),
        "call {tick}",
        restore_context!(),
        "ret",
        store = sym port_store_stack_pointer,
        tick = sym port_tick,
        load = sym port_load_stack_pointer,
    )
}

/// Restore the task the core made current and return into it.
///
/// # Safety
/// Interrupts disabled, a current task whose stack holds a valid image.
#[unsafe(naked)]
pub unsafe extern "C" fn start_first_task() -> ! {
    naked_asm!(
        restore_context!(),
        "ret",
        load = sym port_load_stack_pointer,
    )
}

// ---------------------------------------------------------------------------
// Tick peripheral
// ---------------------------------------------------------------------------

#[cfg(feature = "atmega328p")]
use avr_device::atmega328p as pac;
#[cfg(feature = "atmega2560")]
use avr_device::atmega2560 as pac;
#[cfg(feature = "atmega32u4")]
use avr_device::atmega32u4 as pac;

/// The chip's timer 2, timer 3 and watchdog through the device crate.
/// A source the chip lacks never gets selected; the build rejects it.
pub struct TickPeripheral {
    dp: pac::Peripherals,
}

impl TickPeripheral {
    /// # Safety
    ///
    /// The port must be the only owner of the tick peripherals.
    pub unsafe fn steal() -> Self {
        // Safety: forwarded to the caller.
        Self { dp: unsafe { pac::Peripherals::steal() } }
    }
}

impl TickRegisters for TickPeripheral {
    #[cfg(not(feature = "atmega32u4"))]
    fn start_timer2(&mut self, compare: u8) {
        let tc2 = &self.dp.TC2;
        // Safety: every value is a valid compare match.
        #[allow(unused_unsafe)]
        tc2.ocr2a.write(|w| unsafe { w.bits(compare) });
        tc2.tccr2a.modify(|_, w| w.wgm2().ctc());
        tc2.tccr2b.modify(|_, w| w.cs2().prescale_64());
        tc2.timsk2.modify(|_, w| w.ocie2a().set_bit());
    }

    #[cfg(feature = "atmega32u4")]
    fn start_timer2(&mut self, _compare: u8) {}

    #[cfg(not(feature = "atmega32u4"))]
    fn stop_timer2(&mut self) {
        self.dp.TC2.timsk2.modify(|_, w| w.ocie2a().clear_bit());
    }

    #[cfg(feature = "atmega32u4")]
    fn stop_timer2(&mut self) {}

    // OCR3A goes through the TEMP latch; the 16-bit store writes the high
    // byte first.
    #[cfg(not(feature = "atmega328p"))]
    fn start_timer3(&mut self, compare: u16) {
        let tc3 = &self.dp.TC3;
        // Safety: every value is a valid compare match.
        #[allow(unused_unsafe)]
        tc3.ocr3a.write(|w| unsafe { w.bits(compare) });
        // Safety: 0b01 in WGM33:32 selects CTC on OCR3A.
        #[allow(unused_unsafe)]
        tc3.tccr3b.write(|w| unsafe { w.cs3().prescale_64().wgm3().bits(0b01) });
        tc3.timsk3.modify(|_, w| w.ocie3a().set_bit());
    }

    #[cfg(feature = "atmega328p")]
    fn start_timer3(&mut self, _compare: u16) {}

    #[cfg(not(feature = "atmega328p"))]
    fn stop_timer3(&mut self) {
        self.dp.TC3.timsk3.modify(|_, w| w.ocie3a().clear_bit());
    }

    #[cfg(feature = "atmega328p")]
    fn stop_timer3(&mut self) {}

    fn start_watchdog(&mut self) {
        // Interrupt mode with the shortest (15 ms) timeout.
        self.dp.WDT.wdtcsr.write(|w| w.wdie().set_bit());
    }

    fn stop_watchdog(&mut self) {
        self.dp.WDT.wdtcsr.modify(|_, w| w.wdie().clear_bit());
    }
}

// ---------------------------------------------------------------------------
// Tick vector
// ---------------------------------------------------------------------------

/// Attach the vector symbol of the configured (chip, tick source) pair.
macro_rules! tick_vector {
    ($item:item) => {
        #[cfg_attr(all(feature = "atmega328p", not(feature = "watchdog-tick")), unsafe(export_name = "__vector_7"))]
        #[cfg_attr(all(feature = "atmega328p", feature = "watchdog-tick"), unsafe(export_name = "__vector_6"))]
        #[cfg_attr(
            all(feature = "atmega2560", not(any(feature = "timer3", feature = "watchdog-tick"))),
            unsafe(export_name = "__vector_13")
        )]
        #[cfg_attr(all(feature = "atmega2560", feature = "timer3"), unsafe(export_name = "__vector_32"))]
        #[cfg_attr(all(feature = "atmega2560", feature = "watchdog-tick"), unsafe(export_name = "__vector_12"))]
        #[cfg_attr(all(feature = "atmega32u4", not(feature = "watchdog-tick")), unsafe(export_name = "__vector_32"))]
        #[cfg_attr(all(feature = "atmega32u4", feature = "watchdog-tick"), unsafe(export_name = "__vector_12"))]
        $item
    };
}

tick_vector! {
    /// Preemptive tick: the switch happens inside `port_yield_from_tick`.
    #[cfg(not(feature = "cooperative"))]
    #[unsafe(naked)]
    unsafe extern "C" fn tick_interrupt() {
        naked_asm!(
            "call {switch}",
            "reti",
            switch = sym port_yield_from_tick,
        )
    }
}

tick_vector! {
    /// Cooperative tick: count only. The compiler saves what `port_tick`
    /// clobbers.
    #[cfg(feature = "cooperative")]
    extern "avr-interrupt" fn tick_interrupt() {
        port_tick();
    }
}
