//! # Stack Frame Builder
//!
//! Synthesizes the register image a new task needs so that its first
//! dispatch is indistinguishable from resuming after a voluntary yield.
//!
//! The same slot order drives the context save and restore sequences in
//! [`crate::context`] and the naked assembly in `arch::avr`, so the image
//! the builder writes is exactly what a restore pops.
//!
//! ## Register Image (stack grows down, one byte per slot)
//!
//! ```text
//!   0x11 0x22 0x33        diagnostic markers        <- top of stack
//!   PC[7:0]
//!   PC[15:8]
//!   PC[21:16]             3-byte program counter parts only
//!   R0                    0x00
//!   SREG                  0x80 (I flag set)
//!   RAMPZ, EIND           extended-addressing parts only, 0x00
//!   R1                    0x00 (compiler zero register)
//!   R2 .. R23             placeholders 0x02 .. 0x23
//!   R24                   parameter low byte
//!   R25                   parameter high byte
//!   R26 .. R31            placeholders 0x26 .. 0x31
//!                                                   <- returned stack pointer
//! ```

/// Status register value for a fresh task: global interrupts enabled.
pub const FLAGS_INT_ENABLED: u8 = 0x80;

/// Known bytes placed at the very top of every new stack. Not load-bearing;
/// they only make the top of a task stack easy to spot in a memory dump.
pub const STACK_MARKERS: [u8; 3] = [0x11, 0x22, 0x33];

/// Number of general purpose registers (R0..R31).
pub const GENERAL_REGISTERS: usize = 32;

/// Register avr-gcc and rustc assume to hold zero.
pub const ZERO_REGISTER: u8 = 1;

/// Low byte of the first pointer-sized argument (r25:r24 pair).
pub const PARAMETER_LOW: u8 = 24;

/// High byte of the first pointer-sized argument.
pub const PARAMETER_HIGH: u8 = 25;

/// One byte-sized location of processor state preserved across a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSlot {
    /// General purpose register `R0`..`R31`.
    R(u8),
    /// Status register.
    Sreg,
    /// Extended Z-pointer page register.
    Rampz,
    /// Extended indirect jump register.
    Eind,
}

/// Shape of the register image for one family of parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pc_bytes: u8,
    extended: bool,
}

impl FrameLayout {
    /// Parts with up to 128 KiB of flash: 16-bit return addresses.
    pub const CLASSIC: Self = Self {
        pc_bytes: 2,
        extended: false,
    };

    /// Parts with more than 128 KiB of flash (ATmega2560): 3-byte return
    /// addresses, RAMPZ and EIND are part of the task context.
    pub const EXTENDED: Self = Self {
        pc_bytes: 3,
        extended: true,
    };

    /// Width of a return address on the stack.
    #[inline]
    pub const fn pc_bytes(self) -> usize {
        self.pc_bytes as usize
    }

    /// Whether RAMPZ and EIND are saved with the task.
    #[inline]
    pub const fn has_extended_registers(self) -> bool {
        self.extended
    }

    /// Bytes pushed by a context save (general registers, SREG, extended registers).
    pub const fn context_len(self) -> usize {
        GENERAL_REGISTERS + 1 + if self.extended { 2 } else { 0 }
    }

    /// Bytes used by a freshly built frame, markers included.
    pub const fn frame_len(self) -> usize {
        STACK_MARKERS.len() + self.pc_bytes() + self.context_len()
    }

    /// The `index`-th slot pushed by a context save.
    ///
    /// SREG follows R0 immediately so interrupts can be disabled after a
    /// single push. Extended registers come next, then R1..R31.
    pub const fn slot(self, index: usize) -> RegisterSlot {
        let extended = if self.extended { 2 } else { 0 };
        match index {
            0 => RegisterSlot::R(0),
            1 => RegisterSlot::Sreg,
            2 if self.extended => RegisterSlot::Rampz,
            3 if self.extended => RegisterSlot::Eind,
            n => RegisterSlot::R((n - 1 - extended) as u8),
        }
    }

    /// Slots in push order.
    pub fn save_order(self) -> impl DoubleEndedIterator<Item = RegisterSlot> + ExactSizeIterator {
        (0..self.context_len()).map(move |index| self.slot(index))
    }

    /// Slots in pop order: the exact mirror of [`FrameLayout::save_order`].
    pub fn restore_order(self) -> impl Iterator<Item = RegisterSlot> {
        self.save_order().rev()
    }
}

/// Debug placeholder for a register: its number written as BCD, so R17
/// holds `0x17` in a dump.
#[inline]
pub const fn debug_placeholder(register: u8) -> u8 {
    ((register / 10) << 4) | (register % 10)
}

/// Value a slot holds in a task's very first register image.
pub const fn initial_value(slot: RegisterSlot, parameter: u16) -> u8 {
    match slot {
        RegisterSlot::R(0) | RegisterSlot::R(ZERO_REGISTER) => 0,
        RegisterSlot::R(PARAMETER_LOW) => parameter as u8,
        RegisterSlot::R(PARAMETER_HIGH) => (parameter >> 8) as u8,
        RegisterSlot::R(n) => debug_placeholder(n),
        RegisterSlot::Sreg => FLAGS_INT_ENABLED,
        RegisterSlot::Rampz | RegisterSlot::Eind => 0,
    }
}

/// Write a complete initial frame into the top of `region`.
///
/// The last byte of `region` is the top of stack. Returns the number of
/// bytes used; the caller guarantees `region` is at least
/// [`FrameLayout::frame_len`] long.
pub fn write_frame(region: &mut [u8], layout: FrameLayout, entry: u32, parameter: u16) -> usize {
    let len = layout.frame_len();
    debug_assert!(region.len() >= len, "stack region smaller than an initial frame");

    let mut top = region.len();
    let mut push = |value: u8| {
        top -= 1;
        region[top] = value;
    };

    for marker in STACK_MARKERS {
        push(marker);
    }

    // `ret` pops the most significant byte first, so the low byte goes on first.
    for byte in 0..layout.pc_bytes() {
        push((entry >> (8 * byte)) as u8);
    }

    for slot in layout.save_order() {
        push(initial_value(slot, parameter));
    }

    len
}

/// Build a task's initial frame below `top_of_stack` in `memory`, which is
/// indexed by data address.
///
/// Returns the adjusted stack pointer to store in the task's control record.
/// Like the hardware stack pointer it addresses the next free byte.
pub fn initialise_stack(
    memory: &mut [u8],
    top_of_stack: u16,
    layout: FrameLayout,
    entry: u32,
    parameter: u16,
) -> u16 {
    let top = usize::from(top_of_stack);
    let len = layout.frame_len();
    write_frame(&mut memory[top + 1 - len..=top], layout, entry, parameter);
    top_of_stack - len as u16
}
