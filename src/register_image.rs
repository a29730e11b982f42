//! # Register Image
//!
//! The five bytes the remote hands to the master on every read transaction.
//!
//! ```text
//! byte 0      byte 1        byte 2        byte 3     byte 4
//! [class]     [flags/level] [flags/level] [reserved] [reserved/trailer]
//! ```
//!
//! Class `0x02` is a keypress frame whose flag byte carries one bit per
//! control, `0x03` and `0x06` are slider frames carrying a raw level. Which
//! bit means which control is decided by the bus personality's key table,
//! not here.
//!
//! [`SharedImage`] is the cell shared between the press sequencer (task
//! context) and the peripheral engine (interrupt context). Every access is a
//! single critical section around a fixed five-byte copy, so the interrupt
//! side never observes a half-applied update.

use core::cell::Cell;
use critical_section::Mutex;
use std::fmt;

/// Length of the register image in bytes
pub const IMAGE_LEN: usize = 5;

/// Command class carried in byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Keypress,
    Slider,
    SecondarySlider,
}

impl CommandClass {
    pub fn byte(&self) -> u8 {
        match self {
            CommandClass::Keypress => 0x02,
            CommandClass::Slider => 0x03,
            CommandClass::SecondarySlider => 0x06,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(CommandClass::Keypress),
            0x03 => Some(CommandClass::Slider),
            0x06 => Some(CommandClass::SecondarySlider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterImage([u8; IMAGE_LEN]);

impl RegisterImage {
    /// Contents before the bus has been configured
    pub const ZERO: RegisterImage = RegisterImage([0x00; IMAGE_LEN]);

    /// Keypress frame with every control released
    pub const IDLE: RegisterImage = RegisterImage([0x02, 0x00, 0x00, 0x00, 0x00]);

    pub const fn from_bytes(bytes: [u8; IMAGE_LEN]) -> Self {
        RegisterImage(bytes)
    }

    /// Slider frame: class byte, level at `value_byte`, optional constant trailer.
    pub fn slider(
        class: CommandClass,
        value_byte: usize,
        level: u8,
        trailer: Option<(usize, u8)>,
    ) -> Self {
        let mut bytes = [0u8; IMAGE_LEN];
        bytes[0] = class.byte();
        if let Some((index, value)) = trailer {
            if let Some(slot) = bytes.get_mut(index) {
                *slot = value;
            }
        }
        if let Some(slot) = bytes.get_mut(value_byte) {
            *slot = level;
        }
        RegisterImage(bytes)
    }

    pub fn bytes(&self) -> &[u8; IMAGE_LEN] {
        &self.0
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.0.get(index).copied().unwrap_or(0)
    }

    pub fn class(&self) -> Option<CommandClass> {
        CommandClass::from_byte(self.0[0])
    }

    pub fn with_bits_set(mut self, index: usize, mask: u8) -> Self {
        if let Some(slot) = self.0.get_mut(index) {
            *slot |= mask;
        }
        self
    }

    pub fn with_bits_cleared(mut self, index: usize, mask: u8) -> Self {
        if let Some(slot) = self.0.get_mut(index) {
            *slot &= !mask;
        }
        self
    }

    /// Copies bytes into `out` starting at `cursor`, restarting from byte 0
    /// whenever the end of the image is reached. Returns the next cursor.
    pub fn fill_wrapping(&self, cursor: usize, out: &mut [u8]) -> usize {
        let mut position = cursor % IMAGE_LEN;
        for slot in out.iter_mut() {
            *slot = self.0[position];
            position = (position + 1) % IMAGE_LEN;
        }
        position
    }
}

impl fmt::Display for RegisterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "]")
    }
}

/// Register image shared between task context and interrupt context
pub struct SharedImage {
    cell: Mutex<Cell<RegisterImage>>,
}

impl SharedImage {
    pub const fn new() -> Self {
        Self::with_image(RegisterImage::ZERO)
    }

    pub const fn with_image(image: RegisterImage) -> Self {
        SharedImage {
            cell: Mutex::new(Cell::new(image)),
        }
    }

    /// Whole-image copy taken inside one critical section
    pub fn snapshot(&self) -> RegisterImage {
        critical_section::with(|cs| self.cell.borrow(cs).get())
    }

    pub fn store(&self, image: RegisterImage) {
        critical_section::with(|cs| self.cell.borrow(cs).set(image));
    }

    /// Applies `f` to the current image and commits the result atomically.
    pub fn update<F>(&self, f: F) -> RegisterImage
    where
        F: FnOnce(RegisterImage) -> RegisterImage,
    {
        critical_section::with(|cs| {
            let cell = self.cell.borrow(cs);
            let next = f(cell.get());
            cell.set(next);
            next
        })
    }

    pub fn set_bits(&self, index: usize, mask: u8) -> RegisterImage {
        self.update(|image| image.with_bits_set(index, mask))
    }

    pub fn clear_bits(&self, index: usize, mask: u8) -> RegisterImage {
        self.update(|image| image.with_bits_cleared(index, mask))
    }
}

impl Default for SharedImage {
    fn default() -> Self {
        SharedImage::new()
    }
}
