use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of independent bus personalities the remote exposes
pub const MAX_BUSES: usize = 2;

/// Index of one emulated bus personality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(u8);

impl BusId {
    pub const fn new(value: u8) -> Self {
        BusId(value)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

impl From<u8> for BusId {
    fn from(value: u8) -> Self {
        BusId::new(value)
    }
}

impl From<BusId> for u8 {
    fn from(value: BusId) -> Self {
        value.value()
    }
}

/// 7-bit bus address a peripheral answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlaveAddress(u8);

impl SlaveAddress {
    pub const MAX: u8 = 0x7F;

    pub fn new(value: u8) -> Self {
        SlaveAddress(value & Self::MAX)
    }

    /// Rejects values that do not fit in seven bits instead of masking them.
    pub fn checked(value: u16) -> Option<Self> {
        if value <= Self::MAX as u16 {
            Some(SlaveAddress(value as u8))
        } else {
            None
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Address byte as it appears on the wire, direction bit included
    pub fn wire_byte(&self, direction: Direction) -> u8 {
        (self.0 << 1) | direction.rw_bit()
    }
}

impl fmt::Display for SlaveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

impl From<u8> for SlaveAddress {
    fn from(value: u8) -> Self {
        SlaveAddress::new(value)
    }
}

/// Transfer direction, always from the master's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    MasterReads,
    MasterWrites,
}

impl Direction {
    pub fn from_rw_bit(bit: u8) -> Self {
        if bit & 0x1 != 0 {
            Direction::MasterReads
        } else {
            Direction::MasterWrites
        }
    }

    pub fn rw_bit(&self) -> u8 {
        match self {
            Direction::MasterReads => 1,
            Direction::MasterWrites => 0,
        }
    }
}
