//! Error types surfaced by the emulator.
//!
//! Hardware protocol faults are deliberately absent from [`EmulationError`]:
//! the peripheral engine recovers from them locally and only counts them.

use thiserror::Error;

use crate::types::BusId;

/// Failures returned by `activate()` and `slide()`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmulationError {
    #[error("{0} is not configured or not installed")]
    BusUnavailable(BusId),

    #[error("{0} already has a press in flight")]
    Busy(BusId),

    #[error("mask 0x{mask:02X} has no defined control bits on {bus}")]
    InvalidMask { bus: BusId, mask: u8 },

    #[error("{bus} has no slider named '{name}'")]
    UnknownSlider { bus: BusId, name: String },
}

/// Hardware protocol error kinds reported by the bus peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusErrorKind {
    ArbitrationLost,
    NoAck,
    Timeout,
    Overflow,
}

impl BusErrorKind {
    pub const ALL: [BusErrorKind; 4] = [
        BusErrorKind::ArbitrationLost,
        BusErrorKind::NoAck,
        BusErrorKind::Timeout,
        BusErrorKind::Overflow,
    ];

    pub fn index(&self) -> usize {
        match self {
            BusErrorKind::ArbitrationLost => 0,
            BusErrorKind::NoAck => 1,
            BusErrorKind::Timeout => 2,
            BusErrorKind::Overflow => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BusErrorKind::ArbitrationLost => "arbitration lost",
            BusErrorKind::NoAck => "no ack",
            BusErrorKind::Timeout => "timeout",
            BusErrorKind::Overflow => "overflow",
        }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures turning a text command into a core call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("malformed argument '{value}' for {what}")]
    BadArgument { what: &'static str, value: String },

    #[error("emulator did not become ready")]
    NotReady,

    #[error(transparent)]
    Emulation(#[from] EmulationError),
}
