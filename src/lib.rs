//! # Rusty Remote Library
//!
//! Emulates a two-personality multi-button remote as a passive I2C
//! peripheral. An unmodified controller polls it and sees presses and
//! releases that look exactly like a human using the genuine remote.
//!
//! This library provides:
//! - The interrupt-serviced peripheral engine that answers master reads
//! - A shared register image per bus, guarded by a critical section
//! - The press sequencer driving flag bits and the attention line
//! - JSON configuration of bus pins, bit tables and pulse timing
//! - Simulated bus hardware and master for running on a host

pub mod bus;
pub mod component;
pub mod components;
pub mod console;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod pin;
pub mod readiness;
pub mod register_image;
pub mod sequencer;
pub mod simulator;
pub mod system_config;
pub mod systems;
pub mod types;

// Re-export commonly used items for easier importing
pub use bus::{BusEvent, EngineStats, PeripheralEngine, SlaveHardware};
pub use component::{BaseComponent, Component};
pub use controller::BusController;
pub use dispatch::CommandDispatcher;
pub use error::{BusErrorKind, ConfigError, DispatchError, EmulationError};
pub use pin::{OutputPin, PinValue, SimulatedPin};
pub use register_image::{RegisterImage, SharedImage};
pub use sequencer::{KeyTable, PressSequencer, TimingPolicy};
pub use types::{BusId, Direction, SlaveAddress};
