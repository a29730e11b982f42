//! # Bus Peripheral Engine
//!
//! Interrupt-side state machine of one emulated peripheral. It never starts a
//! transfer; it only reacts to the events the bus hardware raises:
//!
//! ```text
//!            address match            first byte / fifo low
//!   Idle ────────────────► Addressed ─────────────────────► Transferring
//!    ▲                         │                                 │
//!    └──────── transaction complete or any protocol error ◄──────┘
//! ```
//!
//! Everything here runs in interrupt context: no allocation, no blocking
//! beyond the register image's critical section, and every buffer has a fixed
//! size. The transmit FIFO is primed with the register image the moment a read
//! is addressed. Waiting for the first FIFO-empty event instead lets the
//! hardware clock out stale bytes from the previous transaction.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::BusErrorKind;
use crate::register_image::{RegisterImage, SharedImage, IMAGE_LEN};
use crate::types::{BusId, Direction};

/// Capacity of the write-reassembly buffer
pub const RX_BUFFER_LEN: usize = 32;

/// Largest chunk copied to the transmit FIFO per hardware write
const TX_CHUNK_LEN: usize = 32;

/// One hardware event, consumed exactly once by [`PeripheralEngine::handle_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    AddressMatch(Direction),
    TxFifoLow { free: usize },
    ByteReceived(u8),
    TransactionComplete,
    Error(BusErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Idle,
    Addressed(Direction),
    Transferring(Direction),
}

impl PeripheralState {
    pub fn is_idle(&self) -> bool {
        matches!(self, PeripheralState::Idle)
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            PeripheralState::Idle => None,
            PeripheralState::Addressed(direction) | PeripheralState::Transferring(direction) => {
                Some(*direction)
            }
        }
    }
}

/// Register-level operations the engine needs from the peripheral hardware.
///
/// A HAL binding implements this over the real I2C slave block;
/// [`crate::simulator::SimulatedSlave`] implements it in memory.
pub trait SlaveHardware {
    /// Free slots in the transmit FIFO
    fn tx_capacity(&self) -> usize;

    /// Drops whatever is still queued for transmission.
    fn reset_tx_fifo(&mut self);

    /// Queues bytes for transmission, returning how many were accepted.
    fn write_tx_fifo(&mut self, bytes: &[u8]) -> usize;

    /// Acknowledges a latched error flag.
    fn clear_error(&mut self, kind: BusErrorKind);
}

/// Counters maintained by the interrupt handler, readable from any task
#[derive(Debug, Default)]
pub struct EngineStats {
    read_transactions: AtomicU32,
    write_transactions: AtomicU32,
    bytes_served: AtomicU32,
    bytes_drained: AtomicU32,
    errors: [AtomicU32; 4],
    write_index: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub read_transactions: u32,
    pub write_transactions: u32,
    pub bytes_served: u32,
    pub bytes_drained: u32,
    pub errors: [u32; 4],
    pub write_index: usize,
}

impl StatsSnapshot {
    pub fn error_count(&self, kind: BusErrorKind) -> u32 {
        self.errors[kind.index()]
    }

    pub fn total_errors(&self) -> u32 {
        self.errors.iter().sum()
    }
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut errors = [0u32; 4];
        for (slot, counter) in errors.iter_mut().zip(self.errors.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            read_transactions: self.read_transactions.load(Ordering::Relaxed),
            write_transactions: self.write_transactions.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            bytes_drained: self.bytes_drained.load(Ordering::Relaxed),
            errors,
            write_index: self.write_index.load(Ordering::Relaxed),
        }
    }

    /// Index the next received byte will be stored at
    pub fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Relaxed)
    }
}

pub struct PeripheralEngine {
    bus: BusId,
    image: Arc<SharedImage>,
    stats: Arc<EngineStats>,
    state: PeripheralState,
    tx_cursor: usize,
    /// Image the frame in flight was started from
    frame: RegisterImage,
    rx_buffer: heapless::Vec<u8, RX_BUFFER_LEN>,
}

impl PeripheralEngine {
    pub fn new(bus: BusId, image: Arc<SharedImage>, stats: Arc<EngineStats>) -> Self {
        let frame = image.snapshot();
        PeripheralEngine {
            bus,
            image,
            stats,
            state: PeripheralState::Idle,
            tx_cursor: 0,
            frame,
            rx_buffer: heapless::Vec::new(),
        }
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Bytes collected from the current (or last) master write
    pub fn received(&self) -> &[u8] {
        &self.rx_buffer
    }

    /// Interrupt entry point.
    pub fn handle_event<H: SlaveHardware + ?Sized>(&mut self, event: BusEvent, hw: &mut H) {
        match event {
            BusEvent::AddressMatch(direction) => self.on_address_match(direction, hw),
            BusEvent::TxFifoLow { free } => self.on_output_buffer_low(free, hw),
            BusEvent::ByteReceived(byte) => self.on_input_byte(byte),
            BusEvent::TransactionComplete => self.on_transaction_complete(),
            BusEvent::Error(kind) => self.on_error(kind, hw),
        }
    }

    pub fn on_address_match<H: SlaveHardware + ?Sized>(&mut self, direction: Direction, hw: &mut H) {
        self.state = PeripheralState::Addressed(direction);
        match direction {
            Direction::MasterReads => {
                self.stats.read_transactions.fetch_add(1, Ordering::Relaxed);
                hw.reset_tx_fifo();
                self.tx_cursor = 0;
                let prime = IMAGE_LEN.min(hw.tx_capacity());
                self.refill(prime, hw);
            }
            Direction::MasterWrites => {
                self.stats.write_transactions.fetch_add(1, Ordering::Relaxed);
                self.rx_buffer.clear();
                self.stats.write_index.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn on_output_buffer_low<H: SlaveHardware + ?Sized>(&mut self, free: usize, hw: &mut H) {
        if self.state.direction() != Some(Direction::MasterReads) {
            return;
        }
        self.state = PeripheralState::Transferring(Direction::MasterReads);
        self.refill(free, hw);
    }

    /// Received bytes are drained and kept for inspection only; the
    /// transmit path never looks at them.
    pub fn on_input_byte(&mut self, byte: u8) {
        if self.state.direction() == Some(Direction::MasterWrites) {
            self.state = PeripheralState::Transferring(Direction::MasterWrites);
        }
        if self.rx_buffer.is_full() {
            self.rx_buffer.clear();
        }
        // Cannot fail: cleared above when full
        let _ = self.rx_buffer.push(byte);
        self.stats.bytes_drained.fetch_add(1, Ordering::Relaxed);
        self.stats
            .write_index
            .store(self.rx_buffer.len(), Ordering::Relaxed);
    }

    pub fn on_error<H: SlaveHardware + ?Sized>(&mut self, kind: BusErrorKind, hw: &mut H) {
        hw.clear_error(kind);
        self.stats.errors[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.reset_to_idle();
    }

    fn on_transaction_complete(&mut self) {
        self.reset_to_idle();
    }

    fn reset_to_idle(&mut self) {
        self.state = PeripheralState::Idle;
        self.tx_cursor = 0;
    }

    /// Pushes `count` bytes, continuing from the transmit cursor and
    /// wrapping at the image boundary.
    ///
    /// A frame the master has already started is finished from the image it
    /// was started with. Only then is the shared image copied again, once per
    /// refill inside a single critical section, so every 5-byte frame on the
    /// wire is one committed image.
    fn refill<H: SlaveHardware + ?Sized>(&mut self, count: usize, hw: &mut H) {
        let mut remaining = count;

        if self.tx_cursor != 0 {
            let tail = remaining.min(IMAGE_LEN - self.tx_cursor);
            if !self.push_frame_bytes(tail, hw) {
                return;
            }
            remaining -= tail;
        }
        if remaining == 0 {
            return;
        }

        self.frame = self.image.snapshot();
        while remaining > 0 {
            let len = remaining.min(TX_CHUNK_LEN);
            if !self.push_frame_bytes(len, hw) {
                break;
            }
            remaining -= len;
        }
    }

    /// Queues up to `len` bytes of the cached frame. Returns false once the
    /// FIFO stops accepting.
    fn push_frame_bytes<H: SlaveHardware + ?Sized>(&mut self, len: usize, hw: &mut H) -> bool {
        let mut chunk = [0u8; TX_CHUNK_LEN];
        let len = len.min(TX_CHUNK_LEN);
        self.frame.fill_wrapping(self.tx_cursor, &mut chunk[..len]);
        let accepted = hw.write_tx_fifo(&chunk[..len]);

        self.tx_cursor = (self.tx_cursor + accepted) % IMAGE_LEN;
        self.stats
            .bytes_served
            .fetch_add(accepted as u32, Ordering::Relaxed);
        accepted == len
    }
}
