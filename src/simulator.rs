//! In-memory bus hardware used on the host.
//!
//! [`SimulatedSlave`] models the I2C slave block the engine talks to: a
//! 32-entry transmit FIFO with a low-water interrupt at 5 entries, an address
//! filter and latched error flags. [`SimulatedBus`] plays the master's side,
//! turning a read or write request into the event sequence the real
//! peripheral would raise.

use std::fmt;

use crate::bus::{BusEvent, PeripheralEngine, SlaveHardware};
use crate::error::BusErrorKind;
use crate::types::{Direction, SlaveAddress};

/// Depth of the transmit FIFO
pub const FIFO_LEN: usize = 32;

/// The FIFO-low interrupt fires once this many bytes or fewer are queued
pub const TX_LOW_WATER: usize = 5;

pub struct SimulatedSlave {
    address: SlaveAddress,
    tx_fifo: heapless::Deque<u8, FIFO_LEN>,
    error_flags: [bool; 4],
    acknowledged: [u32; 4],
}

impl SimulatedSlave {
    pub fn new(address: SlaveAddress) -> Self {
        SimulatedSlave {
            address,
            tx_fifo: heapless::Deque::new(),
            error_flags: [false; 4],
            acknowledged: [0; 4],
        }
    }

    pub fn address(&self) -> SlaveAddress {
        self.address
    }

    pub fn tx_level(&self) -> usize {
        self.tx_fifo.len()
    }

    pub fn error_flag(&self, kind: BusErrorKind) -> bool {
        self.error_flags[kind.index()]
    }

    /// How many times the engine acknowledged `kind`
    pub fn acknowledged(&self, kind: BusErrorKind) -> u32 {
        self.acknowledged[kind.index()]
    }

    fn latch_error(&mut self, kind: BusErrorKind) {
        self.error_flags[kind.index()] = true;
    }

    fn shift_out(&mut self) -> Option<u8> {
        self.tx_fifo.pop_front()
    }
}

impl SlaveHardware for SimulatedSlave {
    fn tx_capacity(&self) -> usize {
        FIFO_LEN - self.tx_fifo.len()
    }

    fn reset_tx_fifo(&mut self) {
        self.tx_fifo.clear();
    }

    fn write_tx_fifo(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for byte in bytes {
            if self.tx_fifo.push_back(*byte).is_err() {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    fn clear_error(&mut self, kind: BusErrorKind) {
        self.error_flags[kind.index()] = false;
        self.acknowledged[kind.index()] += 1;
    }
}

/// What the master observes when a transaction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterFault {
    /// Nobody acknowledged the address byte
    AddressNack,
    /// The transaction was aborted by a protocol error
    Aborted(BusErrorKind),
}

impl fmt::Display for MasterFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterFault::AddressNack => write!(f, "address not acknowledged"),
            MasterFault::Aborted(kind) => write!(f, "transaction aborted: {}", kind.name()),
        }
    }
}

impl std::error::Error for MasterFault {}

/// One emulated bus: the slave hardware plus the engine servicing its interrupts
pub struct SimulatedBus {
    slave: SimulatedSlave,
    engine: PeripheralEngine,
}

impl SimulatedBus {
    pub fn new(address: SlaveAddress, engine: PeripheralEngine) -> Self {
        SimulatedBus {
            slave: SimulatedSlave::new(address),
            engine,
        }
    }

    pub fn slave(&self) -> &SimulatedSlave {
        &self.slave
    }

    pub fn engine(&self) -> &PeripheralEngine {
        &self.engine
    }

    fn raise(&mut self, event: BusEvent) {
        self.engine.handle_event(event, &mut self.slave);
    }

    /// Master read of `len` bytes from `address`.
    pub fn read(&mut self, address: SlaveAddress, len: usize) -> Result<Vec<u8>, MasterFault> {
        self.begin_read(address)?;
        let out = self.clock_out(len)?;
        self.end_read();
        Ok(out)
    }

    /// Addresses the slave for reading without clocking anything out yet.
    pub fn begin_read(&mut self, address: SlaveAddress) -> Result<(), MasterFault> {
        if address != self.slave.address {
            return Err(MasterFault::AddressNack);
        }
        self.raise(BusEvent::AddressMatch(Direction::MasterReads));
        Ok(())
    }

    /// Clocks `len` more bytes out of a read started with [`Self::begin_read`].
    pub fn clock_out(&mut self, len: usize) -> Result<Vec<u8>, MasterFault> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            if self.slave.tx_level() <= TX_LOW_WATER {
                let free = self.slave.tx_capacity();
                self.raise(BusEvent::TxFifoLow { free });
            }
            match self.slave.shift_out() {
                Some(byte) => out.push(byte),
                None => {
                    // Slave held SCL low until the master gave up
                    self.inject_error(BusErrorKind::Timeout);
                    return Err(MasterFault::Aborted(BusErrorKind::Timeout));
                }
            }
        }
        Ok(out)
    }

    /// Stop condition after a read.
    pub fn end_read(&mut self) {
        self.raise(BusEvent::TransactionComplete);
    }

    /// Master write of `bytes` to `address`.
    pub fn write(&mut self, address: SlaveAddress, bytes: &[u8]) -> Result<(), MasterFault> {
        if address != self.slave.address {
            return Err(MasterFault::AddressNack);
        }

        self.raise(BusEvent::AddressMatch(Direction::MasterWrites));
        for byte in bytes {
            self.raise(BusEvent::ByteReceived(*byte));
        }
        self.raise(BusEvent::TransactionComplete);
        Ok(())
    }

    /// Latches a protocol error and delivers it to the engine.
    pub fn inject_error(&mut self, kind: BusErrorKind) {
        self.slave.latch_error(kind);
        self.raise(BusEvent::Error(kind));
    }

    /// Master starts a read and abandons it after `len` bytes with `kind`.
    pub fn read_aborted(
        &mut self,
        address: SlaveAddress,
        len: usize,
        kind: BusErrorKind,
    ) -> Result<Vec<u8>, MasterFault> {
        if address != self.slave.address {
            return Err(MasterFault::AddressNack);
        }

        self.raise(BusEvent::AddressMatch(Direction::MasterReads));
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            if let Some(byte) = self.slave.shift_out() {
                out.push(byte);
            }
        }
        self.inject_error(kind);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EngineStats;
    use crate::register_image::{RegisterImage, SharedImage};
    use crate::types::BusId;
    use std::sync::Arc;

    const ADDRESS: u8 = 0x53;

    fn bus_with(image: RegisterImage) -> (SimulatedBus, Arc<SharedImage>) {
        let shared = Arc::new(SharedImage::with_image(image));
        let engine = PeripheralEngine::new(
            BusId::new(0),
            shared.clone(),
            Arc::new(EngineStats::default()),
        );
        (SimulatedBus::new(SlaveAddress::new(ADDRESS), engine), shared)
    }

    #[test]
    fn test_read_returns_image() {
        let (mut bus, _) = bus_with(RegisterImage::IDLE);
        let bytes = bus.read(SlaveAddress::new(ADDRESS), 5).unwrap();
        assert_eq!(bytes, RegisterImage::IDLE.bytes().to_vec());
        assert!(bus.engine().state().is_idle());
    }

    #[test]
    fn test_read_before_configuration_is_zero() {
        let (mut bus, _) = bus_with(RegisterImage::ZERO);
        let bytes = bus.read(SlaveAddress::new(ADDRESS), 5).unwrap();
        assert_eq!(bytes, vec![0u8; 5]);
    }

    #[test]
    fn test_long_read_wraps_past_fifo_depth() {
        let (mut bus, _) = bus_with(RegisterImage::from_bytes([1, 2, 3, 4, 5]));
        let bytes = bus.read(SlaveAddress::new(ADDRESS), 100).unwrap();

        assert_eq!(bytes.len(), 100);
        for (i, byte) in bytes.iter().enumerate() {
            assert_eq!(*byte, (i % 5) as u8 + 1, "mismatch at offset {}", i);
        }
    }

    #[test]
    fn test_stale_fifo_bytes_never_reach_next_read() {
        let (mut bus, shared) = bus_with(RegisterImage::IDLE);

        // Short read leaves primed bytes behind in the FIFO
        bus.read(SlaveAddress::new(ADDRESS), 2).unwrap();
        assert!(bus.slave().tx_level() > 0);

        shared.set_bits(1, 0x40);
        let bytes = bus.read(SlaveAddress::new(ADDRESS), 5).unwrap();
        assert_eq!(bytes, vec![0x02, 0x40, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_wrong_address_is_not_acknowledged() {
        let (mut bus, _) = bus_with(RegisterImage::IDLE);
        assert_eq!(
            bus.read(SlaveAddress::new(0x20), 5),
            Err(MasterFault::AddressNack)
        );
        assert_eq!(
            bus.write(SlaveAddress::new(0x20), &[1]),
            Err(MasterFault::AddressNack)
        );
        assert_eq!(bus.engine().stats().snapshot().read_transactions, 0);
    }

    #[test]
    fn test_write_then_read() {
        let (mut bus, _) = bus_with(RegisterImage::IDLE);
        bus.write(SlaveAddress::new(ADDRESS), &[0x01, 0x02]).unwrap();
        assert_eq!(bus.engine().received(), &[0x01, 0x02]);

        let bytes = bus.read(SlaveAddress::new(ADDRESS), 5).unwrap();
        assert_eq!(bytes, RegisterImage::IDLE.bytes().to_vec());
    }

    #[test]
    fn test_aborted_read_recovers() {
        let (mut bus, _) = bus_with(RegisterImage::IDLE);
        let partial = bus
            .read_aborted(SlaveAddress::new(ADDRESS), 2, BusErrorKind::ArbitrationLost)
            .unwrap();
        assert_eq!(partial, vec![0x02, 0x00]);
        assert!(bus.engine().state().is_idle());
        assert!(!bus.slave().error_flag(BusErrorKind::ArbitrationLost));
        assert_eq!(bus.slave().acknowledged(BusErrorKind::ArbitrationLost), 1);

        let bytes = bus.read(SlaveAddress::new(ADDRESS), 5).unwrap();
        assert_eq!(bytes, RegisterImage::IDLE.bytes().to_vec());
    }

    #[test]
    fn test_commit_during_read_keeps_frames_whole() {
        let (mut bus, shared) = bus_with(RegisterImage::from_bytes([0x03, 0x3C, 0x00, 0x00, 0x99]));
        let slider = shared.snapshot();

        bus.begin_read(SlaveAddress::new(ADDRESS)).unwrap();
        let mut bytes = bus.clock_out(7).unwrap();
        shared.store(RegisterImage::IDLE);
        bytes.extend(bus.clock_out(33).unwrap());
        bus.end_read();

        let frames: Vec<&[u8]> = bytes.chunks_exact(5).collect();
        assert_eq!(frames.len(), 8);
        for frame in &frames[..7] {
            assert_eq!(*frame, &slider.bytes()[..]);
        }
        assert_eq!(frames[7], &RegisterImage::IDLE.bytes()[..]);
        assert!(bus.engine().state().is_idle());
    }
}
