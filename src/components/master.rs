use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::component::{BaseComponent, Component};
use crate::readiness::ReadyWaiter;
use crate::register_image::{CommandClass, RegisterImage, IMAGE_LEN};
use crate::simulator::SimulatedBus;
use crate::types::{BusId, SlaveAddress};

/// Latched events kept for display
pub const EVENT_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchedKind {
    /// Flag byte went from zero to `mask`
    Press(u8),
    /// Flag byte returned to zero
    Release,
    /// A new slider frame appeared
    Slider(RegisterImage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchedEvent {
    pub bus: BusId,
    pub kind: LatchedKind,
}

/// Edge detection the way the stock controller does it: a press counts once,
/// on the transition from an idle flag byte to a non-zero one.
#[derive(Debug, Clone)]
pub struct EdgeLatch {
    flag_byte: usize,
    last: RegisterImage,
}

impl EdgeLatch {
    pub fn new(flag_byte: usize) -> Self {
        EdgeLatch {
            flag_byte,
            last: RegisterImage::ZERO,
        }
    }

    pub fn observe(&mut self, frame: RegisterImage) -> Option<LatchedKind> {
        let previous = std::mem::replace(&mut self.last, frame);
        match frame.class() {
            Some(CommandClass::Keypress) => {
                let before = if previous.class() == Some(CommandClass::Keypress) {
                    previous.byte(self.flag_byte)
                } else {
                    0
                };
                let now = frame.byte(self.flag_byte);
                match (before, now) {
                    (0, 0) => None,
                    (0, mask) => Some(LatchedKind::Press(mask)),
                    (_, 0) => Some(LatchedKind::Release),
                    _ => None,
                }
            }
            Some(_) if frame != previous => Some(LatchedKind::Slider(frame)),
            _ => None,
        }
    }
}

/// Master-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollCounters {
    pub polls: u64,
    pub faults: u64,
}

struct PollState {
    bus_id: BusId,
    bus: Arc<Mutex<SimulatedBus>>,
    address: SlaveAddress,
    read_length: usize,
    latch: EdgeLatch,
    events: Arc<Mutex<VecDeque<LatchedEvent>>>,
    counters: PollCounters,
    gate: Option<ReadyWaiter>,
}

impl PollState {
    fn poll(&mut self) -> Result<(), String> {
        if let Some(gate) = &self.gate {
            if !gate.is_ready() {
                return Ok(());
            }
        }
        self.counters.polls += 1;
        let bytes = {
            let mut bus = self.bus.lock().map_err(|_| "bus lock poisoned".to_string())?;
            bus.read(self.address, self.read_length)
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(fault) => {
                self.counters.faults += 1;
                return Err(format!("{} read failed: {}", self.bus_id, fault));
            }
        };

        let mut frame = [0u8; IMAGE_LEN];
        for (slot, byte) in frame.iter_mut().zip(bytes.iter()) {
            *slot = *byte;
        }

        if let Some(kind) = self.latch.observe(RegisterImage::from_bytes(frame)) {
            let mut events = self
                .events
                .lock()
                .map_err(|_| "event log poisoned".to_string())?;
            if events.len() == EVENT_HISTORY {
                events.pop_front();
            }
            events.push_back(LatchedEvent {
                bus: self.bus_id,
                kind,
            });
        }
        Ok(())
    }
}

/// Simulated controller polling one bus at a fixed cadence
pub struct MasterPoller {
    base: BaseComponent,
    state: Arc<Mutex<PollState>>,
    events: Arc<Mutex<VecDeque<LatchedEvent>>>,
}

impl MasterPoller {
    pub fn new(
        bus_id: BusId,
        bus: Arc<Mutex<SimulatedBus>>,
        address: SlaveAddress,
        flag_byte: usize,
        read_length: usize,
        period: Duration,
    ) -> Self {
        let events = Arc::new(Mutex::new(VecDeque::with_capacity(EVENT_HISTORY)));
        MasterPoller {
            base: BaseComponent::new(format!("master-{}", bus_id), period),
            state: Arc::new(Mutex::new(PollState {
                bus_id,
                bus,
                address,
                read_length,
                latch: EdgeLatch::new(flag_byte),
                events: events.clone(),
                counters: PollCounters::default(),
                gate: None,
            })),
            events,
        }
    }

    /// Holds off every read until `waiter` has been signalled.
    pub fn gated_on(self, waiter: ReadyWaiter) -> Self {
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.gate = Some(waiter);
        }
        self
    }

    /// Shared handle onto the latched event history
    pub fn events(&self) -> Arc<Mutex<VecDeque<LatchedEvent>>> {
        self.events.clone()
    }

    pub fn counters(&self) -> PollCounters {
        match self.state.lock() {
            Ok(state) => state.counters,
            Err(poisoned) => poisoned.into_inner().counters,
        }
    }
}

fn poll_once(state: &Mutex<PollState>) -> Result<(), String> {
    state
        .lock()
        .map_err(|_| "poller state poisoned".to_string())?
        .poll()
}

impl Component for MasterPoller {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn update(&mut self) -> Result<(), String> {
        poll_once(&self.state)
    }

    fn run(&mut self) {
        let state = self.state.clone();
        self.base.spawn_loop(move || poll_once(&state));
    }

    fn stop(&mut self) {
        self.base.stop();
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }
}
