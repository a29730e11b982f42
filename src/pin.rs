use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl PinValue {
    pub fn to_str(&self) -> &'static str {
        match self {
            PinValue::Low => "Low",
            PinValue::High => "High",
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            PinValue::Low => '0',
            PinValue::High => '1',
        }
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            PinValue::High
        } else {
            PinValue::Low
        }
    }

    pub fn to_bool(&self) -> bool {
        matches!(self, PinValue::High)
    }
}

impl std::fmt::Display for PinValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Push-pull GPIO output. A board support layer implements this for the
/// real attention pins; [`SimulatedPin`] stands in for them otherwise.
pub trait OutputPin: Send {
    fn set_level(&mut self, value: PinValue);
    fn level(&self) -> PinValue;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinTransition {
    pub value: PinValue,
    pub at: Instant,
}

#[derive(Debug)]
struct PinState {
    level: PinValue,
    transitions: Vec<PinTransition>,
}

/// In-memory output pin. Clones share state, so one clone can drive the pin
/// while another observes it.
#[derive(Debug, Clone)]
pub struct SimulatedPin {
    name: String,
    gpio: u8,
    state: Arc<Mutex<PinState>>,
}

impl SimulatedPin {
    pub fn new(name: String, gpio: u8, initial: PinValue) -> Self {
        SimulatedPin {
            name,
            gpio,
            state: Arc::new(Mutex::new(PinState {
                level: initial,
                transitions: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gpio(&self) -> u8 {
        self.gpio
    }

    /// Every level written since creation, in order
    pub fn transitions(&self) -> Vec<PinTransition> {
        match self.state.lock() {
            Ok(state) => state.transitions.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear_history(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.transitions.clear();
        }
    }
}

impl OutputPin for SimulatedPin {
    fn set_level(&mut self, value: PinValue) {
        if let Ok(mut state) = self.state.lock() {
            state.level = value;
            state.transitions.push(PinTransition {
                value,
                at: Instant::now(),
            });
        }
    }

    fn level(&self) -> PinValue {
        match self.state.lock() {
            Ok(state) => state.level,
            Err(poisoned) => poisoned.into_inner().level,
        }
    }
}

impl std::fmt::Display for SimulatedPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (GPIO{}): {}", self.name, self.gpio, self.level())
    }
}

/// Attention line with its electrical polarity applied
pub struct AttentionLine {
    pin: Box<dyn OutputPin>,
    active_low: bool,
}

impl AttentionLine {
    /// Drives the line to its inactive level immediately.
    pub fn new(pin: Box<dyn OutputPin>, active_low: bool) -> Self {
        let mut line = AttentionLine { pin, active_low };
        line.deassert();
        line
    }

    fn active_level(&self) -> PinValue {
        PinValue::from_bool(!self.active_low)
    }

    pub fn assert(&mut self) {
        let level = self.active_level();
        self.pin.set_level(level);
    }

    pub fn deassert(&mut self) {
        let level = PinValue::from_bool(self.active_low);
        self.pin.set_level(level);
    }

    pub fn is_asserted(&self) -> bool {
        self.pin.level() == self.active_level()
    }
}
