//! # Press Sequencer
//!
//! Turns a logical control activation into the register image mutations and
//! attention-line pulses a human press would produce:
//!
//! ```text
//! flag bits   ____/‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾\______________________
//! attention   ‾‾‾‾\_________/‾‾‾‾‾‾‾‾‾‾‾‾‾‾\__________/‾‾‾‾‾‾‾‾‾‾
//!                 |  pulse  |  assert hold  | release  |  guard
//! ```
//! (attention line drawn active-low)
//!
//! One sequence runs per bus at a time. Once the bits are asserted the
//! release always follows: the sequence is driven by a spawned task, so
//! dropping the caller's future does not cut it short.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::{ConfigError, EmulationError};
use crate::pin::AttentionLine;
use crate::register_image::{CommandClass, RegisterImage, SharedImage, IMAGE_LEN};
use crate::types::BusId;

/// Pulse widths of a press/release sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Attention line held asserted after the flags are set
    pub attention_pulse: Duration,
    /// Flags stay set this long after the attention pulse ends
    pub assert_hold: Duration,
    /// Attention pulse signalling the release
    pub release_pulse: Duration,
    /// Quiet time before the bus accepts the next press
    pub guard_delay: Duration,
    /// Slowest cadence at which the master is documented to poll
    pub master_poll_interval: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        TimingPolicy {
            attention_pulse: Duration::from_millis(50),
            assert_hold: Duration::from_millis(100),
            release_pulse: Duration::from_millis(50),
            guard_delay: Duration::from_millis(20),
            master_poll_interval: Duration::from_millis(40),
        }
    }
}

impl TimingPolicy {
    /// How long the flag bits stay visible to the master
    pub fn press_window(&self) -> Duration {
        self.attention_pulse + self.assert_hold
    }

    /// Whole sequence, guard delay included
    pub fn sequence_duration(&self) -> Duration {
        self.press_window() + self.release_pulse + self.guard_delay
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.press_window() <= self.master_poll_interval {
            return Err(ConfigError::Invalid(format!(
                "press window of {:?} does not cover the master poll interval of {:?}",
                self.press_window(),
                self.master_poll_interval
            )));
        }
        if self.assert_hold <= self.attention_pulse {
            return Err(ConfigError::Invalid(format!(
                "assert hold {:?} must be longer than the attention pulse {:?}",
                self.assert_hold, self.attention_pulse
            )));
        }
        Ok(())
    }
}

/// Bit-to-control mapping of one bus personality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTable {
    pub flag_byte: usize,
    pub controls: BTreeMap<String, u8>,
}

impl KeyTable {
    pub fn defined_bits(&self) -> u8 {
        self.controls.values().fold(0, |acc, bits| acc | bits)
    }

    pub fn lookup(&self, name: &str) -> Option<u8> {
        self.controls.get(name).copied()
    }

    /// Non-empty and entirely inside the table's defined bits
    pub fn accepts(&self, mask: u8) -> bool {
        mask != 0 && mask & !self.defined_bits() == 0
    }

    /// Names of the controls whose bits are all present in `mask`
    pub fn names_for(&self, mask: u8) -> Vec<&str> {
        self.controls
            .iter()
            .filter(|(_, bits)| **bits != 0 && mask & **bits == **bits)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flag_byte == 0 || self.flag_byte >= IMAGE_LEN {
            return Err(ConfigError::Invalid(format!(
                "flag byte {} must address one of bytes 1..{}",
                self.flag_byte,
                IMAGE_LEN - 1
            )));
        }
        let mut seen = 0u8;
        for (name, bits) in &self.controls {
            if *bits == 0 {
                return Err(ConfigError::Invalid(format!(
                    "control '{}' has no bits",
                    name
                )));
            }
            if seen & bits != 0 {
                return Err(ConfigError::Invalid(format!(
                    "control '{}' overlaps bits 0x{:02X} of another control",
                    name,
                    seen & bits
                )));
            }
            seen |= bits;
        }
        Ok(())
    }
}

/// Byte layout of one slider frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliderLayout {
    pub class: CommandClass,
    pub value_byte: usize,
    pub trailer: Option<(usize, u8)>,
}

impl SliderLayout {
    pub fn frame(&self, level: u8) -> RegisterImage {
        RegisterImage::slider(self.class, self.value_byte, level, self.trailer)
    }
}

pub struct PressSequencer {
    bus: BusId,
    image: Arc<SharedImage>,
    attention: Mutex<AttentionLine>,
    keys: KeyTable,
    sliders: BTreeMap<String, SliderLayout>,
    timing: TimingPolicy,
    busy: AtomicBool,
}

/// Clears the busy flag when the in-flight sequence finishes
struct InFlight {
    sequencer: Arc<PressSequencer>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.sequencer.busy.store(false, Ordering::Release);
    }
}

impl PressSequencer {
    pub fn new(
        bus: BusId,
        image: Arc<SharedImage>,
        attention: AttentionLine,
        keys: KeyTable,
        sliders: BTreeMap<String, SliderLayout>,
        timing: TimingPolicy,
    ) -> Self {
        PressSequencer {
            bus,
            image,
            attention: Mutex::new(attention),
            keys,
            sliders,
            timing,
            busy: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    pub fn sliders(&self) -> &BTreeMap<String, SliderLayout> {
        &self.sliders
    }

    pub fn timing(&self) -> &TimingPolicy {
        &self.timing
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn attention_asserted(&self) -> bool {
        self.with_attention(|line| line.is_asserted())
    }

    fn begin(self: &Arc<Self>) -> Result<InFlight, EmulationError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EmulationError::Busy(self.bus))?;
        Ok(InFlight {
            sequencer: self.clone(),
        })
    }

    fn with_attention<R>(&self, f: impl FnOnce(&mut AttentionLine) -> R) -> R {
        let mut line = self
            .attention
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut line)
    }

    async fn pulse_attention(&self, width: Duration) {
        self.with_attention(|line| line.assert());
        sleep(width).await;
        self.with_attention(|line| line.deassert());
    }

    /// Press-then-release of the controls in `mask`.
    pub async fn activate(self: &Arc<Self>, mask: u8) -> Result<(), EmulationError> {
        if !self.keys.accepts(mask) {
            return Err(EmulationError::InvalidMask {
                bus: self.bus,
                mask,
            });
        }
        let in_flight = self.begin()?;
        let sequencer = self.clone();

        let task = tokio::spawn(async move {
            let _in_flight = in_flight;
            sequencer.run_press(mask).await;
        });
        if let Err(e) = task.await {
            error!("press sequence on {} did not complete: {}", self.bus, e);
        }
        Ok(())
    }

    /// Shows a slider frame at `level`, then returns to the idle keypress frame.
    pub async fn slide(self: &Arc<Self>, name: &str, level: u8) -> Result<(), EmulationError> {
        let layout = *self
            .sliders
            .get(name)
            .ok_or_else(|| EmulationError::UnknownSlider {
                bus: self.bus,
                name: name.to_string(),
            })?;
        let in_flight = self.begin()?;
        let sequencer = self.clone();

        let task = tokio::spawn(async move {
            let _in_flight = in_flight;
            sequencer.run_slide(layout, level).await;
        });
        if let Err(e) = task.await {
            error!("slider sequence on {} did not complete: {}", self.bus, e);
        }
        Ok(())
    }

    async fn run_press(&self, mask: u8) {
        let index = self.keys.flag_byte;

        let pressed = self.image.set_bits(index, mask);
        debug!("{} press {:?} -> {}", self.bus, self.keys.names_for(mask), pressed);
        self.pulse_attention(self.timing.attention_pulse).await;
        sleep(self.timing.assert_hold).await;

        let released = self.image.clear_bits(index, mask);
        debug!("{} release -> {}", self.bus, released);
        self.pulse_attention(self.timing.release_pulse).await;
        sleep(self.timing.guard_delay).await;
    }

    async fn run_slide(&self, layout: SliderLayout, level: u8) {
        let frame = layout.frame(level);
        self.image.store(frame);
        debug!("{} slider -> {}", self.bus, frame);
        self.pulse_attention(self.timing.attention_pulse).await;
        sleep(self.timing.assert_hold).await;

        self.image.store(RegisterImage::IDLE);
        debug!("{} slider released -> {}", self.bus, RegisterImage::IDLE);
        self.pulse_attention(self.timing.release_pulse).await;
        sleep(self.timing.guard_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::{OutputPin, PinValue, SimulatedPin};

    const GENERAL_ON: u8 = 0x08;
    const GENERAL_OFF: u8 = 0x10;

    fn general_table() -> KeyTable {
        let mut controls = BTreeMap::new();
        controls.insert("general_on".to_string(), GENERAL_ON);
        controls.insert("general_off".to_string(), GENERAL_OFF);
        controls.insert("speed_minus".to_string(), 0x20);
        controls.insert("mode".to_string(), 0x40);
        controls.insert("speed_plus".to_string(), 0x80);
        KeyTable {
            flag_byte: 1,
            controls,
        }
    }

    fn sequencer() -> (Arc<PressSequencer>, Arc<SharedImage>, SimulatedPin) {
        let image = Arc::new(SharedImage::with_image(RegisterImage::IDLE));
        let pin = SimulatedPin::new("INT1".to_string(), 33, PinValue::High);
        let mut sliders = BTreeMap::new();
        sliders.insert(
            "colour".to_string(),
            SliderLayout {
                class: CommandClass::Slider,
                value_byte: 1,
                trailer: Some((4, 0x99)),
            },
        );
        let sequencer = PressSequencer::new(
            BusId::new(0),
            image.clone(),
            AttentionLine::new(Box::new(pin.clone()), true),
            general_table(),
            sliders,
            TimingPolicy::default(),
        );
        pin.clear_history();
        (Arc::new(sequencer), image, pin)
    }

    #[test]
    fn test_default_timing_is_valid() {
        assert!(TimingPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_timing_must_cover_poll_interval() {
        let timing = TimingPolicy {
            master_poll_interval: Duration::from_millis(500),
            ..TimingPolicy::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_release_wait_must_exceed_pulse() {
        let timing = TimingPolicy {
            assert_hold: Duration::from_millis(10),
            master_poll_interval: Duration::from_millis(5),
            ..TimingPolicy::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_key_table_accepts_only_defined_bits() {
        let table = general_table();
        assert_eq!(table.defined_bits(), 0xF8);
        assert!(table.accepts(GENERAL_ON));
        assert!(table.accepts(GENERAL_ON | GENERAL_OFF));
        assert!(!table.accepts(0x00));
        assert!(!table.accepts(0x01));
        assert!(!table.accepts(GENERAL_ON | 0x04));
        assert_eq!(table.names_for(GENERAL_ON), vec!["general_on"]);
    }

    #[test]
    fn test_key_table_validation() {
        let mut table = general_table();
        assert!(table.validate().is_ok());

        table.controls.insert("clash".to_string(), GENERAL_ON);
        assert!(table.validate().is_err());

        let table = KeyTable {
            flag_byte: 0,
            controls: BTreeMap::new(),
        };
        assert!(table.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_sets_then_clears_flag_bits() {
        let (sequencer, image, pin) = sequencer();
        let running = tokio::spawn({
            let sequencer = sequencer.clone();
            async move { sequencer.activate(GENERAL_ON).await }
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(image.snapshot().bytes(), &[0x02, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(pin.level(), PinValue::Low);
        assert!(sequencer.is_busy());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(image.snapshot().bytes(), &[0x02, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(pin.level(), PinValue::High);

        running.await.unwrap().unwrap();
        assert_eq!(image.snapshot(), RegisterImage::IDLE);
        assert_eq!(pin.level(), PinValue::High);
        assert!(!sequencer.is_busy());

        let levels: Vec<PinValue> = pin.transitions().iter().map(|t| t.value).collect();
        assert_eq!(
            levels,
            vec![PinValue::Low, PinValue::High, PinValue::Low, PinValue::High]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_mask_leaves_everything_untouched() {
        let (sequencer, image, pin) = sequencer();

        let result = sequencer.activate(0x01).await;
        assert_eq!(
            result,
            Err(EmulationError::InvalidMask {
                bus: BusId::new(0),
                mask: 0x01
            })
        );
        assert_eq!(image.snapshot(), RegisterImage::IDLE);
        assert!(pin.transitions().is_empty());
        assert!(!sequencer.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_press_is_rejected_while_busy() {
        let (sequencer, image, _pin) = sequencer();
        let first = tokio::spawn({
            let sequencer = sequencer.clone();
            async move { sequencer.activate(GENERAL_ON).await }
        });
        sleep(Duration::from_millis(5)).await;

        let second = sequencer.activate(GENERAL_OFF).await;
        assert_eq!(second, Err(EmulationError::Busy(BusId::new(0))));
        assert_eq!(image.snapshot().byte(1), GENERAL_ON);

        first.await.unwrap().unwrap();
        assert_eq!(image.snapshot(), RegisterImage::IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slider_frame_then_idle() {
        let (sequencer, image, _pin) = sequencer();
        let running = tokio::spawn({
            let sequencer = sequencer.clone();
            async move { sequencer.slide("colour", 0x3C).await }
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(image.snapshot().bytes(), &[0x03, 0x3C, 0x00, 0x00, 0x99]);

        running.await.unwrap().unwrap();
        assert_eq!(image.snapshot(), RegisterImage::IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_slider() {
        let (sequencer, _image, _pin) = sequencer();
        let result = sequencer.slide("hue", 1).await;
        assert!(matches!(result, Err(EmulationError::UnknownSlider { .. })));
        assert!(!sequencer.is_busy());
    }
}
