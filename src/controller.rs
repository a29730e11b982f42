//! Owner of every per-bus resource.
//!
//! Each installed bus gets one register image, one press sequencer writing
//! it and one peripheral engine reading it. The engine is handed out exactly
//! once to whatever services the bus interrupt; the sequencer stays here and
//! is reached through [`BusController::activate`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::bus::{EngineStats, PeripheralEngine};
use crate::error::{ConfigError, EmulationError};
use crate::pin::{AttentionLine, OutputPin};
use crate::register_image::{RegisterImage, SharedImage};
use crate::sequencer::{PressSequencer, TimingPolicy};
use crate::system_config::BusConfig;
use crate::types::{BusId, SlaveAddress};

pub struct BusChannel {
    id: BusId,
    address: SlaveAddress,
    image: Arc<SharedImage>,
    stats: Arc<EngineStats>,
    sequencer: Arc<PressSequencer>,
    engine: Mutex<Option<PeripheralEngine>>,
}

impl BusChannel {
    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn address(&self) -> SlaveAddress {
        self.address
    }

    pub fn image(&self) -> &Arc<SharedImage> {
        &self.image
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn sequencer(&self) -> &Arc<PressSequencer> {
        &self.sequencer
    }
}

#[derive(Default)]
pub struct BusController {
    channels: BTreeMap<BusId, BusChannel>,
}

impl BusController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures one bus and publishes its idle frame.
    ///
    /// Reads served before this call return zeros; afterwards they return
    /// [`RegisterImage::IDLE`].
    pub fn install(
        &mut self,
        config: &BusConfig,
        timing: TimingPolicy,
        attention: Box<dyn OutputPin>,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        timing.validate()?;
        if self.channels.contains_key(&config.id) {
            return Err(ConfigError::Invalid(format!(
                "{} is already installed",
                config.id
            )));
        }

        let address = config.slave_address()?;
        let image = Arc::new(SharedImage::new());
        let stats = Arc::new(EngineStats::default());
        let engine = PeripheralEngine::new(config.id, image.clone(), stats.clone());

        let sequencer = PressSequencer::new(
            config.id,
            image.clone(),
            AttentionLine::new(attention, config.attention_active_low),
            config.key_table.clone(),
            config.slider_layouts()?,
            timing,
        );

        image.store(RegisterImage::IDLE);
        info!(
            "{} configured at address {} (SDA GPIO{}, SCL GPIO{}, attention GPIO{})",
            config.id, address, config.sda_pin, config.scl_pin, config.attention_pin
        );

        self.channels.insert(
            config.id,
            BusChannel {
                id: config.id,
                address,
                image,
                stats,
                sequencer: Arc::new(sequencer),
                engine: Mutex::new(Some(engine)),
            },
        );
        Ok(())
    }

    pub fn bus_ids(&self) -> Vec<BusId> {
        self.channels.keys().copied().collect()
    }

    pub fn channel(&self, bus: BusId) -> Result<&BusChannel, EmulationError> {
        self.channels
            .get(&bus)
            .ok_or(EmulationError::BusUnavailable(bus))
    }

    /// Hands out the bus's engine. Only the first call per bus succeeds.
    pub fn take_peripheral(&self, bus: BusId) -> Option<PeripheralEngine> {
        let channel = self.channels.get(&bus)?;
        let mut slot = channel
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let engine = slot.take();
        if engine.is_some() {
            debug!("{} peripheral engine handed out", bus);
        }
        engine
    }

    pub fn image(&self, bus: BusId) -> Result<RegisterImage, EmulationError> {
        Ok(self.channel(bus)?.image.snapshot())
    }

    pub fn stats(&self, bus: BusId) -> Result<&Arc<EngineStats>, EmulationError> {
        Ok(&self.channel(bus)?.stats)
    }

    /// Press-then-release of `mask` on `bus`.
    pub async fn activate(&self, bus: BusId, mask: u8) -> Result<(), EmulationError> {
        let sequencer = self.channel(bus)?.sequencer.clone();
        sequencer.activate(mask).await
    }

    /// Slider frame at `level`, then back to the idle frame.
    pub async fn slide(&self, bus: BusId, name: &str, level: u8) -> Result<(), EmulationError> {
        let sequencer = self.channel(bus)?.sequencer.clone();
        sequencer.slide(name, level).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::{PinValue, SimulatedPin};
    use crate::system_config::EmulatorConfig;

    fn installed() -> (BusController, Vec<SimulatedPin>) {
        let config = EmulatorConfig::default();
        let mut controller = BusController::new();
        let mut pins = Vec::new();
        for bus in &config.buses {
            let pin = SimulatedPin::new(format!("INT{}", bus.id.value()), bus.attention_pin, PinValue::Low);
            controller
                .install(bus, config.timing.policy(), Box::new(pin.clone()))
                .unwrap();
            pins.push(pin);
        }
        (controller, pins)
    }

    #[test]
    fn test_install_publishes_idle_frame() {
        let (controller, pins) = installed();
        assert_eq!(controller.bus_ids(), vec![BusId::new(0), BusId::new(1)]);
        assert_eq!(controller.image(BusId::new(0)).unwrap(), RegisterImage::IDLE);
        assert_eq!(controller.image(BusId::new(1)).unwrap(), RegisterImage::IDLE);
        // Active-low lines are parked high
        assert!(pins.iter().all(|pin| pin.level() == PinValue::High));
    }

    #[test]
    fn test_install_twice_rejected() {
        let (mut controller, _) = installed();
        let config = EmulatorConfig::default();
        let pin = SimulatedPin::new("INT".to_string(), 33, PinValue::High);
        let result = controller.install(&config.buses[0], config.timing.policy(), Box::new(pin));
        assert!(result.is_err());
    }

    #[test]
    fn test_peripheral_handed_out_once() {
        let (controller, _) = installed();
        assert!(controller.take_peripheral(BusId::new(0)).is_some());
        assert!(controller.take_peripheral(BusId::new(0)).is_none());
        assert!(controller.take_peripheral(BusId::new(1)).is_some());
        assert!(controller.take_peripheral(BusId::new(7)).is_none());
    }

    #[test]
    fn test_unknown_bus_is_unavailable() {
        let (controller, _) = installed();
        assert_eq!(
            controller.image(BusId::new(2)),
            Err(EmulationError::BusUnavailable(BusId::new(2)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_unknown_bus() {
        let (controller, _) = installed();
        let result = controller.activate(BusId::new(5), 0x08).await;
        assert_eq!(result, Err(EmulationError::BusUnavailable(BusId::new(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_leaves_other_bus_alone() {
        let (controller, pins) = installed();
        for pin in &pins {
            pin.clear_history();
        }

        controller.activate(BusId::new(1), 0x10).await.unwrap();

        assert_eq!(controller.image(BusId::new(0)).unwrap(), RegisterImage::IDLE);
        assert_eq!(controller.image(BusId::new(1)).unwrap(), RegisterImage::IDLE);
        assert!(pins[0].transitions().is_empty());
        assert_eq!(pins[1].transitions().len(), 4);
    }
}
