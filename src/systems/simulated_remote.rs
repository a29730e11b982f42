use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::bus::StatsSnapshot;
use crate::component::Component;
use crate::components::master::{LatchedEvent, MasterPoller, PollCounters};
use crate::controller::BusController;
use crate::dispatch::CommandDispatcher;
use crate::error::ConfigError;
use crate::pin::{OutputPin, PinValue, SimulatedPin};
use crate::readiness::{readiness, Readiness, ReadyWaiter};
use crate::register_image::RegisterImage;
use crate::simulator::SimulatedBus;
use crate::system_config::EmulatorConfig;
use crate::types::BusId;

/// Everything a status view needs to know about one bus
#[derive(Debug, Clone)]
pub struct BusStatus {
    pub id: BusId,
    pub image: RegisterImage,
    pub attention: PinValue,
    pub attention_asserted: bool,
    pub busy: bool,
    pub stats: StatsSnapshot,
    pub master: PollCounters,
}

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub name: String,
    pub description: String,
    pub bus_count: usize,
}

/// Both bus personalities wired to simulated hardware and a simulated master
pub struct SimulatedRemote {
    config: EmulatorConfig,
    controller: Arc<BusController>,
    buses: BTreeMap<BusId, Arc<Mutex<SimulatedBus>>>,
    pins: BTreeMap<BusId, SimulatedPin>,
    pollers: BTreeMap<BusId, MasterPoller>,
    ready: Readiness,
    is_running: bool,
}

impl SimulatedRemote {
    pub fn new(config: EmulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let timing = config.timing.policy();

        let mut controller = BusController::new();
        let mut pins = BTreeMap::new();
        for bus in &config.buses {
            let pin = SimulatedPin::new(
                format!("INT{}", bus.id.value()),
                bus.attention_pin,
                PinValue::Low,
            );
            controller.install(bus, timing, Box::new(pin.clone()))?;
            pins.insert(bus.id, pin);
        }

        let (ready, _) = readiness();
        let mut buses = BTreeMap::new();
        let mut pollers = BTreeMap::new();
        for bus in &config.buses {
            let engine = controller.take_peripheral(bus.id).ok_or_else(|| {
                ConfigError::Invalid(format!("{} peripheral already taken", bus.id))
            })?;
            let address = bus.slave_address()?;
            let simulated = Arc::new(Mutex::new(SimulatedBus::new(address, engine)));

            pollers.insert(
                bus.id,
                MasterPoller::new(
                    bus.id,
                    simulated.clone(),
                    address,
                    bus.key_table.flag_byte,
                    config.master.read_length,
                    config.master.poll_interval(),
                )
                .gated_on(ready.waiter()),
            );
            buses.insert(bus.id, simulated);
        }

        Ok(SimulatedRemote {
            config,
            controller: Arc::new(controller),
            buses,
            pins,
            pollers,
            ready,
            is_running: false,
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<BusController> {
        &self.controller
    }

    pub fn waiter(&self) -> ReadyWaiter {
        self.ready.waiter()
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.controller.clone(), self.waiter())
    }

    pub fn bus(&self, id: BusId) -> Option<&Arc<Mutex<SimulatedBus>>> {
        self.buses.get(&id)
    }

    pub fn attention_pin(&self, id: BusId) -> Option<&SimulatedPin> {
        self.pins.get(&id)
    }

    /// Starts every master poller and opens the readiness gate.
    pub fn start(&mut self) {
        if self.is_running {
            warn!("{} already running", self.config.name);
            return;
        }
        for poller in self.pollers.values_mut() {
            poller.run();
        }
        self.is_running = true;
        self.ready.signal();
        info!(
            "{} running with {} buses",
            self.config.name,
            self.buses.len()
        );
    }

    pub fn stop(&mut self) {
        for poller in self.pollers.values_mut() {
            poller.stop();
        }
        if self.is_running {
            info!("{} stopped", self.config.name);
        }
        self.is_running = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Latched master events from every bus, oldest first per bus
    pub fn latched_events(&self) -> Vec<LatchedEvent> {
        let mut all = Vec::new();
        for poller in self.pollers.values() {
            let events = poller.events();
            let guard = match events.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            all.extend(guard.iter().copied());
        }
        all
    }

    pub fn bus_status(&self) -> Vec<BusStatus> {
        let mut status = Vec::new();
        for id in self.controller.bus_ids() {
            let Ok(channel) = self.controller.channel(id) else {
                continue;
            };
            status.push(BusStatus {
                id,
                image: channel.image().snapshot(),
                attention: self
                    .pins
                    .get(&id)
                    .map(|pin| pin.level())
                    .unwrap_or(PinValue::Low),
                attention_asserted: channel.sequencer().attention_asserted(),
                busy: channel.sequencer().is_busy(),
                stats: channel.stats().snapshot(),
                master: self
                    .pollers
                    .get(&id)
                    .map(|poller| poller.counters())
                    .unwrap_or_default(),
            });
        }
        status
    }

    pub fn get_system_info(&self) -> SystemInfo {
        SystemInfo {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            bus_count: self.buses.len(),
        }
    }
}

impl Drop for SimulatedRemote {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SlaveAddress;

    #[test]
    fn test_builds_from_default_config() {
        let remote = SimulatedRemote::new(EmulatorConfig::default()).unwrap();
        let info = remote.get_system_info();
        assert_eq!(info.bus_count, 2);
        assert!(!remote.waiter().is_ready());

        let status = remote.bus_status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|bus| bus.image == RegisterImage::IDLE));
        assert!(status.iter().all(|bus| bus.attention == PinValue::High));
    }

    #[test]
    fn test_buses_serve_idle_frame() {
        let remote = SimulatedRemote::new(EmulatorConfig::default()).unwrap();
        let bus = remote.bus(BusId::new(1)).unwrap();
        let bytes = bus
            .lock()
            .unwrap()
            .read(SlaveAddress::new(0x53), 5)
            .unwrap();
        assert_eq!(bytes, RegisterImage::IDLE.bytes().to_vec());
    }

    #[test]
    fn test_start_signals_readiness() {
        let mut remote = SimulatedRemote::new(EmulatorConfig::default()).unwrap();
        remote.start();
        assert!(remote.is_running());
        assert!(remote.waiter().is_ready());
        remote.stop();
        assert!(!remote.is_running());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EmulatorConfig::default();
        config.buses.clear();
        assert!(SimulatedRemote::new(config).is_err());
    }
}
