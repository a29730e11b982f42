//! # JSON Configuration System
//!
//! Describes both bus personalities, the press timing and the simulated
//! master in one JSON document.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rusty_remote::system_config::EmulatorConfig;
//!
//! let config = EmulatorConfig::from_json_file("configs/milight.json")
//!     .expect("Could not load configuration!");
//! println!("{} with {} buses", config.name, config.buses.len());
//! ```
//!
//! ## Configuration File Format
//!
//! ```json
//! {
//!   "name": "MiLightRemote",
//!   "buses": [
//!     {
//!       "id": 0, "address": 83, "sda_pin": 12, "scl_pin": 13, "attention_pin": 33,
//!       "key_table": { "flag_byte": 1, "controls": { "general_on": 8 } },
//!       "sliders": { "colour": { "class": 3, "value_byte": 1, "trailer": [4, 153] } }
//!     }
//!   ],
//!   "timing": { "attention_pulse_ms": 50, "assert_hold_ms": 100 }
//! }
//! ```
//!
//! Sections left out of the document take their defaults.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::register_image::{CommandClass, IMAGE_LEN};
use crate::sequencer::{KeyTable, SliderLayout, TimingPolicy};
use crate::types::{BusId, SlaveAddress, MAX_BUSES};

/// Address the stock controller polls for its remote
pub const DEFAULT_ADDRESS: u8 = 0x53;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub buses: Vec<BusConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_active_low() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub id: BusId,
    pub address: u8,
    pub sda_pin: u8,
    pub scl_pin: u8,
    pub attention_pin: u8,
    #[serde(default = "default_active_low")]
    pub attention_active_low: bool,
    pub key_table: KeyTable,
    #[serde(default)]
    pub sliders: BTreeMap<String, SliderConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliderConfig {
    /// Command class byte, `3` or `6`
    pub class: u8,
    pub value_byte: usize,
    #[serde(default)]
    pub trailer: Option<(usize, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub attention_pulse_ms: u64,
    pub assert_hold_ms: u64,
    pub release_pulse_ms: u64,
    pub guard_delay_ms: u64,
    pub master_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub poll_interval_ms: u64,
    pub read_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub refresh_rate_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig::from(TimingPolicy::default())
    }
}

impl From<TimingPolicy> for TimingConfig {
    fn from(policy: TimingPolicy) -> Self {
        TimingConfig {
            attention_pulse_ms: policy.attention_pulse.as_millis() as u64,
            assert_hold_ms: policy.assert_hold.as_millis() as u64,
            release_pulse_ms: policy.release_pulse.as_millis() as u64,
            guard_delay_ms: policy.guard_delay.as_millis() as u64,
            master_poll_interval_ms: policy.master_poll_interval.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn policy(&self) -> TimingPolicy {
        TimingPolicy {
            attention_pulse: Duration::from_millis(self.attention_pulse_ms),
            assert_hold: Duration::from_millis(self.assert_hold_ms),
            release_pulse: Duration::from_millis(self.release_pulse_ms),
            guard_delay: Duration::from_millis(self.guard_delay_ms),
            master_poll_interval: Duration::from_millis(self.master_poll_interval_ms),
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            poll_interval_ms: 20,
            read_length: IMAGE_LEN,
        }
    }
}

impl MasterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            refresh_rate_ms: 100,
        }
    }
}

impl SliderConfig {
    pub fn layout(&self) -> Result<SliderLayout, ConfigError> {
        let class = match CommandClass::from_byte(self.class) {
            Some(CommandClass::Keypress) | None => {
                return Err(ConfigError::Invalid(format!(
                    "slider class 0x{:02X} is not a slider class",
                    self.class
                )))
            }
            Some(class) => class,
        };
        if self.value_byte == 0 || self.value_byte >= IMAGE_LEN {
            return Err(ConfigError::Invalid(format!(
                "slider value byte {} out of range",
                self.value_byte
            )));
        }
        if let Some((index, _)) = self.trailer {
            if index == 0 || index >= IMAGE_LEN || index == self.value_byte {
                return Err(ConfigError::Invalid(format!(
                    "slider trailer byte {} out of range or overlaps the value byte",
                    index
                )));
            }
        }
        Ok(SliderLayout {
            class,
            value_byte: self.value_byte,
            trailer: self.trailer,
        })
    }
}

impl BusConfig {
    pub fn slave_address(&self) -> Result<SlaveAddress, ConfigError> {
        SlaveAddress::checked(u16::from(self.address)).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{}: address 0x{:02X} is not a 7-bit address",
                self.id, self.address
            ))
        })
    }

    pub fn slider_layouts(&self) -> Result<BTreeMap<String, SliderLayout>, ConfigError> {
        self.sliders
            .iter()
            .map(|(name, slider)| Ok((name.clone(), slider.layout()?)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.index() >= MAX_BUSES {
            return Err(ConfigError::Invalid(format!(
                "{} exceeds the {} supported buses",
                self.id, MAX_BUSES
            )));
        }
        self.slave_address()?;
        if self.sda_pin == self.scl_pin {
            return Err(ConfigError::Invalid(format!(
                "{}: SDA and SCL share GPIO{}",
                self.id, self.sda_pin
            )));
        }
        if self.attention_pin == self.sda_pin || self.attention_pin == self.scl_pin {
            return Err(ConfigError::Invalid(format!(
                "{}: attention GPIO{} collides with a bus pin",
                self.id, self.attention_pin
            )));
        }
        self.key_table
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", self.id, e)))?;
        self.slider_layouts()?;
        Ok(())
    }
}

impl EmulatorConfig {
    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_json_str(&content)?;
        debug!("Loaded configuration '{}' from {}", config.name, path);
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: EmulatorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn bus(&self, id: BusId) -> Option<&BusConfig> {
        self.buses.iter().find(|bus| bus.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buses.is_empty() {
            return Err(ConfigError::Invalid("no buses configured".to_string()));
        }

        let mut ids = HashSet::new();
        let mut pins: HashMap<u8, BusId> = HashMap::new();
        for bus in &self.buses {
            bus.validate()?;
            if !ids.insert(bus.id) {
                return Err(ConfigError::Invalid(format!("{} configured twice", bus.id)));
            }
            for pin in [bus.sda_pin, bus.scl_pin, bus.attention_pin] {
                if let Some(owner) = pins.insert(pin, bus.id) {
                    return Err(ConfigError::Invalid(format!(
                        "GPIO{} used by both {} and {}",
                        pin, owner, bus.id
                    )));
                }
            }
        }

        self.timing.policy().validate()?;

        if self.master.read_length == 0 {
            return Err(ConfigError::Invalid(
                "master read length must be at least one byte".to_string(),
            ));
        }
        Ok(())
    }
}

fn controls(entries: &[(&str, u8)]) -> BTreeMap<String, u8> {
    entries
        .iter()
        .map(|(name, bits)| (name.to_string(), *bits))
        .collect()
}

impl Default for EmulatorConfig {
    /// The stock remote: general keys on bus 0, zone keys on bus 1.
    fn default() -> Self {
        let general = BusConfig {
            id: BusId::new(0),
            address: DEFAULT_ADDRESS,
            sda_pin: 12,
            scl_pin: 13,
            attention_pin: 33,
            attention_active_low: true,
            key_table: KeyTable {
                flag_byte: 1,
                controls: controls(&[
                    ("general_on", 0x08),
                    ("general_off", 0x10),
                    ("speed_minus", 0x20),
                    ("mode", 0x40),
                    ("speed_plus", 0x80),
                ]),
            },
            sliders: [
                (
                    "colour".to_string(),
                    SliderConfig {
                        class: 0x03,
                        value_byte: 1,
                        trailer: Some((4, 0x99)),
                    },
                ),
                (
                    "temperature".to_string(),
                    SliderConfig {
                        class: 0x06,
                        value_byte: 4,
                        trailer: None,
                    },
                ),
            ]
            .into_iter()
            .collect(),
        };

        let zones = BusConfig {
            id: BusId::new(1),
            address: DEFAULT_ADDRESS,
            sda_pin: 19,
            scl_pin: 2,
            attention_pin: 26,
            attention_active_low: true,
            key_table: KeyTable {
                flag_byte: 1,
                controls: controls(&[
                    ("zone1_on", 0x10),
                    ("zone1_off", 0x20),
                    ("zone2_on", 0x01),
                    ("zone2_off", 0x02),
                    ("zone3_on", 0x04),
                    ("zone3_off", 0x08),
                    ("zone4_on", 0x40),
                    ("zone4_off", 0x80),
                ]),
            },
            sliders: [(
                "saturation_luminosity".to_string(),
                SliderConfig {
                    class: 0x03,
                    value_byte: 1,
                    trailer: None,
                },
            )]
            .into_iter()
            .collect(),
        };

        EmulatorConfig {
            name: "MiLightRemote".to_string(),
            description: "Two-personality MiLight remote on a pair of I2C buses".to_string(),
            version: default_version(),
            metadata: HashMap::new(),
            buses: vec![general, zones],
            timing: TimingConfig::default(),
            master: MasterConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}
