//! Text commands to core calls.
//!
//! Accepted forms:
//!
//! - `<control>`: a control name from any bus's key table, e.g. `general_on`
//! - `press <bus> <mask>`: raw mask, hex (`0x08`) or decimal
//! - `slider <name> <level>`: a slider from any bus, level hex or decimal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::controller::BusController;
use crate::error::DispatchError;
use crate::readiness::ReadyWaiter;
use crate::types::BusId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Press { bus: BusId, mask: u8 },
    Slide { bus: BusId, name: String, level: u8 },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Press { bus, mask } => write!(f, "press 0x{:02X} on {}", mask, bus),
            Command::Slide { bus, name, level } => {
                write!(f, "slider {} to 0x{:02X} on {}", name, level, bus)
            }
        }
    }
}

fn parse_number(what: &'static str, value: &str) -> Result<u8, DispatchError> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|_| DispatchError::BadArgument {
        what,
        value: value.to_string(),
    })
}

pub struct CommandDispatcher {
    controller: Arc<BusController>,
    waiter: ReadyWaiter,
    ready: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<BusController>, waiter: ReadyWaiter) -> Self {
        CommandDispatcher {
            controller,
            waiter,
            ready: AtomicBool::new(false),
        }
    }

    pub fn controller(&self) -> &Arc<BusController> {
        &self.controller
    }

    /// Every control and slider name the installed buses understand
    pub fn known_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for bus in self.controller.bus_ids() {
            if let Ok(channel) = self.controller.channel(bus) {
                let sequencer = channel.sequencer();
                names.extend(sequencer.keys().controls.keys().cloned());
                names.extend(sequencer.sliders().keys().map(|name| format!("slider {}", name)));
            }
        }
        names
    }

    pub fn parse(&self, line: &str) -> Result<Command, DispatchError> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(DispatchError::Empty)?;

        match head {
            "press" => {
                let bus = words.next().ok_or(DispatchError::BadArgument {
                    what: "bus",
                    value: String::new(),
                })?;
                let mask = words.next().ok_or(DispatchError::BadArgument {
                    what: "mask",
                    value: String::new(),
                })?;
                Ok(Command::Press {
                    bus: BusId::new(parse_number("bus", bus)?),
                    mask: parse_number("mask", mask)?,
                })
            }
            "slider" => {
                let name = words.next().ok_or(DispatchError::BadArgument {
                    what: "slider name",
                    value: String::new(),
                })?;
                let level = words.next().ok_or(DispatchError::BadArgument {
                    what: "level",
                    value: String::new(),
                })?;
                let level = parse_number("level", level)?;
                let bus = self
                    .find(|bus| {
                        self.controller
                            .channel(bus)
                            .map(|channel| channel.sequencer().sliders().contains_key(name))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| DispatchError::UnknownCommand(format!("slider {}", name)))?;
                Ok(Command::Slide {
                    bus,
                    name: name.to_string(),
                    level,
                })
            }
            control => {
                let mut found = None;
                for bus in self.controller.bus_ids() {
                    if let Ok(channel) = self.controller.channel(bus) {
                        if let Some(mask) = channel.sequencer().keys().lookup(control) {
                            found = Some(Command::Press { bus, mask });
                            break;
                        }
                    }
                }
                found.ok_or_else(|| DispatchError::UnknownCommand(control.to_string()))
            }
        }
    }

    fn find(&self, predicate: impl Fn(BusId) -> bool) -> Option<BusId> {
        self.controller.bus_ids().into_iter().find(|bus| predicate(*bus))
    }

    async fn wait_ready(&self) -> Result<(), DispatchError> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut waiter = self.waiter.clone();
        if !waiter.wait().await {
            return Err(DispatchError::NotReady);
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn dispatch(&self, line: &str) -> Result<Command, DispatchError> {
        let command = self.parse(line)?;
        self.wait_ready().await?;

        match &command {
            Command::Press { bus, mask } => self.controller.activate(*bus, *mask).await?,
            Command::Slide { bus, name, level } => {
                self.controller.slide(*bus, name, *level).await?
            }
        }
        Ok(command)
    }

    /// Runs `line` and reports the outcome to the log instead of the caller.
    pub async fn dispatch_and_log(&self, line: &str) {
        match self.dispatch(line).await {
            Ok(command) => info!("{} done", command),
            Err(e) => warn!("'{}' failed: {}", line.trim(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmulationError;
    use crate::pin::{PinValue, SimulatedPin};
    use crate::readiness::readiness;
    use crate::register_image::RegisterImage;
    use crate::system_config::EmulatorConfig;

    fn dispatcher() -> (CommandDispatcher, crate::readiness::Readiness) {
        let config = EmulatorConfig::default();
        let mut controller = BusController::new();
        for bus in &config.buses {
            let pin = SimulatedPin::new(format!("INT{}", bus.id.value()), bus.attention_pin, PinValue::High);
            controller
                .install(bus, config.timing.policy(), Box::new(pin))
                .unwrap();
        }
        let (ready, waiter) = readiness();
        (CommandDispatcher::new(Arc::new(controller), waiter), ready)
    }

    #[test]
    fn test_parse_control_names() {
        let (dispatcher, _ready) = dispatcher();
        assert_eq!(
            dispatcher.parse("general_on").unwrap(),
            Command::Press {
                bus: BusId::new(0),
                mask: 0x08
            }
        );
        assert_eq!(
            dispatcher.parse("zone4_off").unwrap(),
            Command::Press {
                bus: BusId::new(1),
                mask: 0x80
            }
        );
    }

    #[test]
    fn test_parse_raw_press() {
        let (dispatcher, _ready) = dispatcher();
        assert_eq!(
            dispatcher.parse("press 1 0x10").unwrap(),
            Command::Press {
                bus: BusId::new(1),
                mask: 0x10
            }
        );
        assert_eq!(
            dispatcher.parse("press 0 64").unwrap(),
            Command::Press {
                bus: BusId::new(0),
                mask: 0x40
            }
        );
        assert!(matches!(
            dispatcher.parse("press 0 0x1FF"),
            Err(DispatchError::BadArgument { what: "mask", .. })
        ));
        assert!(matches!(
            dispatcher.parse("press 0"),
            Err(DispatchError::BadArgument { .. })
        ));
    }

    #[test]
    fn test_parse_slider() {
        let (dispatcher, _ready) = dispatcher();
        assert_eq!(
            dispatcher.parse("slider saturation_luminosity 0x40").unwrap(),
            Command::Slide {
                bus: BusId::new(1),
                name: "saturation_luminosity".to_string(),
                level: 0x40
            }
        );
        assert!(matches!(
            dispatcher.parse("slider hue 3"),
            Err(DispatchError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        let (dispatcher, _ready) = dispatcher();
        assert_eq!(dispatcher.parse("   "), Err(DispatchError::Empty));
        assert_eq!(
            dispatcher.parse("disco"),
            Err(DispatchError::UnknownCommand("disco".to_string()))
        );
    }

    #[test]
    fn test_known_names_cover_both_buses() {
        let (dispatcher, _ready) = dispatcher();
        let names = dispatcher.known_names();
        assert!(names.contains(&"general_on".to_string()));
        assert!(names.contains(&"zone1_on".to_string()));
        assert!(names.contains(&"slider colour".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_runs_press() {
        let (dispatcher, ready) = dispatcher();
        ready.signal();

        let command = dispatcher.dispatch("mode").await.unwrap();
        assert_eq!(
            command,
            Command::Press {
                bus: BusId::new(0),
                mask: 0x40
            }
        );
        assert_eq!(
            dispatcher.controller().image(BusId::new(0)).unwrap(),
            RegisterImage::IDLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_mask_is_invalid() {
        let (dispatcher, ready) = dispatcher();
        ready.signal();

        let result = dispatcher.dispatch("press 0 0").await;
        assert_eq!(
            result,
            Err(DispatchError::Emulation(EmulationError::InvalidMask {
                bus: BusId::new(0),
                mask: 0
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bus_is_unavailable() {
        let (dispatcher, ready) = dispatcher();
        ready.signal();

        let result = dispatcher.dispatch("press 3 0x08").await;
        assert_eq!(
            result,
            Err(DispatchError::Emulation(EmulationError::BusUnavailable(
                BusId::new(3)
            )))
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_readiness_fails() {
        let (dispatcher, ready) = dispatcher();
        drop(ready);
        assert_eq!(
            dispatcher.dispatch("general_on").await,
            Err(DispatchError::NotReady)
        );
    }
}
