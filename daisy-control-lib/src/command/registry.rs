use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

use crate::error::{DaisyError, Result};

/// Device type id for white lights mounted on the pergola frame.
pub const DEVICE_TYPE_WHITE_LIGHT: u32 = 21;
/// Device type id for awnings covers.
pub const DEVICE_TYPE_AWNINGS_COVER: u32 = 22;
/// Device type id for the RGB light strip.
pub const DEVICE_TYPE_RGB_LIGHT: u32 = 23;
/// Device type id for the slats (louvre) motor.
pub const DEVICE_TYPE_SLATS_COVER: u32 = 24;
/// Alternate device type id reported for white lights on some installations.
pub const DEVICE_TYPE_WHITE_LIGHT_ALT: u32 = 25;

/// Direction for a cover movement command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motion {
    Open,
    Stop,
    Close,
}

/**
A semantic, device-type-aware action.

An `Action` says what the caller wants to happen; the registry decides whether
the targeted device type can do it and how the vendor spells it on the wire.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Switch the device on or off.
    Power(bool),
    /// Set color and brightness in one command. Channels are 0-255, the
    /// brightness scale is 0-100.
    Color { rgb: (u8, u8, u8), brightness: u8 },
    /// Drive a cover open, stop it, or drive it closed.
    OpenStopClose(Motion),
    /// Move a cover to one of the discrete level stops the remote exposes
    /// (percent open).
    Level(u8),
}

/// The action families the vendor protocol knows, without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Power,
    Color,
    OpenStopClose,
    Level,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Power(_) => ActionKind::Power,
            Action::Color { .. } => ActionKind::Color,
            Action::OpenStopClose(_) => ActionKind::OpenStopClose,
            Action::Level(_) => ActionKind::Level,
        }
    }
}

impl ActionKind {
    /// The vendor `commandAction` string for this family.
    pub fn command_action(&self) -> &'static str {
        match self {
            ActionKind::Power => "POWER",
            ActionKind::Color => "COLOR",
            ActionKind::OpenStopClose => "OPEN_STOP_CLOSE",
            ActionKind::Level => "LEVEL",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_action())
    }
}

/// Declared value domain for an action parameter. Range bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDomain {
    Range { min: i64, max: i64 },
    OneOf(Vec<i64>),
}

impl ValueDomain {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            ValueDomain::Range { min, max } => (*min..=*max).contains(&value),
            ValueDomain::OneOf(values) => values.contains(&value),
        }
    }
}

impl fmt::Display for ValueDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDomain::Range { min, max } => write!(f, "{min}..={max}"),
            ValueDomain::OneOf(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", values.join(", "))
            }
        }
    }
}

/// One concrete vendor opcode: the numeric id plus the parameter and
/// low-level channel observed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCode {
    pub command_id: u32,
    pub command_param: &'static str,
    pub lowlevel_command: Option<&'static str>,
}

/// Opcodes for the POWER family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerOpcodes {
    pub on: OpCode,
    pub off: OpCode,
}

/// Opcodes and value domains for the COLOR family. The parameter is built
/// from the channels at encode time, so only the id and channel are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorOpcodes {
    pub command_id: u32,
    pub lowlevel_command: Option<&'static str>,
    pub brightness: ValueDomain,
    pub channel: ValueDomain,
}

/// Opcodes for the OPEN_STOP_CLOSE family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscOpcodes {
    pub open: OpCode,
    pub stop: OpCode,
    pub close: OpCode,
}

/// Opcodes for the LEVEL family: the discrete percent stops the remote
/// control exposes, each with its own opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelOpcodes {
    pub stops: Vec<(i64, OpCode)>,
}

impl LevelOpcodes {
    pub fn domain(&self) -> ValueDomain {
        ValueDomain::OneOf(self.stops.iter().map(|(percent, _)| *percent).collect())
    }
}

/**
What one `idDevicetype` can do, and how each action is spelled on the wire.

A descriptor is pure data. Supporting a new accessory type means adding one
descriptor to the table in [`builtin_descriptors`] (or registering it at
runtime with [`DeviceRegistry::with_descriptor`]); nothing in the codec or
dispatcher changes.
*/
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub id_devicetype: u32,
    pub label: &'static str,
    pub power: Option<PowerOpcodes>,
    pub color: Option<ColorOpcodes>,
    pub open_stop_close: Option<OscOpcodes>,
    pub level: Option<LevelOpcodes>,
}

/// An action resolved against a descriptor: everything command-specific that
/// goes into one `commandsList` entry, minus the device targeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub command_action: &'static str,
    pub command_id: u32,
    pub command_param: String,
    pub lowlevel_command: Option<&'static str>,
}

impl From<(ActionKind, OpCode)> for ResolvedCommand {
    fn from((kind, opcode): (ActionKind, OpCode)) -> Self {
        ResolvedCommand {
            command_action: kind.command_action(),
            command_id: opcode.command_id,
            command_param: opcode.command_param.to_string(),
            lowlevel_command: opcode.lowlevel_command,
        }
    }
}

impl CapabilityDescriptor {
    pub fn supports(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Power => self.power.is_some(),
            ActionKind::Color => self.color.is_some(),
            ActionKind::OpenStopClose => self.open_stop_close.is_some(),
            ActionKind::Level => self.level.is_some(),
        }
    }

    /// The action families this device type supports.
    pub fn supported_actions(&self) -> Vec<ActionKind> {
        [
            ActionKind::Power,
            ActionKind::Color,
            ActionKind::OpenStopClose,
            ActionKind::Level,
        ]
        .into_iter()
        .filter(|kind| self.supports(*kind))
        .collect()
    }

    fn invalid_action(&self, kind: ActionKind) -> DaisyError {
        DaisyError::InvalidAction {
            id_devicetype: self.id_devicetype,
            action: kind.command_action(),
        }
    }

    fn encode(&self, action: &Action) -> Result<ResolvedCommand> {
        let kind = action.kind();
        match *action {
            Action::Power(on) => {
                let opcodes = self.power.as_ref().ok_or_else(|| self.invalid_action(kind))?;
                let opcode = if on { opcodes.on } else { opcodes.off };
                Ok(ResolvedCommand::from((kind, opcode)))
            }
            Action::Color { rgb, brightness } => {
                let opcodes = self.color.as_ref().ok_or_else(|| self.invalid_action(kind))?;
                if !opcodes.brightness.contains(i64::from(brightness)) {
                    return Err(DaisyError::OutOfRange {
                        action: kind.command_action(),
                        value: i64::from(brightness),
                        domain: opcodes.brightness.clone(),
                    });
                }
                let (r, g, b) = rgb;
                for channel in [r, g, b] {
                    if !opcodes.channel.contains(i64::from(channel)) {
                        return Err(DaisyError::OutOfRange {
                            action: kind.command_action(),
                            value: i64::from(channel),
                            domain: opcodes.channel.clone(),
                        });
                    }
                }
                Ok(ResolvedCommand {
                    command_action: kind.command_action(),
                    command_id: opcodes.command_id,
                    // The vendor packs brightness and channels into one
                    // zero-padded scalar, e.g. "A080R255G010B000".
                    command_param: format!("A{brightness:03}R{r:03}G{g:03}B{b:03}"),
                    lowlevel_command: opcodes.lowlevel_command,
                })
            }
            Action::OpenStopClose(motion) => {
                let opcodes = self
                    .open_stop_close
                    .as_ref()
                    .ok_or_else(|| self.invalid_action(kind))?;
                let opcode = match motion {
                    Motion::Open => opcodes.open,
                    Motion::Stop => opcodes.stop,
                    Motion::Close => opcodes.close,
                };
                Ok(ResolvedCommand::from((kind, opcode)))
            }
            Action::Level(percent) => {
                let opcodes = self.level.as_ref().ok_or_else(|| self.invalid_action(kind))?;
                let opcode = opcodes
                    .stops
                    .iter()
                    .find(|(stop, _)| *stop == i64::from(percent))
                    .map(|(_, opcode)| *opcode)
                    .ok_or_else(|| DaisyError::OutOfRange {
                        action: kind.command_action(),
                        value: i64::from(percent),
                        domain: opcodes.domain(),
                    })?;
                Ok(ResolvedCommand::from((kind, opcode)))
            }
        }
    }
}

/**
The registry of capability descriptors, keyed by `idDevicetype`.

Unknown device types have no descriptor, so every action against them fails
closed with [`DaisyError::UnsupportedDevice`].
*/
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    descriptors: HashMap<u32, CapabilityDescriptor>,
}

lazy_static! {
    static ref BUILTIN: DeviceRegistry = DeviceRegistry::from_descriptors(builtin_descriptors());
}

impl DeviceRegistry {
    /// The registry holding every device type this crate knows about.
    pub fn builtin() -> &'static DeviceRegistry {
        &BUILTIN
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = CapabilityDescriptor>) -> Self {
        DeviceRegistry {
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.id_devicetype, descriptor))
                .collect(),
        }
    }

    /// Registers a descriptor, replacing any previous entry for the same
    /// device type. This is the extension point for accessory types the
    /// built-in table does not cover yet.
    pub fn with_descriptor(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.descriptors.insert(descriptor.id_devicetype, descriptor);
        self
    }

    pub fn lookup(&self, id_devicetype: u32) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(&id_devicetype)
    }

    pub fn supports(&self, id_devicetype: u32, kind: ActionKind) -> bool {
        self.lookup(id_devicetype)
            .map(|descriptor| descriptor.supports(kind))
            .unwrap_or(false)
    }

    /// Resolves an action against a device type's descriptor.
    pub fn encode(&self, id_devicetype: u32, action: &Action) -> Result<ResolvedCommand> {
        let descriptor = self
            .lookup(id_devicetype)
            .ok_or(DaisyError::UnsupportedDevice(id_devicetype))?;
        descriptor.encode(action)
    }
}

// Every opcode below was captured by watching the vendor app talk to real
// hardware; none of this is documented by Teleco.

fn percent_level_stops() -> LevelOpcodes {
    LevelOpcodes {
        stops: vec![
            (
                33,
                OpCode {
                    command_id: 97,
                    command_param: "LEV2",
                    lowlevel_command: Some("CH2"),
                },
            ),
            (
                66,
                OpCode {
                    command_id: 98,
                    command_param: "LEV3",
                    lowlevel_command: Some("CH3"),
                },
            ),
            (
                100,
                OpCode {
                    command_id: 99,
                    command_param: "LEV4",
                    lowlevel_command: Some("CH4"),
                },
            ),
        ],
    }
}

fn white_light(id_devicetype: u32) -> CapabilityDescriptor {
    CapabilityDescriptor {
        id_devicetype,
        label: "white light",
        power: Some(PowerOpcodes {
            on: OpCode {
                command_id: 146,
                command_param: "ON",
                lowlevel_command: Some("CH1"),
            },
            off: OpCode {
                command_id: 147,
                command_param: "OFF",
                lowlevel_command: Some("CH8"),
            },
        }),
        color: Some(ColorOpcodes {
            command_id: 146,
            lowlevel_command: Some("CH1"),
            brightness: ValueDomain::Range { min: 0, max: 100 },
            channel: ValueDomain::Range { min: 0, max: 255 },
        }),
        open_stop_close: None,
        level: None,
    }
}

/// The built-in capability table. One entry per known `idDevicetype`.
pub fn builtin_descriptors() -> Vec<CapabilityDescriptor> {
    vec![
        white_light(DEVICE_TYPE_WHITE_LIGHT),
        white_light(DEVICE_TYPE_WHITE_LIGHT_ALT),
        CapabilityDescriptor {
            id_devicetype: DEVICE_TYPE_AWNINGS_COVER,
            label: "awnings cover",
            power: None,
            color: None,
            open_stop_close: Some(OscOpcodes {
                open: OpCode {
                    command_id: 75,
                    command_param: "OPEN",
                    lowlevel_command: Some("CH5"),
                },
                stop: OpCode {
                    command_id: 76,
                    command_param: "STOP",
                    lowlevel_command: Some("CH7"),
                },
                close: OpCode {
                    command_id: 77,
                    command_param: "CLOSE",
                    lowlevel_command: Some("CH8"),
                },
            }),
            level: Some(percent_level_stops()),
        },
        CapabilityDescriptor {
            id_devicetype: DEVICE_TYPE_RGB_LIGHT,
            label: "rgb light",
            power: Some(PowerOpcodes {
                on: OpCode {
                    command_id: 138,
                    command_param: "ON",
                    lowlevel_command: None,
                },
                off: OpCode {
                    command_id: 138,
                    command_param: "OFF",
                    lowlevel_command: None,
                },
            }),
            color: Some(ColorOpcodes {
                command_id: 137,
                lowlevel_command: None,
                brightness: ValueDomain::Range { min: 0, max: 100 },
                channel: ValueDomain::Range { min: 0, max: 255 },
            }),
            open_stop_close: None,
            level: None,
        },
        CapabilityDescriptor {
            id_devicetype: DEVICE_TYPE_SLATS_COVER,
            label: "slats cover",
            power: None,
            color: None,
            open_stop_close: Some(OscOpcodes {
                open: OpCode {
                    command_id: 94,
                    command_param: "OPEN",
                    lowlevel_command: Some("CH4"),
                },
                stop: OpCode {
                    command_id: 95,
                    command_param: "STOP",
                    lowlevel_command: Some("CH7"),
                },
                close: OpCode {
                    command_id: 96,
                    command_param: "CLOSE",
                    lowlevel_command: Some("CH1"),
                },
            }),
            level: Some(percent_level_stops()),
        },
    ]
}
