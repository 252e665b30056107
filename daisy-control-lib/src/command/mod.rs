//! Command translation: the capability registry and the envelope codec.

pub mod codec;
pub mod registry;

pub use codec::{CommandCodec, CommandEntry, CommandEnvelope};
pub use registry::{Action, ActionKind, CapabilityDescriptor, DeviceRegistry, Motion};
