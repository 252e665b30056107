//! # Daisy Control Library for Teleco Automation pergolas
//!
//! `daisy-control-lib` is a Rust library for controlling Teleco Automation
//! "Daisy" home-automation accessories (pergola slats, awnings, RGB and
//! white lights) through the vendor's cloud HTTP API. It provides a
//! capability registry that maps each `idDevicetype` to the actions it
//! supports, a codec that turns semantic actions into the vendor's command
//! envelope, a dispatcher that submits envelopes under a managed session,
//! and a discovery routine that enumerates the devices registered to an
//! account.
//!
//! The protocol is reverse-engineered from the vendor app; nothing here is
//! documented by Teleco. The opcode table in
//! [`command::registry`] is the single source of truth for what each device
//! type understands, and extending it for a new accessory type is a pure
//! data change.
//!
//! ## Example
//!
//! Turning the pergola's RGB light red at 80% brightness:
//!
//! ```no_run
//! use daisy_control_lib::command::registry::Action;
//! use daisy_control_lib::control_interface::ControlInterface;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ControlInterface::new("user@example.com", "password");
//!
//!     let installation = client.installations().await?.remove(0);
//!     let rooms = client.rooms(&installation).await?;
//!     let light = &rooms[0].device_list[0];
//!
//!     let outcome = client
//!         .dispatch(
//!             &installation,
//!             light,
//!             &Action::Color {
//!                 rgb: (255, 0, 0),
//!                 brightness: 80,
//!             },
//!         )
//!         .await?;
//!     println!("executed: {}", outcome.success);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any
//! way officially connected with Teleco Automation or its affiliates.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License,
//! Version 2.0. You may choose to use either license, depending on your
//! project needs.

// The `command` module holds the capability registry (what each device type
// can do, and the opcode for each action) and the codec that turns validated
// actions into the vendor's `commandsList` envelope.
//
// Example usage:
//
// ```
// use daisy_control_lib::command::{Action, CommandCodec};
//
// let codec = CommandCodec::builtin();
// let envelope = codec.encode_single(&device, &Action::Power(true))?;
// ```
pub mod command;

// The `control_interface` module is the dispatcher: it owns the vendor
// session, submits command envelopes, polls for execution acks, and exposes
// the account/installation query endpoints.
//
// Example usage:
//
// ```
// use daisy_control_lib::control_interface::ControlInterface;
//
// let client = ControlInterface::new("user@example.com", "password");
// let installations = client.installations().await?;
// ```
pub mod control_interface;

// Error taxonomy shared by every module.
pub mod error;

// The `util` module holds the discovery routine that flattens an account's
// installations and rooms into device records for registry extension.
//
// Example usage:
//
// ```
// use daisy_control_lib::util::discovery::Discovery;
//
// let records = Discovery::list_devices(&client).await?;
// for record in records {
//     println!("{} (type {})", record.device.label, record.device.id_devicetype);
// }
// ```
pub mod util;
