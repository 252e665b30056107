use serde::{Deserialize, Serialize};

use crate::command::registry::{Action, DeviceRegistry, ResolvedCommand};
use crate::control_interface::DaisyDevice;
use crate::error::{DaisyError, Result};

/// One entry of the vendor `commandsList`, targeting a single device.
///
/// `deviceCode` carries the device's index, not its `deviceCode` field; that
/// is what the vendor app sends and the only form the box accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEntry {
    pub device_code: String,
    pub id_installation_device: i64,
    pub command_action: String,
    pub command_id: u32,
    pub command_index: u32,
    pub command_param: String,
    pub lowlevel_command: Option<String>,
}

/**
The wire-level unit submitted to `feedthecommands`.

`commandIndex` values are always contiguous from zero in submission order;
the constructor functions on [`CommandCodec`] are the only way to build an
envelope, which keeps that invariant out of callers' hands.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "commandsList")]
    pub commands_list: Vec<CommandEntry>,
}

impl CommandEnvelope {
    pub fn len(&self) -> usize {
        self.commands_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands_list.is_empty()
    }
}

/// Builds command envelopes for a target device, validating every action
/// against a [`DeviceRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct CommandCodec<'a> {
    registry: &'a DeviceRegistry,
}

impl CommandCodec<'static> {
    /// A codec over the built-in capability table.
    pub fn builtin() -> Self {
        CommandCodec {
            registry: DeviceRegistry::builtin(),
        }
    }
}

impl<'a> CommandCodec<'a> {
    pub fn new(registry: &'a DeviceRegistry) -> Self {
        CommandCodec { registry }
    }

    /// Encodes one action into a one-entry envelope with `commandIndex = 0`.
    pub fn encode_single(&self, device: &DaisyDevice, action: &Action) -> Result<CommandEnvelope> {
        self.encode_batch(device, std::slice::from_ref(action))
    }

    /// Encodes a batch of actions, assigning `commandIndex` in the order
    /// given. All-or-nothing: if any action fails validation, no envelope is
    /// produced. An empty batch is rejected, since an envelope must hold at
    /// least one entry.
    pub fn encode_batch(&self, device: &DaisyDevice, actions: &[Action]) -> Result<CommandEnvelope> {
        if actions.is_empty() {
            return Err(DaisyError::EmptyBatch);
        }
        let commands_list = actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                let resolved = self.registry.encode(device.id_devicetype, action)?;
                Ok(entry_for(device, index as u32, resolved))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CommandEnvelope { commands_list })
    }
}

fn entry_for(device: &DaisyDevice, command_index: u32, resolved: ResolvedCommand) -> CommandEntry {
    CommandEntry {
        device_code: device.device_index.to_string(),
        id_installation_device: device.id_installation_device,
        command_action: resolved.command_action.to_string(),
        command_id: resolved.command_id,
        command_index,
        command_param: resolved.command_param,
        lowlevel_command: resolved.lowlevel_command.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::registry::{Motion, DEVICE_TYPE_RGB_LIGHT, DEVICE_TYPE_SLATS_COVER};
    use crate::error::DaisyError;

    fn device(id_devicetype: u32) -> DaisyDevice {
        DaisyDevice {
            activetimer: "N".to_string(),
            device_code: "000".to_string(),
            device_index: 2,
            device_order: 0,
            direct_only: None,
            favorite: "N".to_string(),
            feedback: "Y".to_string(),
            id_devicemodel: 1,
            id_devicetype,
            id_installation_device: 5512,
            label: "test device".to_string(),
            remote_control_code: "123456".to_string(),
        }
    }

    #[test]
    fn test_encode_single_has_index_zero() {
        let codec = CommandCodec::builtin();
        let envelope = codec
            .encode_single(&device(DEVICE_TYPE_RGB_LIGHT), &Action::Power(true))
            .unwrap();
        assert_eq!(envelope.len(), 1);
        let entry = &envelope.commands_list[0];
        assert_eq!(entry.command_index, 0);
        assert_eq!(entry.command_action, "POWER");
        assert_eq!(entry.command_id, 138);
        assert_eq!(entry.command_param, "ON");
        assert_eq!(entry.device_code, "2");
        assert_eq!(entry.id_installation_device, 5512);
    }

    #[test]
    fn test_envelope_serializes_with_vendor_field_names() {
        let codec = CommandCodec::builtin();
        let envelope = codec
            .encode_single(&device(DEVICE_TYPE_RGB_LIGHT), &Action::Power(true))
            .unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json["commandsList"][0],
            serde_json::json!({
                "deviceCode": "2",
                "idInstallationDevice": 5512,
                "commandAction": "POWER",
                "commandId": 138,
                "commandIndex": 0,
                "commandParam": "ON",
                "lowlevelCommand": null,
            })
        );
    }

    #[test]
    fn test_batch_indices_are_contiguous_from_zero() {
        let codec = CommandCodec::builtin();
        let actions = [
            Action::OpenStopClose(Motion::Open),
            Action::Level(33),
            Action::OpenStopClose(Motion::Stop),
        ];
        let envelope = codec
            .encode_batch(&device(DEVICE_TYPE_SLATS_COVER), &actions)
            .unwrap();
        let indices: Vec<u32> = envelope
            .commands_list
            .iter()
            .map(|entry| entry.command_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(envelope.commands_list[1].command_param, "LEV2");
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let codec = CommandCodec::builtin();
        let actions = [
            Action::OpenStopClose(Motion::Open),
            // Not a declared level stop, so the whole batch must fail.
            Action::Level(42),
        ];
        let err = codec
            .encode_batch(&device(DEVICE_TYPE_SLATS_COVER), &actions)
            .unwrap_err();
        assert!(matches!(err, DaisyError::OutOfRange { .. }));
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let codec = CommandCodec::builtin();
        let err = codec
            .encode_batch(&device(DEVICE_TYPE_RGB_LIGHT), &[])
            .unwrap_err();
        assert!(matches!(err, DaisyError::EmptyBatch));
    }

    #[test]
    fn test_unknown_device_type_fails_closed() {
        let codec = CommandCodec::builtin();
        let err = codec
            .encode_single(&device(99), &Action::Power(true))
            .unwrap_err();
        assert!(matches!(err, DaisyError::UnsupportedDevice(99)));
    }
}
