use log::warn;
use serde::Serialize;

use crate::control_interface::{
    ControlInterface, DaisyDevice, DaisyInstallation, DaisyRoomConfiguration,
};
use crate::error::Result;

/// One discovered accessory, flattened out of its installation and room.
///
/// Carries everything a human needs to extend the capability registry for an
/// accessory type the crate does not know yet, `id_devicetype` above all.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub installation_code: String,
    pub id_installation: i64,
    pub room: String,
    pub device: DaisyDevice,
    /// Whether the built-in (or configured) registry has a descriptor for
    /// this device's type.
    pub supported: bool,
}

/// Everything discovery found for one installation, for report output.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationReport {
    pub installation: DaisyInstallation,
    /// None when the node status endpoint could not be queried.
    pub node_active: Option<bool>,
    pub rooms: Vec<DaisyRoomConfiguration>,
    /// Total device records skipped as malformed across all rooms.
    pub skipped_devices: usize,
}

pub struct Discovery;

impl Discovery {
    /**
    Enumerates every device registered to the account.

    Each call re-queries the cloud; nothing is cached, so the listing is
    restartable and always reflects the account as the vendor sees it now.
    Malformed device records have already been skipped (with a diagnostic)
    by the room parsing underneath.
    */
    pub async fn list_devices(client: &ControlInterface) -> Result<Vec<DeviceRecord>> {
        let mut records = Vec::new();
        for installation in client.installations().await? {
            for room in client.rooms(&installation).await? {
                for device in room.device_list {
                    let supported = client.registry().lookup(device.id_devicetype).is_some();
                    if !supported {
                        warn!(
                            "device \"{}\" has unmapped type {}; its record is worth reporting",
                            device.label, device.id_devicetype
                        );
                    }
                    records.push(DeviceRecord {
                        installation_code: installation.inst_code.clone(),
                        id_installation: installation.id_installation,
                        room: room.room_description.clone(),
                        device,
                        supported,
                    });
                }
            }
        }
        Ok(records)
    }

    /// Builds the full per-installation report the discovery CLI prints:
    /// node status, rooms, and each device's advertised command table.
    pub async fn account_report(client: &ControlInterface) -> Result<Vec<InstallationReport>> {
        let mut reports = Vec::new();
        for installation in client.installations().await? {
            let node_active = match client.node_active(&installation).await {
                Ok(active) => Some(active),
                Err(err) => {
                    warn!("could not query node status of {installation}: {err}");
                    None
                }
            };
            let rooms = client.room_configurations(&installation).await?;
            let skipped_devices = rooms.iter().map(|room| room.skipped_devices).sum();
            reports.push(InstallationReport {
                installation,
                node_active,
                rooms,
                skipped_devices,
            });
        }
        Ok(reports)
    }
}
