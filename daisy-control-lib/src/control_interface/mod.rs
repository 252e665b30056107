use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::command::codec::{CommandCodec, CommandEnvelope};
use crate::command::registry::{Action, DeviceRegistry};
use crate::error::{DaisyError, Result};

/// The vendor cloud the Daisy boxes phone home to.
pub const DEFAULT_BASE_URL: &str = "https://tmate.telecoautomation.com";

// Fixed HTTP basic auth the vendor app sends alongside every request,
// independent of the account session.
const VENDOR_BASIC_USER: &str = "teleco";
const VENDOR_BASIC_PASSWORD: &str = "tmate20";

const LOGIN_PATH: &str = "teleco/services/account-login";
const INSTALLATION_LIST_PATH: &str = "teleco/services/account-installation-list";
const ROOM_LIST_PATH: &str = "teleco/services/room-list";
const ROOM_CONFIGURATION_LIST_PATH: &str = "teleco/services/room-configuration-list";
const STATUS_DEVICE_LIST_PATH: &str = "teleco/services/status-device-list";
const NODE_STATUS_PATH: &str = "teleco/services/tmate20/nodestatus/";
const FEED_THE_COMMANDS_PATH: &str = "teleco/services/tmate20/feedthecommands/";
const GET_ACK_COMMAND_PATH: &str = "teleco/services/tmate20/getackcommand/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// The vendor never states how long a session lives. Half an hour is short
// enough that a stale cached session is usually re-opened here before the
// cloud starts answering 401.
const SESSION_TTL_MINUTES: i64 = 30;

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ACK_POLL_LIMIT: u32 = 20;

/// One Daisy box registered to the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyInstallation {
    pub activetimer: String,
    pub firmware_version: String,
    pub id_installation: i64,
    pub id_installation_device: i64,
    pub inst_code: String,
    pub inst_description: String,
    pub installation_order: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weekend: Option<String>,
    pub workdays: Option<String>,
}

impl fmt::Display for DaisyInstallation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DaisyInstallation {} fw{}",
            self.inst_code, self.firmware_version
        )
    }
}

/// One physical accessory, as the device-list endpoints report it.
///
/// `id_devicetype` determines the capability set; everything else is
/// identification and bookkeeping. The struct mirrors the vendor record
/// verbatim so discovery output can be pasted into an issue as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyDevice {
    pub activetimer: String,
    pub device_code: String,
    pub device_index: i64,
    pub device_order: i64,
    #[serde(default)]
    pub direct_only: Option<String>,
    pub favorite: String,
    pub feedback: String,
    pub id_devicemodel: i64,
    pub id_devicetype: u32,
    pub id_installation_device: i64,
    pub label: String,
    pub remote_control_code: String,
}

impl fmt::Display for DaisyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DaisyDevice \"{}\" (type: {})",
            self.label, self.id_devicetype
        )
    }
}

/// One entry of a device's status item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyStatus {
    pub id_installation_device_statusitem: i64,
    pub id_devicetype_statusitem_model: i64,
    pub statusitem_code: String,
    #[serde(rename = "statusItem")]
    pub status_item: String,
    pub status_value: String,
    #[serde(default)]
    pub lowlevel_statusitem: Option<String>,
}

/// A room and the devices the vendor could fully describe in it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyRoom {
    pub id_installation_room: i64,
    pub id_roomtype: i64,
    pub room_description: String,
    pub room_order: i64,
    pub device_list: Vec<DaisyDevice>,
    /// Count of device records that failed to parse and were skipped.
    pub skipped_devices: usize,
}

impl fmt::Display for DaisyRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DaisyRoom \"{}\"", self.room_description)
    }
}

/// One command a device advertises in `room-configuration-list`. This is the
/// raw material for extending the capability registry with a new type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyDeviceCommand {
    pub command_action: String,
    pub command_code: String,
    pub command_param: String,
    pub device_index: i64,
    pub id_devicetype_command_model: i64,
    pub id_installation_device_command: i64,
    #[serde(default)]
    pub lowlevel_command: Option<String>,
}

/// A device record plus its advertised command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyConfiguredDevice {
    #[serde(flatten)]
    pub device: DaisyDevice,
    pub device_command_list: Vec<DaisyDeviceCommand>,
}

/// A room as reported by `room-configuration-list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaisyRoomConfiguration {
    pub id_installation_room: i64,
    pub id_roomtype: i64,
    pub room_description: String,
    pub room_order: i64,
    pub device_list: Vec<DaisyConfiguredDevice>,
    pub skipped_devices: usize,
}

/// Light state decoded from a status item list. Informational only; dispatch
/// never keeps it in sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LightState {
    pub is_on: Option<bool>,
    pub brightness: Option<u8>,
    pub rgb: Option<(u8, u8, u8)>,
}

impl LightState {
    pub fn from_statuses(statuses: &[DaisyStatus]) -> Self {
        let mut state = LightState::default();
        for status in statuses {
            match status.statusitem_code.as_str() {
                "POWER" => state.is_on = Some(status.status_value == "ON"),
                "COLOR" => {
                    if let Some((brightness, rgb)) = parse_color_value(&status.status_value) {
                        state.brightness = Some(brightness);
                        state.rgb = Some(rgb);
                    }
                }
                _ => {}
            }
        }
        state
    }
}

/// Cover state decoded from a status item list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverState {
    pub is_closed: Option<bool>,
    pub position: Option<u8>,
}

impl CoverState {
    pub fn from_statuses(statuses: &[DaisyStatus]) -> Self {
        let mut state = CoverState::default();
        for status in statuses {
            match status.statusitem_code.as_str() {
                "OPEN_CLOSE" => {
                    state.is_closed = match status.status_value.as_str() {
                        "CLOSE" => Some(true),
                        "OPEN" => Some(false),
                        _ => None,
                    }
                }
                "LEVEL" => state.position = status.status_value.parse().ok(),
                _ => {}
            }
        }
        state
    }
}

/// Unpacks the vendor's packed color scalar, e.g. `A080R255G010B000`.
fn parse_color_value(value: &str) -> Option<(u8, (u8, u8, u8))> {
    let brightness: u8 = value.get(1..4)?.parse().ok()?;
    let r: u8 = value.get(5..8)?.parse().ok()?;
    let g: u8 = value.get(9..12)?.parse().ok()?;
    let b: u8 = value.get(13..16)?.parse().ok()?;
    Some((brightness, (r, g, b)))
}

/// A live vendor session. Never mutated in place; a refresh replaces the
/// whole value, and concurrent refreshes settle on last-writer-wins.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id_account: i64,
    pub id_session: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// The result of dispatching one envelope.
///
/// `success == false` covers every vendor-side rejection, from a refused
/// command to a device that never acknowledged. Those are expected runtime
/// conditions, not errors; only transport and auth faults become
/// [`DaisyError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    /// Vendor error code or message, when one could be extracted.
    pub message: Option<String>,
    /// The last response payload, retained for diagnostics.
    pub raw: Value,
}

impl CommandOutcome {
    fn accepted(raw: Value) -> Self {
        CommandOutcome {
            success: true,
            message: None,
            raw,
        }
    }

    fn rejected(message: impl Into<String>, raw: Value) -> Self {
        CommandOutcome {
            success: false,
            message: Some(message.into()),
            raw,
        }
    }
}

/**
The session-holding client for one Daisy account.

All vendor traffic goes through here: envelope submission, ack polling, the
device and room listings, and the login that feeds them. The session is
opened lazily by the first call that needs it and refreshed once, silently,
when the cloud answers 401; a second 401 after the refresh surfaces as
[`DaisyError::AuthFailure`].

Cloning is cheap and clones share the cached session, so two tasks holding
clones never hold two diverging sessions for the same account.
*/
#[derive(Debug, Clone)]
pub struct ControlInterface {
    base_url: String,
    client: Client,
    email: String,
    password: String,
    registry: DeviceRegistry,
    ack_poll_limit: u32,
    session: Arc<RwLock<Option<Credential>>>,
}

impl ControlInterface {
    pub fn new(email: &str, password: &str) -> Self {
        ControlInterface::with_base_url(email, password, DEFAULT_BASE_URL)
    }

    /// Points the client at a different endpoint, e.g. a local mock server.
    pub fn with_base_url(email: &str, password: &str, base_url: &str) -> Self {
        ControlInterface {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            email: email.to_string(),
            password: password.to_string(),
            registry: DeviceRegistry::builtin().clone(),
            ack_poll_limit: ACK_POLL_LIMIT,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the capability registry, for accounts with accessory types
    /// the built-in table does not cover.
    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Caps how many times an ack is polled before the command is reported
    /// as unacknowledged. The default of 20 covers the slowest boxes seen so
    /// far; lower it for callers that would rather give up early.
    pub fn with_ack_poll_limit(mut self, limit: u32) -> Self {
        self.ack_poll_limit = limit;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn post(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint(path))
            .basic_auth(VENDOR_BASIC_USER, Some(VENDOR_BASIC_PASSWORD))
            .timeout(REQUEST_TIMEOUT)
            .json(body)
    }

    /**
    Opens a session with the configured account credentials and caches it.

    Callers normally never need this: every API call opens a session on
    demand. It exists so a CLI can fail fast on bad credentials.
    */
    pub async fn login(&self) -> Result<Credential> {
        let body = json!({ "email": self.email, "pwd": self.password });
        let response = self.post(LOGIN_PATH, &body).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DaisyError::AuthFailure(format!(
                "login rejected with HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(DaisyError::TransportError(format!(
                "login failed with HTTP {status}"
            )));
        }
        let raw: Value = response.json().await?;
        if raw["codEsito"] != "S" {
            return Err(DaisyError::AuthFailure(format!(
                "vendor refused the credentials: {raw}"
            )));
        }
        let id_account = raw["valRisultato"]["idAccount"].as_i64().ok_or_else(|| {
            DaisyError::TransportError(format!("login response missing idAccount: {raw}"))
        })?;
        let id_session = raw["valRisultato"]["idSession"]
            .as_str()
            .ok_or_else(|| {
                DaisyError::TransportError(format!("login response missing idSession: {raw}"))
            })?
            .to_string();

        let issued_at = Utc::now();
        let credential = Credential {
            id_account,
            id_session,
            issued_at,
            expires_at: issued_at + chrono::Duration::minutes(SESSION_TTL_MINUTES),
        };
        debug!("opened session for account {id_account}");
        *self.session.write().await = Some(credential.clone());
        Ok(credential)
    }

    async fn ensure_session(&self) -> Result<Credential> {
        if let Some(credential) = self.session.read().await.as_ref() {
            if !credential.is_expired() {
                return Ok(credential.clone());
            }
            debug!("cached session expired, logging in again");
        }
        self.login().await
    }

    async fn refresh_session(&self) -> Result<Credential> {
        *self.session.write().await = None;
        self.login().await
    }

    /// Posts to a `codEsito`-enveloped service endpoint, injecting the
    /// session fields and refreshing the session once on 401.
    async fn post_service(&self, path: &str, extra: Value) -> Result<Value> {
        let mut refreshed = false;
        loop {
            let credential = self.ensure_session().await?;
            let mut body = json!({
                "idSession": credential.id_session,
                "idAccount": credential.id_account,
            });
            merge_fields(&mut body, &extra);
            let response = self.post(path, &body).send().await?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(DaisyError::AuthFailure(
                        "session rejected again after refresh".to_string(),
                    ));
                }
                refreshed = true;
                debug!("{path} answered 401, refreshing session");
                self.refresh_session().await?;
                continue;
            }
            if !status.is_success() {
                return Err(DaisyError::TransportError(format!(
                    "{path} failed with HTTP {status}"
                )));
            }
            let mut raw: Value = response.json().await?;
            if raw["codEsito"] != "S" {
                return Err(DaisyError::Vendor {
                    endpoint: path.to_string(),
                    raw,
                });
            }
            return Ok(raw["valRisultato"].take());
        }
    }

    /// Posts to a `tmate20` endpoint (no `codEsito` envelope), with the same
    /// session injection and single 401 refresh.
    async fn post_tmate20(&self, path: &str, extra: Value) -> Result<Value> {
        let mut refreshed = false;
        loop {
            let credential = self.ensure_session().await?;
            let mut body = json!({ "idSession": credential.id_session });
            merge_fields(&mut body, &extra);
            let response = self.post(path, &body).send().await?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(DaisyError::AuthFailure(
                        "session rejected again after refresh".to_string(),
                    ));
                }
                refreshed = true;
                debug!("{path} answered 401, refreshing session");
                self.refresh_session().await?;
                continue;
            }
            if !status.is_success() {
                return Err(DaisyError::TransportError(format!(
                    "{path} failed with HTTP {status}"
                )));
            }
            return Ok(response.json().await?);
        }
    }

    /// Lists the Daisy boxes registered to the account.
    pub async fn installations(&self) -> Result<Vec<DaisyInstallation>> {
        let mut result = self.post_service(INSTALLATION_LIST_PATH, json!({})).await?;
        Ok(serde_json::from_value(result["installationList"].take())?)
    }

    /// Whether the installation's box is currently reachable by the cloud.
    pub async fn node_active(&self, installation: &DaisyInstallation) -> Result<bool> {
        let raw = self
            .post_tmate20(
                NODE_STATUS_PATH,
                json!({ "idInstallation": installation.inst_code }),
            )
            .await?;
        raw["nodeActive"].as_bool().ok_or_else(|| {
            DaisyError::TransportError(format!("nodestatus response missing nodeActive: {raw}"))
        })
    }

    /// Lists the installation's rooms and their devices. Malformed device
    /// records are skipped with a diagnostic, never fatal to the listing.
    pub async fn rooms(&self, installation: &DaisyInstallation) -> Result<Vec<DaisyRoom>> {
        let mut result = self
            .post_service(
                ROOM_LIST_PATH,
                json!({ "idInstallation": installation.id_installation }),
            )
            .await?;
        let raw_rooms: Vec<RawRoom> = serde_json::from_value(result["roomList"].take())?;

        let mut rooms = Vec::with_capacity(raw_rooms.len());
        for raw_room in raw_rooms {
            let mut devices = Vec::with_capacity(raw_room.device_list.len());
            let mut skipped = 0;
            for record in raw_room.device_list {
                match serde_json::from_value::<DaisyDevice>(record.clone()) {
                    Ok(device) => devices.push(device),
                    Err(err) => {
                        skipped += 1;
                        warn!(
                            "skipping malformed device record in room \"{}\": {err} ({record})",
                            raw_room.room_description
                        );
                    }
                }
            }
            rooms.push(DaisyRoom {
                id_installation_room: raw_room.id_installation_room,
                id_roomtype: raw_room.id_roomtype,
                room_description: raw_room.room_description,
                room_order: raw_room.room_order,
                device_list: devices,
                skipped_devices: skipped,
            });
        }
        Ok(rooms)
    }

    /// Lists rooms with each device's advertised command table.
    pub async fn room_configurations(
        &self,
        installation: &DaisyInstallation,
    ) -> Result<Vec<DaisyRoomConfiguration>> {
        let mut result = self
            .post_service(
                ROOM_CONFIGURATION_LIST_PATH,
                json!({ "idInstallation": installation.id_installation }),
            )
            .await?;
        let raw_rooms: Vec<RawRoom> = serde_json::from_value(result["roomList"].take())?;

        let mut rooms = Vec::with_capacity(raw_rooms.len());
        for raw_room in raw_rooms {
            let mut devices = Vec::with_capacity(raw_room.device_list.len());
            let mut skipped = 0;
            for record in raw_room.device_list {
                match serde_json::from_value::<DaisyConfiguredDevice>(record.clone()) {
                    Ok(device) => devices.push(device),
                    Err(err) => {
                        skipped += 1;
                        warn!(
                            "skipping malformed configured device in room \"{}\": {err} ({record})",
                            raw_room.room_description
                        );
                    }
                }
            }
            rooms.push(DaisyRoomConfiguration {
                id_installation_room: raw_room.id_installation_room,
                id_roomtype: raw_room.id_roomtype,
                room_description: raw_room.room_description,
                room_order: raw_room.room_order,
                device_list: devices,
                skipped_devices: skipped,
            });
        }
        Ok(rooms)
    }

    /// Fetches the raw status item list for one device.
    pub async fn device_status(
        &self,
        installation: &DaisyInstallation,
        device: &DaisyDevice,
    ) -> Result<Vec<DaisyStatus>> {
        let mut result = self
            .post_service(
                STATUS_DEVICE_LIST_PATH,
                json!({
                    "idInstallation": installation.id_installation,
                    "idInstallationDevice": device.id_installation_device,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result["statusitemList"].take())?)
    }

    /// Encodes one action against this client's registry and submits it.
    pub async fn dispatch(
        &self,
        installation: &DaisyInstallation,
        device: &DaisyDevice,
        action: &Action,
    ) -> Result<CommandOutcome> {
        let envelope = CommandCodec::new(&self.registry).encode_single(device, action)?;
        self.send(installation, &envelope).await
    }

    /// Encodes a batch of actions and submits them as one envelope.
    pub async fn dispatch_batch(
        &self,
        installation: &DaisyInstallation,
        device: &DaisyDevice,
        actions: &[Action],
    ) -> Result<CommandOutcome> {
        let envelope = CommandCodec::new(&self.registry).encode_batch(device, actions)?;
        self.send(installation, &envelope).await
    }

    /// Submits an envelope and waits for the box to acknowledge execution.
    pub async fn send(
        &self,
        installation: &DaisyInstallation,
        envelope: &CommandEnvelope,
    ) -> Result<CommandOutcome> {
        self.send_inner(installation, envelope, true).await
    }

    /// Submits an envelope without polling for the execution ack. The
    /// outcome only says the cloud accepted the submission.
    pub async fn send_no_ack(
        &self,
        installation: &DaisyInstallation,
        envelope: &CommandEnvelope,
    ) -> Result<CommandOutcome> {
        self.send_inner(installation, envelope, false).await
    }

    async fn send_inner(
        &self,
        installation: &DaisyInstallation,
        envelope: &CommandEnvelope,
        wait_for_ack: bool,
    ) -> Result<CommandOutcome> {
        let mut refreshed = false;
        loop {
            let credential = self.ensure_session().await?;
            let body = json!({
                "commandsList": envelope.commands_list,
                "idInstallation": installation.inst_code,
                "idSession": credential.id_session,
                "idScenario": 0,
                "isScenario": false,
            });
            debug!(
                "submitting {} command(s) to installation {}",
                envelope.len(),
                installation.inst_code
            );
            let response = self.post(FEED_THE_COMMANDS_PATH, &body).send().await?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(DaisyError::AuthFailure(
                        "session rejected again after refresh".to_string(),
                    ));
                }
                refreshed = true;
                debug!("command submission answered 401, refreshing session");
                self.refresh_session().await?;
                continue;
            }
            let text = response.text().await?;
            if !status.is_success() {
                let raw =
                    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
                return Ok(CommandOutcome::rejected(format!("HTTP {status}"), raw));
            }
            let raw: Value = serde_json::from_str(&text)?;
            if raw["MessageID"] != "WS-000" {
                let message = vendor_message(&raw);
                return Ok(CommandOutcome::rejected(message, raw));
            }
            if !wait_for_ack {
                return Ok(CommandOutcome::accepted(raw));
            }
            let action_reference = raw["ActionReference"]
                .as_str()
                .ok_or_else(|| {
                    DaisyError::TransportError(format!(
                        "feedthecommands response missing ActionReference: {raw}"
                    ))
                })?
                .to_string();
            return self.wait_for_ack(installation, &action_reference).await;
        }
    }

    /// Polls `getackcommand` until the box reports the command executed.
    /// "RCV" means still queued, "PROC" means processed.
    async fn wait_for_ack(
        &self,
        installation: &DaisyInstallation,
        action_reference: &str,
    ) -> Result<CommandOutcome> {
        let mut last_raw = Value::Null;
        for _ in 0..self.ack_poll_limit {
            let raw = self
                .post_tmate20(
                    GET_ACK_COMMAND_PATH,
                    json!({
                        "id": action_reference,
                        "idInstallation": installation.inst_code,
                    }),
                )
                .await?;
            if raw["MessageID"] != "WS-300" {
                return Err(DaisyError::Vendor {
                    endpoint: GET_ACK_COMMAND_PATH.to_string(),
                    raw,
                });
            }
            match raw["MessageText"].as_str() {
                Some("RCV") => {
                    last_raw = raw;
                    sleep(ACK_POLL_INTERVAL).await;
                }
                Some("PROC") => return Ok(CommandOutcome::accepted(raw)),
                _ => {
                    let message = vendor_message(&raw);
                    return Ok(CommandOutcome::rejected(message, raw));
                }
            }
        }
        // Keep the last poll response so callers can see what the box was
        // still reporting when we gave up.
        Ok(CommandOutcome::rejected(
            format!("command {action_reference} was never acknowledged"),
            last_raw,
        ))
    }
}

/// Room shape shared by `room-list` and `room-configuration-list`, with the
/// devices left unparsed so one bad record cannot sink the whole listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoom {
    id_installation_room: i64,
    id_roomtype: i64,
    room_description: String,
    room_order: i64,
    #[serde(default)]
    device_list: Vec<Value>,
}

fn merge_fields(base: &mut Value, extra: &Value) {
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
}

fn vendor_message(raw: &Value) -> String {
    match (raw["MessageID"].as_str(), raw["MessageText"].as_str()) {
        (Some(id), Some(text)) => format!("{id}: {text}"),
        (Some(id), None) => id.to_string(),
        _ => "unrecognized vendor response".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::registry::DEVICE_TYPE_RGB_LIGHT;
    use mockito::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LOGIN_BODY: &str =
        r#"{"codEsito":"S","valRisultato":{"idAccount":77,"idSession":"sess-1"}}"#;

    fn installation() -> DaisyInstallation {
        DaisyInstallation {
            activetimer: "N".to_string(),
            firmware_version: "3.1".to_string(),
            id_installation: 900,
            id_installation_device: 1,
            inst_code: "INST-01".to_string(),
            inst_description: "Garden pergola".to_string(),
            installation_order: 0,
            latitude: None,
            longitude: None,
            weekend: None,
            workdays: None,
        }
    }

    fn rgb_light() -> DaisyDevice {
        DaisyDevice {
            activetimer: "N".to_string(),
            device_code: "000".to_string(),
            device_index: 2,
            device_order: 0,
            direct_only: None,
            favorite: "N".to_string(),
            feedback: "Y".to_string(),
            id_devicemodel: 1,
            id_devicetype: DEVICE_TYPE_RGB_LIGHT,
            id_installation_device: 5512,
            label: "pergola rgb".to_string(),
            remote_control_code: "123456".to_string(),
        }
    }

    fn power_on_envelope() -> CommandEnvelope {
        CommandCodec::builtin()
            .encode_single(&rgb_light(), &Action::Power(true))
            .unwrap()
    }

    async fn mock_login(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/teleco/services/account-login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(LOGIN_BODY)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_refused_credentials_surface_as_auth_failure() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/teleco/services/account-login")
            .with_status(200)
            .with_body(r#"{"codEsito":"E","descEsito":"wrong password"}"#)
            .create_async()
            .await;
        let client = ControlInterface::with_base_url("u@example.com", "nope", &server.url());
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, DaisyError::AuthFailure(_)));
    }

    #[tokio::test]
    async fn test_send_logs_in_lazily_and_polls_the_ack() {
        let mut server = Server::new_async().await;
        let login = mock_login(&mut server).await;
        let feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-000","ActionReference":"ref-9"}"#)
            .create_async()
            .await;
        let ack = server
            .mock("POST", "/teleco/services/tmate20/getackcommand/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-300","MessageText":"PROC"}"#)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let outcome = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap();
        assert!(outcome.success);
        login.assert_async().await;
        feed.assert_async().await;
        ack.assert_async().await;
    }

    #[tokio::test]
    async fn test_ack_still_queued_is_polled_again() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-000","ActionReference":"ref-9"}"#)
            .create_async()
            .await;
        // First ack poll reports the command still queued, the second one
        // reports it processed.
        let polls = Arc::new(AtomicUsize::new(0));
        let polls_seen = Arc::clone(&polls);
        let ack = server
            .mock("POST", "/teleco/services/tmate20/getackcommand/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                let body = if polls_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    r#"{"MessageID":"WS-300","MessageText":"RCV"}"#
                } else {
                    r#"{"MessageID":"WS-300","MessageText":"PROC"}"#
                };
                body.as_bytes().to_vec()
            })
            .expect(2)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let outcome = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.raw["MessageText"], "PROC");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        ack.assert_async().await;
    }

    #[tokio::test]
    async fn test_ack_never_arriving_gives_up_with_the_last_response() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-000","ActionReference":"ref-9"}"#)
            .create_async()
            .await;
        let ack = server
            .mock("POST", "/teleco/services/tmate20/getackcommand/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-300","MessageText":"RCV"}"#)
            .expect(2)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url())
            .with_ack_poll_limit(2);
        let outcome = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.message.as_deref(),
            Some("command ref-9 was never acknowledged")
        );
        // The final poll response is kept so callers can see what the box
        // was still reporting.
        assert_eq!(outcome.raw["MessageText"], "RCV");
        ack.assert_async().await;
    }

    #[tokio::test]
    async fn test_vendor_rejection_is_an_outcome_not_an_error() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(200)
            .with_body(r#"{"MessageID":"WS-011","MessageText":"node offline"}"#)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let outcome = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("WS-011: node offline"));
        assert_eq!(outcome.raw["MessageID"], "WS-011");
    }

    #[tokio::test]
    async fn test_http_error_on_send_maps_to_failed_outcome() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let outcome = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.message.as_deref(),
            Some("HTTP 500 Internal Server Error")
        );
    }

    #[tokio::test]
    async fn test_401_triggers_one_refresh_then_auth_failure() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/teleco/services/account-login")
            .with_status(200)
            .with_body(LOGIN_BODY)
            .expect(2)
            .create_async()
            .await;
        let feed = server
            .mock("POST", "/teleco/services/tmate20/feedthecommands/")
            .with_status(401)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let err = client
            .send(&installation(), &power_on_envelope())
            .await
            .unwrap_err();
        assert!(matches!(err, DaisyError::AuthFailure(_)));
        login.assert_async().await;
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_installations_unwraps_the_esito_envelope() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _list = server
            .mock("POST", "/teleco/services/account-installation-list")
            .with_status(200)
            .with_body(
                r#"{"codEsito":"S","valRisultato":{"installationList":[{
                    "activetimer":"N","firmwareVersion":"3.1","idInstallation":900,
                    "idInstallationDevice":1,"instCode":"INST-01",
                    "instDescription":"Garden pergola","installationOrder":0,
                    "latitude":null,"longitude":null,"weekend":null,"workdays":null
                }]}}"#,
            )
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let installations = client.installations().await.unwrap();
        assert_eq!(installations.len(), 1);
        assert_eq!(installations[0].inst_code, "INST-01");
    }

    #[tokio::test]
    async fn test_rooms_skips_malformed_device_records() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _rooms = server
            .mock("POST", "/teleco/services/room-list")
            .with_status(200)
            .with_body(
                r#"{"codEsito":"S","valRisultato":{"roomList":[{
                    "idInstallationRoom":4,"idRoomtype":1,
                    "roomDescription":"Terrace","roomOrder":0,
                    "deviceList":[
                        {"label":"mystery accessory"},
                        {"activetimer":"N","deviceCode":"000","deviceIndex":2,
                         "deviceOrder":0,"favorite":"N","feedback":"Y",
                         "idDevicemodel":1,"idDevicetype":23,
                         "idInstallationDevice":5512,"label":"pergola rgb",
                         "remoteControlCode":"123456"}
                    ]
                }]}}"#,
            )
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        let rooms = client.rooms(&installation()).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].device_list.len(), 1);
        assert_eq!(rooms[0].device_list[0].label, "pergola rgb");
        assert_eq!(rooms[0].skipped_devices, 1);
    }

    #[tokio::test]
    async fn test_node_active_reads_the_flag() {
        let mut server = Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _status = server
            .mock("POST", "/teleco/services/tmate20/nodestatus/")
            .with_status(200)
            .with_body(r#"{"nodeActive":true}"#)
            .create_async()
            .await;

        let client = ControlInterface::with_base_url("u@example.com", "pw", &server.url());
        assert!(client.node_active(&installation()).await.unwrap());
    }

    #[test]
    fn test_light_state_decodes_power_and_color() {
        let statuses = vec![
            DaisyStatus {
                id_installation_device_statusitem: 1,
                id_devicetype_statusitem_model: 1,
                statusitem_code: "POWER".to_string(),
                status_item: "Power".to_string(),
                status_value: "ON".to_string(),
                lowlevel_statusitem: None,
            },
            DaisyStatus {
                id_installation_device_statusitem: 2,
                id_devicetype_statusitem_model: 1,
                statusitem_code: "COLOR".to_string(),
                status_item: "Color".to_string(),
                status_value: "A080R255G010B000".to_string(),
                lowlevel_statusitem: None,
            },
        ];
        let state = LightState::from_statuses(&statuses);
        assert_eq!(state.is_on, Some(true));
        assert_eq!(state.brightness, Some(80));
        assert_eq!(state.rgb, Some((255, 10, 0)));
    }

    #[test]
    fn test_cover_state_decodes_open_close_and_level() {
        let statuses = vec![
            DaisyStatus {
                id_installation_device_statusitem: 1,
                id_devicetype_statusitem_model: 1,
                statusitem_code: "OPEN_CLOSE".to_string(),
                status_item: "OpenClose".to_string(),
                status_value: "CLOSE".to_string(),
                lowlevel_statusitem: None,
            },
            DaisyStatus {
                id_installation_device_statusitem: 2,
                id_devicetype_statusitem_model: 1,
                statusitem_code: "LEVEL".to_string(),
                status_item: "Level".to_string(),
                status_value: "66".to_string(),
                lowlevel_statusitem: None,
            },
        ];
        let state = CoverState::from_statuses(&statuses);
        assert_eq!(state.is_closed, Some(true));
        assert_eq!(state.position, Some(66));
    }

    #[test]
    fn test_malformed_color_value_is_ignored() {
        assert_eq!(parse_color_value("A080R255"), None);
        assert_eq!(parse_color_value(""), None);
        assert_eq!(parse_color_value("AxxxR255G010B000"), None);
    }
}
