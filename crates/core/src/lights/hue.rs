use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LightController, LightHandle};
use crate::{DiscoLightsError, Result, Session};

/// Highest brightness value the bridge accepts.
const MAX_BRIDGE_BRIGHTNESS: u8 = 254;
/// Error type the bridge uses for "link button not pressed".
const LINK_BUTTON_ERROR: i32 = 101;

#[derive(Serialize)]
struct RegisterBody<'a> {
    devicetype: &'a str,
}

#[derive(Deserialize)]
struct RegisterSuccess {
    username: String,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorBody {
    #[serde(rename = "type")]
    error_type: i32,
    description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegisterResponseItem {
    Success { success: RegisterSuccess },
    Error { error: BridgeErrorBody },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateResponseItem {
    Success {
        #[allow(dead_code)]
        success: serde_json::Value,
    },
    Error {
        error: BridgeErrorBody,
    },
}

/// Light description as returned by `GET /api/<user>/lights`.
#[derive(Debug, Clone, Deserialize)]
pub struct LightInfo {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LightsResponse {
    Lights(BTreeMap<String, LightInfo>),
    Errors(Vec<StateResponseItem>),
}

/// Partial light state; only the populated fields are sent.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
}

impl StateUpdate {
    pub fn power(on: bool) -> Self {
        Self {
            on: Some(on),
            ..Self::default()
        }
    }

    pub fn brightness(level: u8) -> Self {
        Self {
            bri: Some(level.min(MAX_BRIDGE_BRIGHTNESS)),
            ..Self::default()
        }
    }

    pub fn color(hue: u16, saturation: u8) -> Self {
        Self {
            hue: Some(hue),
            sat: Some(saturation.min(MAX_BRIDGE_BRIGHTNESS)),
            ..Self::default()
        }
    }
}

/// Blocking client for the bridge's local REST API.
///
/// No request timeout is configured: a slow light stalls the caller, which
/// the pipeline accepts rather than masks.
#[derive(Debug, Clone)]
pub struct HueClient {
    http: reqwest::blocking::Client,
}

impl HueClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { http })
    }

    /// Asks the bridge for a new username. Fails with
    /// [`DiscoLightsError::ButtonNotPressed`] unless the link button was
    /// pressed shortly before.
    pub fn register(&self, address: &str, device_type: &str) -> Result<String> {
        let url = format!("http://{address}/api");
        let items: Vec<RegisterResponseItem> = self
            .http
            .post(&url)
            .json(&RegisterBody {
                devicetype: device_type,
            })
            .send()?
            .json()?;

        parse_register(address, items)
    }

    /// Lists the lights known to the bridge, ordered by numeric id.
    pub fn lights(&self, session: &Session) -> Result<Vec<(String, LightInfo)>> {
        let url = format!(
            "http://{}/api/{}/lights",
            session.bridge_address, session.username
        );
        let response: LightsResponse = self.http.get(&url).send()?.json()?;
        parse_lights(&session.bridge_address, response)
    }

    pub fn set_state(&self, session: &Session, light_id: &str, update: &StateUpdate) -> Result<()> {
        let url = format!(
            "http://{}/api/{}/lights/{}/state",
            session.bridge_address, session.username, light_id
        );
        debug!(light = light_id, ?update, "sending light state");
        let items: Vec<StateResponseItem> = self.http.put(&url).json(update).send()?.json()?;
        check_state_response(&session.bridge_address, items)
    }
}

fn parse_register(address: &str, items: Vec<RegisterResponseItem>) -> Result<String> {
    match items.into_iter().next() {
        Some(RegisterResponseItem::Success { success }) => Ok(success.username),
        Some(RegisterResponseItem::Error { error }) if error.error_type == LINK_BUTTON_ERROR => {
            Err(DiscoLightsError::ButtonNotPressed(address.to_string()))
        }
        Some(RegisterResponseItem::Error { error }) => Err(bridge_error(address, error)),
        None => Err(DiscoLightsError::Bridge {
            address: address.to_string(),
            description: "empty response".to_string(),
        }),
    }
}

fn parse_lights(address: &str, response: LightsResponse) -> Result<Vec<(String, LightInfo)>> {
    match response {
        LightsResponse::Lights(lights) => {
            let mut lights: Vec<(String, LightInfo)> = lights.into_iter().collect();
            lights.sort_by_key(|(id, _)| (id.parse::<u32>().unwrap_or(u32::MAX), id.clone()));
            Ok(lights)
        }
        LightsResponse::Errors(items) => {
            check_state_response(address, items)?;
            Err(DiscoLightsError::Bridge {
                address: address.to_string(),
                description: "unexpected light listing".to_string(),
            })
        }
    }
}

fn check_state_response(address: &str, items: Vec<StateResponseItem>) -> Result<()> {
    for item in items {
        if let StateResponseItem::Error { error } = item {
            return Err(bridge_error(address, error));
        }
    }
    Ok(())
}

fn bridge_error(address: &str, error: BridgeErrorBody) -> DiscoLightsError {
    DiscoLightsError::Bridge {
        address: address.to_string(),
        description: format!("{} (type {})", error.description, error.error_type),
    }
}

/// A light behind the bridge.
#[derive(Debug, Clone)]
pub struct HueLight {
    id: String,
    name: String,
    kind: String,
    session: Session,
    client: Arc<HueClient>,
}

impl HueLight {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Product category reported by the bridge, e.g. "Extended color light".
    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn send(&self, update: StateUpdate) -> Result<()> {
        self.client.set_state(&self.session, &self.id, &update)
    }
}

impl LightHandle for HueLight {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_on(&self) -> Result<()> {
        self.send(StateUpdate::power(true))
    }

    fn set_off(&self) -> Result<()> {
        self.send(StateUpdate::power(false))
    }

    fn set_brightness(&self, level: u8) -> Result<()> {
        self.send(StateUpdate::brightness(level))
    }

    fn set_color(&self, hue: u16, saturation: u8) -> Result<()> {
        self.send(StateUpdate::color(hue, saturation))
    }
}

/// Enumerates bridge lights as [`HueLight`] handles.
#[derive(Debug, Clone)]
pub struct HueController {
    client: Arc<HueClient>,
}

impl HueController {
    pub fn new(client: HueClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl LightController for HueController {
    type Light = HueLight;

    fn fetch_lights(&self, session: &Session) -> Result<Vec<HueLight>> {
        Ok(self
            .client
            .lights(session)?
            .into_iter()
            .map(|(id, info)| HueLight {
                id,
                name: info.name,
                kind: info.kind,
                session: session.clone(),
                client: Arc::clone(&self.client),
            })
            .collect())
    }
}
