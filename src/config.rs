//! Wire records for the bridge's JSON documents.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// The `config` section of the bridge's full state document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigRecord {
    pub name: String,
    #[serde(rename = "bridgeid")]
    pub bridge_id: Option<String>,
    #[serde(rename = "apiversion")]
    pub api_version: Option<String>,
    #[serde(rename = "swversion")]
    pub sw_version: Option<String>,
    pub mac: Option<String>,
}

/// One entry of the bridge's `lights` map.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LightRecord {
    pub name: String,
    pub state: LightStateRecord,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "modelid")]
    pub model_id: Option<String>,
}

/// The `state` object of a light as reported by the bridge.
///
/// Color mode and effect stay strings here; decoding them is a checked step
/// in [`crate::LightState`].
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LightStateRecord {
    pub on: bool,
    pub bri: Option<u8>,
    pub hue: Option<u16>,
    pub sat: Option<u8>,
    pub xy: Option<[f64; 2]>,
    pub ct: Option<u16>,
    #[serde(rename = "colormode")]
    pub color_mode: Option<String>,
    pub effect: Option<String>,
    pub reachable: Option<bool>,
}

/// One entry of the bridge's `groups` map.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub lights: Vec<String>,
}

/// The complete state document returned by `GET /api/{user}`.
#[derive(Debug, Deserialize)]
pub(crate) struct FullStateRecord {
    pub config: Option<Value>,
    pub lights: Option<IndexMap<String, Value>>,
    pub groups: Option<IndexMap<String, Value>>,
}

/// Decode a JSON value into a record, reporting malformed data as a communication error.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::transport(format!("malformed {what}"), e))
}

/// Parse an entity id key such as `"5"`.
pub(crate) fn parse_id(key: &str, what: &str) -> Result<u32> {
    key.trim()
        .parse()
        .map_err(|e| Error::transport(format!("invalid {what} id {key:?}"), e))
}

/// Fail with the wrapped bridge error if the document holds an `error` entry at any depth.
pub(crate) fn reject_errors(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                return Err(Error::bridge(error));
            }
            map.values().try_for_each(reject_errors)
        }
        Value::Array(items) => items.iter().try_for_each(reject_errors),
        _ => Ok(()),
    }
}
