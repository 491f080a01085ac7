//! In-memory bridge fixtures for unit tests.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::bridge::Bridge;
use crate::errors::Error;
use crate::runtime::BoxFuture;
use crate::session::SessionConfig;
use crate::transport::{JsonObject, Method, Transport, normalize_value};

type Responder = Box<dyn Fn(Method, &str, Option<&Value>) -> Result<Value, Error> + Send + Sync>;

/// One request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Transport that answers from a closure and records every request.
pub(crate) struct MockTransport {
    responder: Mutex<Responder>,
    requests: Mutex<Vec<Recorded>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(Method, &str, Option<&Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Arc::new(MockTransport {
            responder: Mutex::new(Box::new(responder)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(Method, &str, Option<&Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests other than reads.
    pub fn writes(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::Get)
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Transport for MockTransport {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Vec<JsonObject>, Error>> {
        self.requests.lock().unwrap().push(Recorded {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
        let reply = {
            let responder = self.responder.lock().unwrap();
            (**responder)(method, path, body)
        };
        Box::pin(async move { normalize_value(reply?) })
    }
}

pub(crate) const USERNAME: &str = "aaaaaaaaaaaaaaaaaaaaaa";

/// Full state with lights 1, 2 and 5 and group 1 holding lights 1 and 2.
pub(crate) fn full_state() -> Value {
    json!({
        "config": {"name": "Living room bridge", "bridgeid": "001788FFFE000000"},
        "lights": {
            "1": {"name": "Desk", "state": {
                "on": true, "bri": 254, "hue": 8418, "sat": 140, "xy": [0.4573, 0.41],
                "ct": 366, "colormode": "hs", "effect": "none", "reachable": true
            }},
            "2": {"name": "Shelf", "state": {
                "on": false, "bri": 1, "hue": 46920, "sat": 254, "xy": [0.167, 0.04],
                "ct": 153, "colormode": "xy", "effect": "colorloop", "reachable": true
            }},
            "5": {"name": "Hall", "state": {
                "on": true, "bri": 100, "hue": 0, "sat": 0, "xy": [0.3, 0.3],
                "ct": 300, "colormode": "ct", "effect": "none"
            }}
        },
        "groups": {
            "1": {"name": "Office", "lights": ["1", "2"], "type": "Room"}
        }
    })
}

/// Reply every write with a success entry per body field.
pub(crate) fn echo_success(path: &str, body: Option<&Value>) -> Value {
    let address = path.splitn(3, '/').nth(2).unwrap_or_default();
    let entries: Vec<Value> = body
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| json!({"success": {format!("/{address}/{k}"): v}}))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(entries)
}

/// Standard responder: serves [`full_state`] and accepts every write.
pub(crate) fn bridge_responder(method: Method, path: &str, body: Option<&Value>) -> Result<Value, Error> {
    let state = full_state();
    let user_root = format!("api/{USERNAME}");
    match method {
        Method::Get if path == user_root => Ok(state),
        Method::Get => {
            let rest = path.trim_start_matches(&user_root).trim_start_matches('/');
            let mut parts = rest.split('/');
            match (parts.next(), parts.next()) {
                (Some(kind), Some(id)) => Ok(state[kind][id].clone()),
                _ => Ok(state[rest].clone()),
            }
        }
        _ => Ok(echo_success(path, body)),
    }
}

/// A bridge already holding [`USERNAME`] that has not synced yet.
pub(crate) fn bridge(transport: Arc<MockTransport>) -> Bridge {
    let bridge = Bridge::with_transport(transport, None, SessionConfig::default()).unwrap();
    bridge.force_authenticated(USERNAME);
    bridge
}

/// A bridge that has completed its first full sync against [`full_state`].
pub(crate) async fn synced_bridge() -> (Bridge, Arc<MockTransport>) {
    let transport = MockTransport::new(bridge_responder);
    let bridge = bridge(transport.clone());
    bridge.sync().await.unwrap();
    transport.clear();
    (bridge, transport)
}
