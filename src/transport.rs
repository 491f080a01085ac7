//! HTTP+JSON transport to a bridge.

use std::fmt;
use std::time::Duration;

use log::debug;
use serde_json::Value;
use strum_macros::Display;
use url::Url;

use crate::errors::Error;
use crate::runtime::BoxFuture;

type Result<T> = std::result::Result<T, Error>;

/// A JSON object as returned by the bridge.
pub type JsonObject = serde_json::Map<String, Value>;

/// HTTP methods understood by the bridge's REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// GET and DELETE must not carry a request body.
    pub fn allows_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Narrow request interface the bridge logic talks through.
///
/// `path` is relative to the bridge's base URL, e.g. `api/<user>/lights`.
/// Implementations normalize a single-object reply into a one-element list.
pub trait Transport: Send + Sync + fmt::Debug {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Vec<JsonObject>>>;

    /// The base URL requests are resolved against, if there is one.
    fn base_url(&self) -> Option<&Url> {
        None
    }
}

/// Settings for the HTTP client used to reach a bridge.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("hue-lights-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| Error::transport("failed to build HTTP client", e))
    }
}

/// [`Transport`] over plain HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url, config: &TransportConfig) -> Result<Self> {
        Ok(Self::with_client(base_url, config.build_client()?))
    }

    /// Use an existing client, e.g. one shared between several bridges.
    pub fn with_client(mut base_url: Url, client: reqwest::Client) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        HttpTransport { client, base_url }
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Vec<JsonObject>> {
        if body.is_some() && !method.allows_body() {
            return Err(Error::validation(
                "request body",
                format!("{method} requests cannot carry a body"),
            ));
        }

        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::transport(format!("invalid request path {path:?}"), e))?;
        debug!("{method} {url} {}", body.map(Value::to_string).unwrap_or_default());

        let mut request = self.client.request(method.into(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let text = request
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::transport(format!("{method} {url} failed"), e))?
            .text()
            .await
            .map_err(|e| Error::transport(format!("failed to read reply to {method} {url}"), e))?;

        debug!("reply from {url}: {text}");
        normalize(&text)
    }
}

impl Transport for HttpTransport {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<Vec<JsonObject>>> {
        Box::pin(self.send(method, path, body))
    }

    fn base_url(&self) -> Option<&Url> {
        Some(&self.base_url)
    }
}

/// Turn a reply body into a list of objects.
///
/// A body starting with `{` is one object; anything else must be an array of objects.
pub(crate) fn normalize(text: &str) -> Result<Vec<JsonObject>> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| Error::transport("bridge reply is not valid JSON", e))?;
    normalize_value(value)
}

pub(crate) fn normalize_value(value: Value) -> Result<Vec<JsonObject>> {
    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(Error::protocol(format!("expected a JSON object, got {other}"))),
            })
            .collect(),
        other => Err(Error::protocol(format!(
            "expected a JSON object or array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_object_and_array() {
        let single = normalize(r#" {"config": {"name": "Hue"}} "#).unwrap();
        assert_eq!(single.len(), 1);
        assert!(single[0].contains_key("config"));

        let list = normalize(r#"[{"success": {"a": 1}}, {"success": {"b": 2}}]"#).unwrap();
        assert_eq!(list.len(), 2);

        assert!(normalize("[1, 2]").is_err());
        assert!(normalize("not json").is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Put.to_string(), "PUT");
        assert!(!Method::Get.allows_body());
        assert!(!Method::Delete.allows_body());
        assert!(Method::Post.allows_body());
    }

    #[tokio::test]
    async fn test_get_with_body_fails_fast() {
        let transport = HttpTransport::with_client(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            reqwest::Client::new(),
        );
        let body = json!({"on": true});
        let err = transport
            .request(Method::Get, "api", Some(&body))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let transport = HttpTransport::with_client(
            Url::parse("http://10.0.0.5:80/bridge").unwrap(),
            reqwest::Client::new(),
        );
        assert_eq!(transport.base_url().unwrap().as_str(), "http://10.0.0.5/bridge/");
    }
}
