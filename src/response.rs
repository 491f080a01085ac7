//! Bridge reply envelopes.
//!
//! Write requests answer with a list of `{"success": {...}}` or
//! `{"error": {"type", "address", "description"}}` entries.

use serde_json::Value;

use crate::errors::Error;
use crate::transport::JsonObject;

type Result<T> = std::result::Result<T, Error>;

/// Bridge error type reported while the link button has not been pressed.
pub(crate) const LINK_BUTTON_NOT_PRESSED: u64 = 101;

/// Fail unless every entry of the reply is a `success` entry.
pub(crate) fn ensure_success(entries: &[JsonObject]) -> Result<()> {
    for entry in entries {
        if entry.contains_key("success") {
            continue;
        }
        return Err(match entry.get("error") {
            Some(error) => Error::bridge(error),
            None => Error::protocol(format!(
                "reply entry without success: {}",
                Value::Object(entry.clone())
            )),
        });
    }
    Ok(())
}

/// Find the value the bridge confirmed for `address`, e.g. `/lights/5/name`.
pub(crate) fn confirmed<'a>(entries: &'a [JsonObject], address: &str) -> Option<&'a Value> {
    entries
        .iter()
        .filter_map(|entry| entry.get("success"))
        .find_map(|success| success.get(address))
}

/// Outcome of one create-user request.
#[derive(Debug)]
pub(crate) enum CreateUserReply {
    /// The bridge issued this username.
    Granted(String),
    /// The link button has not been pressed yet.
    AwaitingGrant(Error),
    /// Any other refusal.
    Rejected(Error),
}

impl CreateUserReply {
    pub(crate) fn parse(entries: &[JsonObject]) -> Self {
        for entry in entries {
            if let Some(username) = entry
                .get("success")
                .and_then(|s| s.get("username"))
                .and_then(Value::as_str)
            {
                return CreateUserReply::Granted(username.to_string());
            }
            if let Some(error) = entry.get("error") {
                let err = Error::bridge(error);
                return match err.error_type() {
                    Some(LINK_BUTTON_NOT_PRESSED) => CreateUserReply::AwaitingGrant(err),
                    _ => CreateUserReply::Rejected(err),
                };
            }
        }
        CreateUserReply::Rejected(Error::protocol("empty reply to create user request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(value: Value) -> Vec<JsonObject> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => panic!("expected an array"),
        }
    }

    #[test]
    fn test_ensure_success() {
        assert!(ensure_success(&entries(json!([{"success": {"/config/name": "Home"}}]))).is_ok());

        let err = ensure_success(&entries(json!([
            {"success": {"/lights/1/state/on": true}},
            {"error": {"type": 201, "address": "/lights/1/state/bri", "description": "device is set to off"}}
        ])))
        .unwrap_err();
        assert_eq!(err.error_type(), Some(201));

        assert!(ensure_success(&entries(json!([{"neither": 1}]))).is_err());
    }

    #[test]
    fn test_confirmed() {
        let reply = entries(json!([{"success": {"/lights/5/name": "Desk lamp"}}]));
        assert_eq!(confirmed(&reply, "/lights/5/name"), Some(&json!("Desk lamp")));
        assert_eq!(confirmed(&reply, "/lights/6/name"), None);
    }

    #[test]
    fn test_create_user_reply() {
        let granted = CreateUserReply::parse(&entries(json!([{"success": {"username": "abcdefghijkl"}}])));
        assert!(matches!(granted, CreateUserReply::Granted(ref u) if u == "abcdefghijkl"));

        let waiting = CreateUserReply::parse(&entries(json!([
            {"error": {"type": 101, "address": "", "description": "link button not pressed"}}
        ])));
        assert!(matches!(waiting, CreateUserReply::AwaitingGrant(_)));

        let rejected = CreateUserReply::parse(&entries(json!([
            {"error": {"type": 7, "address": "/username", "description": "invalid value"}}
        ])));
        assert!(matches!(rejected, CreateUserReply::Rejected(_)));
    }
}
