use serde_json::Value;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All error types that can occur when talking to a Hue bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value is out of range or malformed. Raised before
    /// any request is sent.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The bridge rejected a request, or it could not be reached or understood.
    ///
    /// `payload` holds the bridge's structured error object when there is
    /// one, otherwise `Value::Null`.
    #[error("bridge communication failed: {description}")]
    Comm {
        description: String,
        payload: Value,
        #[source]
        source: Option<BoxError>,
    },

    /// A local socket could not be set up for discovery.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// The modeled bridge API does not support the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The bridge handle holds no granted credential.
    #[error("need to authenticate first")]
    NotAuthenticated,

    /// A transaction is already open on this object in the current context.
    #[error("a transaction is already open on {0}")]
    TransactionOpen(String),

    /// The entity outlived the bridge handle that owned it.
    #[error("the owning bridge has been dropped")]
    BridgeGone,
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new validation error
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Wrap a structured `{type, address, description}` error object reported by the bridge.
    pub fn bridge(payload: &Value) -> Self {
        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown bridge error")
            .to_string();
        Error::Comm {
            description,
            payload: payload.clone(),
            source: None,
        }
    }

    /// The bridge answered, but not in a shape this client understands.
    pub fn protocol(description: impl Into<String>) -> Self {
        Error::Comm {
            description: description.into(),
            payload: Value::Null,
            source: None,
        }
    }

    /// Wrap a lower level failure (I/O, HTTP, JSON) into a communication error.
    pub fn transport<E>(description: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Comm {
            description: description.into(),
            payload: Value::Null,
            source: Some(Box::new(err)),
        }
    }

    /// The bridge error type number, if this error carries a bridge error payload.
    pub fn error_type(&self) -> Option<u64> {
        match self {
            Error::Comm { payload, .. } => payload.get("type").and_then(Value::as_u64),
            _ => None,
        }
    }

    /// Returns true for failures caused by invalid caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
