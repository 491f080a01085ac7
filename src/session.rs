//! Credential handling and authentication state.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-_a-zA-Z0-9]{10,40}\s*$").expect("valid username pattern"));

/// Where a bridge handle is in the authentication handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    /// Probing an existing username with a full sync.
    Checking,
    /// Waiting for the link button to be pressed.
    AwaitingGrant,
    Authenticated,
    /// The bridge refused, or the grant window expired.
    Failed,
}

/// Settings for the authentication handshake.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent as `devicetype` when asking the bridge for a new username.
    pub device_type: String,
    /// How long to keep asking while the link button has not been pressed.
    pub grant_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each poll.
    pub poll_jitter: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_type: "hue-lights-rs#client".to_string(),
            grant_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(900),
            poll_jitter: Duration::from_millis(100),
        }
    }
}

/// Check a username and return it trimmed.
///
/// ```
/// use hue_lights_rs::validate_username;
///
/// assert_eq!(validate_username("  abcdefghij-_42 ").unwrap(), "abcdefghij-_42");
/// assert!(validate_username("short").is_err());
/// assert!(validate_username("has spaces inside").is_err());
/// ```
pub fn validate_username(username: &str) -> Result<String> {
    if USERNAME_PATTERN.is_match(username) {
        Ok(username.trim().to_string())
    } else {
        Err(Error::validation(
            "username",
            "expected 10 to 40 characters from [-_a-zA-Z0-9]",
        ))
    }
}

/// Two usernames are equal enough when they match after trimming; two blank ones match too.
pub(crate) fn equal_enough(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.map(str::trim).unwrap_or_default();
    let b = b.map(str::trim).unwrap_or_default();
    a == b
}

/// Authentication bookkeeping of one bridge handle.
#[derive(Debug, Default)]
pub(crate) struct Session {
    username: Option<String>,
    state: AuthState,
    /// Tracked apart from `state`: a granted username whose first sync failed stays granted.
    initial_sync_done: bool,
}

impl Session {
    pub fn new(username: Option<&str>) -> Result<Self> {
        Ok(Session {
            username: username.map(validate_username).transpose()?,
            ..Default::default()
        })
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Store a new username; an authenticated session stays so only if it is equal enough to the old one.
    pub fn set_username(&mut self, username: &str) -> Result<()> {
        let username = validate_username(username)?;
        if !equal_enough(self.username.as_deref(), Some(&username)) {
            if self.state == AuthState::Authenticated {
                self.state = AuthState::Unauthenticated;
            }
            self.initial_sync_done = false;
        }
        self.username = Some(username);
        Ok(())
    }

    /// Adopt a username handed out by the bridge.
    pub fn grant(&mut self, username: String) {
        if !equal_enough(self.username.as_deref(), Some(&username)) {
            self.initial_sync_done = false;
        }
        self.username = Some(username);
        self.state = AuthState::Authenticated;
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn set_state(&mut self, state: AuthState) {
        self.state = state;
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn initial_sync_done(&self) -> bool {
        self.initial_sync_done
    }

    pub fn mark_synced(&mut self) {
        self.initial_sync_done = true;
    }
}
