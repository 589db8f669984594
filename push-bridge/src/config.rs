//! Configuration for the push service.

use std::path::{Path, PathBuf};

use state_store::ProfileContext;

use crate::error::{CommandError, Result};

/// Name of the state document inside the data directory
pub const STATE_FILE_NAME: &str = "PushState.json";

/// Profile used when none is configured
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Environment variable overriding the state file path
pub const ENV_STATE_PATH: &str = "PUSH_BRIDGE_STATE_PATH";
/// Environment variable overriding the active profile name
pub const ENV_PROFILE_NAME: &str = "PUSH_BRIDGE_PROFILE_NAME";
/// Environment variable overriding the active profile path
pub const ENV_PROFILE_PATH: &str = "PUSH_BRIDGE_PROFILE_PATH";
/// Environment variable carrying the messaging sender ID
pub const ENV_SENDER_ID: &str = "PUSH_BRIDGE_SENDER_ID";

/// Configuration for a `PushService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushServiceConfig {
    /// Where the registration document is persisted
    /// Default: `<local data dir>/push-bridge/PushState.json`
    pub state_path: PathBuf,

    /// The host profile commands are addressed to and inbound messages are
    /// checked against
    pub profile: ProfileContext,

    /// Messaging sender ID the token provider registers with, if any
    pub sender_id: Option<String>,
}

impl Default for PushServiceConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            state_path: data_dir.join(STATE_FILE_NAME),
            profile: ProfileContext::new(
                DEFAULT_PROFILE_NAME,
                data_dir
                    .join("profiles")
                    .join(DEFAULT_PROFILE_NAME)
                    .to_string_lossy(),
            ),
            sender_id: None,
        }
    }
}

impl PushServiceConfig {
    /// Create a PushServiceConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `PUSH_BRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_STATE_PATH) {
            config.state_path = PathBuf::from(path);
        }
        if let Some(name) = lookup(ENV_PROFILE_NAME) {
            config.profile.name = name;
        }
        if let Some(path) = lookup(ENV_PROFILE_PATH) {
            config.profile.path = path;
        }
        if let Some(sender_id) = lookup(ENV_SENDER_ID) {
            config.sender_id = Some(sender_id);
        }

        config
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.profile.name.is_empty() {
            return Err(CommandError::InvalidConfig(
                "Profile name must not be empty".to_string(),
            ));
        }

        if self.profile.path.is_empty() {
            return Err(CommandError::InvalidConfig(
                "Profile path must not be empty".to_string(),
            ));
        }

        if self.state_path.file_name().is_none() {
            return Err(CommandError::InvalidConfig(format!(
                "State path {} does not name a file",
                self.state_path.display()
            )));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_state_path(mut self, path: impl AsRef<Path>) -> Self {
        self.state_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_profile(mut self, profile: ProfileContext) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("push-bridge")
}
