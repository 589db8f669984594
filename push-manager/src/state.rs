//! Per-profile registration state machine.

use chrono::{DateTime, Duration, Utc};
use state_store::{Fetched, Registration};

/// Days a user agent registration stays fresh before it is refreshed.
pub const USER_AGENT_REFRESH_DAYS: i64 = 7;

/// Lifecycle state of a profile.
///
/// ```text
/// Unconfigured ──configure──▶ Configured ──register_user_agent──▶ Registered
///                                  ▲                                  │
///                                  └──────── token invalidated ───────┘
/// ```
///
/// Channel subscriptions can be created in `Configured` and `Registered`;
/// from `Configured` the user agent is (re-)registered transparently first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileState {
    /// No registration exists
    Unconfigured,
    /// A registration exists but has no usable user agent or device token
    Configured,
    /// The broker knows this user agent and a device token is cached
    Registered,
}

impl ProfileState {
    pub fn of(registration: Option<&Registration>) -> Self {
        match registration {
            None => Self::Unconfigured,
            Some(r) if r.user_agent().is_some() && r.token.is_some() => Self::Registered,
            Some(_) => Self::Configured,
        }
    }

    pub fn is_configured(self) -> bool {
        self != Self::Unconfigured
    }
}

/// Whether the user agent registration must be refreshed with the broker.
///
/// A registration is stale when it is older than the refresh interval or
/// older than the device token it was made with.
pub(crate) fn user_agent_is_stale(
    uaid: &Fetched<String>,
    token: &Fetched<String>,
    now: DateTime<Utc>,
) -> bool {
    let expires_at = uaid.fetched_at + Duration::days(USER_AGENT_REFRESH_DAYS);
    expires_at < now || uaid.fetched_at < token.fetched_at
}
