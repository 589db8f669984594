//! Durable Push State
//!
//! The single source of truth for push registrations across process restarts.
//!
//! # Features
//!
//! - **Typed Model**: `Registration` per profile, `Subscription` per channel
//! - **One Document**: everything lives in a `PushState` keyed by profile name
//! - **Atomic Saves**: `JsonFileStore` replaces its file via write-then-rename
//! - **Test Backend**: `MemoryStore` with save-failure injection
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use state_store::{JsonFileStore, PushState, Registration, StateStore};
//!
//! # fn main() -> Result<(), state_store::StoreError> {
//! # let dir = std::env::temp_dir().join("state-store-doc");
//! let store = JsonFileStore::new(dir.join("PushState.json"));
//!
//! let mut state = store.load()?.unwrap_or_default();
//! state.registrations.insert(
//!     "default".to_string(),
//!     Registration::new("default", "https://push.example/", false, Utc::now()),
//! );
//! store.save(&state)?;
//!
//! assert!(store.load()?.unwrap().registration("default").is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! PushState
//!     │
//!     └── registrations: BTreeMap<profile, Registration>
//!             │
//!             ├── endpoint, debug, token, uaid, secret
//!             │
//!             └── subscriptions: BTreeMap<ChannelId, Subscription>
//! ```

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use model::{
    ChannelId, Fetched, ProfileContext, PushState, Registration, ServiceData, Subscription,
    UserAgent, PROFILE_NAME_KEY, PROFILE_PATH_KEY, SERVICE_WEBPUSH,
};
pub use store::{JsonFileStore, MemoryStore, StateStore};
