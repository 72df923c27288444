//! LTI 1.3 tool provider.
//!
//! Implements the launch side of the IMS LTI 1.3 protocol: the OIDC
//! third-party-initiated login, ID token validation against per-platform
//! key material, and session continuation via a signed cookie plus the
//! LTIK query token. Construct a [`Provider`] with a [`Store`], a
//! [`Config`] and your [`LaunchCallbacks`], register platforms through
//! its [`PlatformRegistry`], and serve the router it builds.

pub mod config;
pub mod entity;
pub mod error;
pub mod handler;
pub mod keyring;
pub mod ltik;
pub mod middleware;
pub mod nonce;
pub mod provider;
pub mod redirect;
pub mod registry;
pub mod session;
pub mod store;
pub mod util;
pub mod validator;

pub use config::{Config, CookieOptions, WhitelistEntry};
pub use entity::platform::AuthConfig;
pub use error::{AppError, OptionExt};
pub use keyring::{KeyRing, MasterKey};
pub use ltik::{LtikClaims, LtikCodec};
pub use provider::{LaunchCallbacks, Provider};
pub use redirect::RedirectOptions;
pub use registry::{PlatformRegistration, PlatformRegistry};
pub use session::LaunchSession;
pub use store::{MemoryStore, SeaOrmStore, Store, StoreError};
