//! Client-side session lifecycle
//!
//! ```text
//! boot ──► TokenStore restores or completes a redirect sign-in
//!            │
//!            ▼
//!   SessionBootstrap { identity }       RefreshLoop (every 60s)
//!                                          │ is_authenticated? fetch_identity?
//!   SessionManager::sign_in ──┐            │
//!                             ▼            ▼
//!                      IdentityBroadcaster::notify ──► subscriber
//!                             │
//!                             └──► UserProvisioner (fire and forget)
//! ```
//!
//! Interactive sign-in and a refresh tick may interleave; both deliver through
//! the same broadcaster and the later delivery wins.

pub mod broadcaster;
pub mod manager;
pub mod provisioning;
pub mod redirect;
pub mod refresh;
pub mod store;

pub use broadcaster::{IdentityBroadcaster, IdentityCallback};
pub use manager::{SessionBootstrap, SessionManager, SessionManagerBuilder, SignInOutcome};
pub use provisioning::UserProvisioner;
pub use redirect::{Location, MemoryLocation, RedirectParams};
pub use refresh::{RefreshHandle, RefreshLoop, TickOutcome};
pub use store::{SignInStatus, TokenStore};
