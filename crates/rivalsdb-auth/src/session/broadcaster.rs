//! Single-subscriber identity notification
//!
//! Every source of a new identity (initial boot, refresh tick, interactive
//! sign-in) funnels through [`IdentityBroadcaster::notify`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::types::IdentityClaims;

/// Subscriber signature
pub type IdentityCallback = Arc<dyn Fn(IdentityClaims) + Send + Sync>;

/// Holds at most one subscriber; registering replaces the previous one
///
/// Clones share the subscriber slot.
#[derive(Clone, Default)]
pub struct IdentityBroadcaster {
    callback: Arc<Mutex<Option<IdentityCallback>>>,
}

impl IdentityBroadcaster {
    /// Create a broadcaster with no subscriber
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the subscriber, replacing any previous one
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(IdentityClaims) + Send + Sync + 'static,
    {
        *self.callback.lock() = Some(Arc::new(callback));
    }

    /// Remove the subscriber
    pub fn clear_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Whether a subscriber is registered
    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Deliver claims to the subscriber, synchronously
    ///
    /// Returns whether a subscriber received them. Without one this is a no-op.
    pub fn notify(&self, claims: IdentityClaims) -> bool {
        // Call outside the lock so the subscriber may re-register itself
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                trace!(user_id = %claims.user_id, "Delivering identity");
                callback(claims);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for IdentityBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityBroadcaster")
            .field("has_callback", &self.has_callback())
            .finish()
    }
}
