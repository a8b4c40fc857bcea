//! Credential cache for the provider session
//!
//! [`CacheLocation::Memory`] keeps the session for the life of the process.
//! [`CacheLocation::LocalStorage`] additionally mirrors it to a JSON file so a
//! restarted client can restore the session without interaction.
//!
//! The cache also holds redirect sign-ins still waiting for their callback.
//! With local storage they live in a sibling `*.transactions.json` file, so the
//! process that handles the redirect need not be the one that started it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheLocation;
use crate::error::AuthResult;
use crate::types::UserProfile;

/// How long a started redirect sign-in can still be completed
pub const TRANSACTION_TTL_SECS: i64 = 15 * 60;

/// Credentials and profile of a signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Access token for the configured audience
    pub access_token: String,
    /// Refresh token, when the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access-token expiry
    pub expires_at: DateTime<Utc>,
    /// Scopes granted with the access token
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Profile fetched at sign-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl StoredSession {
    /// Whether the access token is still good for at least `margin`
    pub fn access_token_valid_for(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin > now
    }

    /// Whether a token can still be produced without interaction
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() || self.expires_at > now
    }
}

/// Authorization request waiting for its redirect callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// PKCE code verifier sent with the code exchange
    pub code_verifier: String,
    /// When the request was started
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    /// Start a transaction now
    pub fn new(code_verifier: impl Into<String>) -> Self {
        Self {
            code_verifier: code_verifier.into(),
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.created_at + Duration::seconds(TRANSACTION_TTL_SECS) <= now
    }
}

type Transactions = HashMap<String, PendingAuthorization>;

/// Single-slot credential cache plus pending redirect transactions
#[derive(Debug)]
pub struct CredentialCache {
    location: CacheLocation,
    entry: RwLock<Option<StoredSession>>,
    transactions: RwLock<Transactions>,
    // Serializes file writes; both files share one tmp-then-rename scheme
    io_lock: tokio::sync::Mutex<()>,
}

impl CredentialCache {
    /// Empty in-memory cache
    pub fn memory() -> Self {
        Self::with_state(CacheLocation::Memory, None, Transactions::new())
    }

    fn with_state(
        location: CacheLocation,
        entry: Option<StoredSession>,
        transactions: Transactions,
    ) -> Self {
        Self {
            location,
            entry: RwLock::new(entry),
            transactions: RwLock::new(transactions),
            io_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a cache, restoring a persisted session and pending transactions
    ///
    /// An unreadable or corrupt file is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an IO error only when a file exists but cannot be read.
    pub async fn open(location: CacheLocation) -> AuthResult<Self> {
        let (restored, transactions) = match &location {
            CacheLocation::Memory => (None, Transactions::new()),
            CacheLocation::LocalStorage { path } => (
                load(path).await?,
                load(&transactions_path(path)).await?.unwrap_or_default(),
            ),
        };

        if restored.is_some() {
            debug!(?location, "Restored cached session");
        }
        if !transactions.is_empty() {
            debug!(pending = transactions.len(), "Restored pending sign-ins");
        }

        Ok(Self::with_state(location, restored, transactions))
    }

    /// Configured location
    pub fn location(&self) -> &CacheLocation {
        &self.location
    }

    /// Current session, if any
    pub fn get(&self) -> Option<StoredSession> {
        self.entry.read().clone()
    }

    /// Replace the session
    ///
    /// # Errors
    ///
    /// Returns an error when a local-storage file cannot be written. The
    /// in-memory copy is updated regardless.
    pub async fn store(&self, session: StoredSession) -> AuthResult<()> {
        *self.entry.write() = Some(session.clone());

        if let CacheLocation::LocalStorage { path } = &self.location {
            let _io = self.io_lock.lock().await;
            persist(path, &session).await?;
        }
        Ok(())
    }

    /// Forget the session
    ///
    /// # Errors
    ///
    /// Returns an error when a local-storage file exists but cannot be removed.
    pub async fn clear(&self) -> AuthResult<()> {
        *self.entry.write() = None;

        if let CacheLocation::LocalStorage { path } = &self.location {
            let _io = self.io_lock.lock().await;
            remove(path).await?;
        }
        Ok(())
    }

    /// Record a started redirect sign-in under its `state`
    ///
    /// Expired transactions are dropped on the way.
    ///
    /// # Errors
    ///
    /// Returns an error when the transactions file cannot be written.
    pub async fn begin_transaction(
        &self,
        state: impl Into<String>,
        pending: PendingAuthorization,
    ) -> AuthResult<()> {
        let now = Utc::now();
        let snapshot = {
            let mut transactions = self.transactions.write();
            transactions.retain(|_, tx| !tx.is_expired(now));
            transactions.insert(state.into(), pending);
            transactions.clone()
        };
        self.persist_transactions(&snapshot).await
    }

    /// Remove and return the transaction for `state`
    ///
    /// A transaction is handed out at most once. An expired one is removed
    /// but not returned.
    ///
    /// # Errors
    ///
    /// Returns an error when the transactions file cannot be written.
    pub async fn take_transaction(&self, state: &str) -> AuthResult<Option<PendingAuthorization>> {
        let (taken, snapshot) = {
            let mut transactions = self.transactions.write();
            let taken = transactions.remove(state);
            (taken, transactions.clone())
        };
        if taken.is_some() {
            self.persist_transactions(&snapshot).await?;
        }

        Ok(taken.filter(|tx| {
            let live = !tx.is_expired(Utc::now());
            if !live {
                debug!("Discarding expired sign-in transaction");
            }
            live
        }))
    }

    /// Number of transactions waiting for a callback
    pub fn pending_transactions(&self) -> usize {
        self.transactions.read().len()
    }

    /// Drop every pending transaction
    ///
    /// # Errors
    ///
    /// Returns an error when the transactions file exists but cannot be removed.
    pub async fn clear_transactions(&self) -> AuthResult<()> {
        self.transactions.write().clear();
        self.persist_transactions(&Transactions::new()).await
    }

    async fn persist_transactions(&self, snapshot: &Transactions) -> AuthResult<()> {
        let CacheLocation::LocalStorage { path } = &self.location else {
            return Ok(());
        };
        let path = transactions_path(path);
        let _io = self.io_lock.lock().await;
        if snapshot.is_empty() {
            remove(&path).await
        } else {
            persist(&path, snapshot).await
        }
    }
}

async fn load<T: DeserializeOwned>(path: &Path) -> AuthResult<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
            Ok(None)
        }
    }
}

async fn persist<T: Serialize>(path: &Path, value: &T) -> AuthResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Write then rename so a crash never leaves a half-written file
    let tmp = sibling(path, ".tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove(path: &Path) -> AuthResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed cache file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `session.json` -> `session.transactions.json`
fn transactions_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_os_string();
    let mut name = stem;
    name.push(".transactions.json");
    path.with_file_name(name)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
