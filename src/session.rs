//! Session store: authentication flag and the persisted OCR credential.
//!
//! [`SessionStore`] is created once and handed to the
//! [`crate::workflow::WorkflowController`]; there is no global state. It
//! reads the credential from a [`CredentialStorage`] at construction and
//! writes it back whenever a job is started with a non-empty one.
//!
//! Authorization is a browser round-trip. [`SessionStore::begin_authorization`]
//! sends the embedding environment to the provider's consent page; the
//! backend's callback redirects back to the client's own address with a
//! one-time `status=success` marker, which
//! [`SessionStore::complete_authorization`] consumes and strips exactly once.

use crate::config::CREDENTIAL_KEY;
use crate::error::{GatewayError, StorageError};
use crate::gateway::Gateway;
use reqwest::Url;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Query parameter the backend appends after a successful authorization.
pub const REDIRECT_MARKER_KEY: &str = "status";
pub const REDIRECT_MARKER_SUCCESS: &str = "success";

// ── Durable storage ──────────────────────────────────────────────────────

/// Durable key/value storage for client-side secrets.
pub trait CredentialStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Storage backed by a small JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/drive2ebook/state.json`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drive2ebook").join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(map).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        // Readers never see a partially written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl CredentialStorage for JsonFileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.guard();
        Ok(self.read_map()?.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.guard();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }
}

/// In-process storage, for tests and for hosts without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ── Embedding environment ────────────────────────────────────────────────

/// The environment the client runs in: a browser tab, a desktop shell, a
/// terminal. Only what the authorization round-trip needs.
pub trait HostEnvironment: Send + Sync {
    /// Send the user to `url` (open a browser, print a link, …).
    fn navigate(&self, url: &str);

    /// The client's own current address, if it has one.
    fn current_address(&self) -> Option<String>;

    /// Replace the visible address without navigating.
    fn replace_address(&self, address: &str);
}

/// Whether `address` carries the one-time `status=success` marker.
pub fn has_redirect_marker(address: &str) -> bool {
    Url::parse(address)
        .map(|url| {
            url.query_pairs()
                .any(|(k, v)| k == REDIRECT_MARKER_KEY && v == REDIRECT_MARKER_SUCCESS)
        })
        .unwrap_or(false)
}

/// `address` with the marker parameter removed; other parameters survive.
pub fn strip_redirect_marker(address: &str) -> Option<String> {
    let mut url = Url::parse(address).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| &**k != REDIRECT_MARKER_KEY)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

// ── Session store ────────────────────────────────────────────────────────

/// Tracks whether the backend holds Drive credentials for us and keeps the
/// OCR credential in durable storage.
pub struct SessionStore {
    gateway: Arc<dyn Gateway>,
    storage: Arc<dyn CredentialStorage>,
    authenticated: AtomicBool,
    credential: Mutex<Option<String>>,
    marker_consumed: AtomicBool,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .field("credential", &self.credential().map(|_| "<redacted>"))
            .field("marker_consumed", &self.marker_consumed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SessionStore {
    /// Create the store and load any previously saved credential.
    ///
    /// A storage failure is logged and treated as "no saved credential".
    pub fn new(gateway: Arc<dyn Gateway>, storage: Arc<dyn CredentialStorage>) -> Self {
        let credential = match storage.load(CREDENTIAL_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Could not load saved credential: {}", e);
                None
            }
        };
        Self {
            gateway,
            storage,
            authenticated: AtomicBool::new(false),
            credential: Mutex::new(credential),
            marker_consumed: AtomicBool::new(false),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// The saved OCR credential, used to prefill the credential input.
    pub fn credential(&self) -> Option<String> {
        self.credential_slot().clone()
    }

    fn credential_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.credential.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the saved credential. Empty values are ignored.
    pub fn save_credential(&self, value: &str) -> Result<(), StorageError> {
        if value.is_empty() {
            return Ok(());
        }
        *self.credential_slot() = Some(value.to_string());
        self.storage.store(CREDENTIAL_KEY, value)
    }

    /// Ask the backend whether we are signed in.
    ///
    /// Only ever promotes: a `logged_in: true` answer sets the flag, while a
    /// negative answer or a network failure leaves it as it was. Clearing
    /// the flag is [`Self::sign_out`]'s job.
    pub async fn check_session(&self) -> bool {
        match self.gateway.get_session().await {
            Ok(info) if info.logged_in => {
                debug!("Session check: logged in");
                self.authenticated.store(true, Ordering::SeqCst);
            }
            Ok(_) => debug!("Session check: not logged in"),
            Err(e) => warn!("Server not reachable yet: {}", e),
        }
        self.is_authenticated()
    }

    /// Fetch the provider's consent URL and send the host there.
    ///
    /// On failure nothing is navigated and the error is returned for the
    /// caller to surface.
    pub async fn begin_authorization(&self, host: &dyn HostEnvironment) -> Result<(), GatewayError> {
        let url = self.gateway.authorization_url().await?;
        info!("Redirecting to authorization page");
        host.navigate(&url);
        Ok(())
    }

    /// Consume the redirect marker from the host's address.
    ///
    /// Runs at most once per store: later calls return `false` without
    /// looking at the address, so a reload never re-triggers it. Returns
    /// `true` when the marker was present, in which case it has been
    /// stripped from the address and the session is authenticated.
    pub fn complete_authorization(&self, host: &dyn HostEnvironment) -> bool {
        if self.marker_consumed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(address) = host.current_address() else {
            return false;
        };
        if !has_redirect_marker(&address) {
            return false;
        }
        if let Some(clean) = strip_redirect_marker(&address) {
            host.replace_address(&clean);
        }
        self.authenticated.store(true, Ordering::SeqCst);
        info!("Authorization completed");
        true
    }

    /// Invalidate the backend session and mark ourselves signed out.
    ///
    /// The local flag is cleared whatever the backend says.
    pub async fn sign_out(&self) {
        if let Err(e) = self.gateway.logout().await {
            warn!("Logout request failed: {}", e);
        }
        self.authenticated.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_detection() {
        assert!(has_redirect_marker("http://localhost:5173/?status=success"));
        assert!(!has_redirect_marker("http://localhost:5173/?status=failed"));
        assert!(!has_redirect_marker("http://localhost:5173/"));
        assert!(!has_redirect_marker("not an address"));
    }

    #[test]
    fn marker_stripping_keeps_other_params() {
        assert_eq!(
            strip_redirect_marker("http://localhost:5173/?status=success").as_deref(),
            Some("http://localhost:5173/")
        );
        assert_eq!(
            strip_redirect_marker("http://localhost:5173/app?tab=ocr&status=success").as_deref(),
            Some("http://localhost:5173/app?tab=ocr")
        );
    }

    #[test]
    fn memory_storage_round_trip() {
        let s = MemoryStorage::new();
        assert_eq!(s.load("k").unwrap(), None);
        s.store("k", "v").unwrap();
        assert_eq!(s.load("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let first = JsonFileStorage::new(&path);
        assert_eq!(first.load(CREDENTIAL_KEY).unwrap(), None);
        first.store(CREDENTIAL_KEY, "secret-1").unwrap();
        first.store("other", "x").unwrap();

        let second = JsonFileStorage::new(&path);
        assert_eq!(second.load(CREDENTIAL_KEY).unwrap().as_deref(), Some("secret-1"));
        assert_eq!(second.load("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStorage::new(&path).load(CREDENTIAL_KEY).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
