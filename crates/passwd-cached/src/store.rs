//! In-memory secret store.
//!
//! Keeps logins for the lifetime of the process. Useful as a stand-in for a
//! real wallet and in tests, where it can also simulate a locked store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use passwd_cache_core::{SecretStore, StoreError, StoredLogin, StoredLogins};
use tracing::trace;

/// A [`SecretStore`] backed by a map.
#[derive(Default)]
pub struct MemorySecretStore {
    slots: Mutex<HashMap<String, StoredLogins>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySecretStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose every operation fails.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    /// Open or close the store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Seed a slot, bypassing availability.
    pub fn insert(&self, wallet_key: &str, login: StoredLogin) {
        self.lock().entry(wallet_key.to_string()).or_default().upsert(login);
    }

    /// Logins currently stored in a slot.
    pub fn logins(&self, wallet_key: &str) -> StoredLogins {
        self.lock().get(wallet_key).cloned().unwrap_or_default()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredLogins>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn read(
        &self,
        wallet_key: String,
    ) -> Pin<Box<dyn Future<Output = Result<StoredLogins, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let logins = self.logins(&wallet_key);
            trace!(wallet_key = %wallet_key, count = logins.0.len(), "Read secret store slot");
            Ok(logins)
        })
    }

    fn write(
        &self,
        wallet_key: String,
        login: StoredLogin,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            trace!(wallet_key = %wallet_key, username = %login.username, "Writing secret store slot");
            self.insert(&wallet_key, login);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
