//! In-memory credential cache.
//!
//! Credentials are grouped by cache key (see [`crate::cache_key`]). Each key
//! holds a list of entries, at most one per realm, kept sorted so that the
//! entry with the longest directory prefix is tried first.
//!
//! Every entry carries its own lifetime:
//! - [`ExpirePolicy::Never`]: kept until removed explicitly
//! - [`ExpirePolicy::UntilWindowClose`]: removed when the last bound window closes
//! - [`ExpirePolicy::TimeToLive`]: removed once a short grace period elapses
//!
//! # Thread Safety
//!
//! This struct is NOT thread-safe. The server confines it to a single task.
//!
//! # Example
//!
//! ```
//! use passwd_cache_core::cache::CredentialCache;
//! use passwd_cache_core::types::AuthInfo;
//!
//! let mut cache = CredentialCache::new();
//! let info = AuthInfo::new("http://www.example.com").with_login("toto", "foobar");
//! cache.upsert("http-www.example.com", info, 0, 1, false);
//!
//! let query = AuthInfo::new("http://www.example.com");
//! let entry = cache.lookup("http-www.example.com", &query).unwrap();
//! assert_eq!(entry.info.username, "toto");
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cache_key::{directory_of, url_path};
use crate::types::{AuthInfo, ExpirePolicy, SeqNr, WindowId};

/// Default grace period for [`ExpirePolicy::TimeToLive`] entries.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A cached credential with its lifetime bookkeeping.
///
/// The cache hands out clones; mutating a returned entry has no effect on the
/// cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The credential.
    pub info: AuthInfo,
    /// Path prefix the credential applies to, used for `verify_path` matching.
    pub directory: String,
    /// Lifetime policy.
    pub expire: ExpirePolicy,
    /// Windows keeping an [`ExpirePolicy::UntilWindowClose`] entry alive.
    pub windows: Vec<WindowId>,
    /// Deadline of a [`ExpirePolicy::TimeToLive`] entry.
    pub expire_at: Option<Instant>,
    /// Server sequence number at the time the entry was written.
    pub seq_nr: SeqNr,
    /// The user declined the dialog that produced this entry.
    pub canceled: bool,
}

impl CacheEntry {
    fn new(info: AuthInfo, seq_nr: SeqNr, canceled: bool) -> Self {
        let directory = directory_of(&url_path(&info.url)).to_string();
        Self {
            info,
            directory,
            expire: ExpirePolicy::TimeToLive,
            windows: Vec::new(),
            expire_at: None,
            seq_nr,
            canceled,
        }
    }

    /// Check whether a time-limited entry has run out.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire == ExpirePolicy::TimeToLive && self.expire_at.is_some_and(|at| now > at)
    }

    /// Time left before a time-limited entry expires.
    pub fn time_remaining(&self) -> Option<Duration> {
        if self.expire != ExpirePolicy::TimeToLive {
            return None;
        }
        self.expire_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn matches(&self, query: &AuthInfo, query_path: &str) -> bool {
        let user_ok = query.username.is_empty() || query.username == self.info.username;
        if query.verify_path {
            query_path.starts_with(&self.directory) && user_ok
        } else {
            self.info.realm == query.realm && user_ok
        }
    }

    fn update_expire(&mut self, window_id: WindowId, keep: bool, grace_period: Duration) {
        if keep && window_id == 0 {
            self.expire = ExpirePolicy::Never;
        } else if window_id != 0 && self.expire != ExpirePolicy::Never {
            self.expire = ExpirePolicy::UntilWindowClose;
            if !self.windows.contains(&window_id) {
                self.windows.push(window_id);
            }
        } else if self.expire == ExpirePolicy::TimeToLive {
            self.expire_at = Some(Instant::now() + grace_period);
        }
    }
}

/// The credential cache.
#[derive(Debug)]
pub struct CredentialCache {
    /// Entry lists keyed by cache key. A list is never empty.
    entries: HashMap<String, Vec<CacheEntry>>,
    /// Lifetime of time-limited entries after their last use.
    grace_period: Duration,
}

impl CredentialCache {
    /// Create an empty cache with the default grace period.
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    /// Create an empty cache with a custom grace period.
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            grace_period,
        }
    }

    /// Find the entry matching `query` under `key`.
    ///
    /// Time-limited entries that ran out are dropped along the way.
    pub fn lookup(&mut self, key: &str, query: &AuthInfo) -> Option<CacheEntry> {
        let list = self.entries.get_mut(key)?;
        let now = Instant::now();
        let before = list.len();
        list.retain(|entry| !entry.is_expired(now));
        if list.len() != before {
            trace!(key = %key, removed = before - list.len(), "Dropped expired entries");
        }

        let query_path = url_path(&query.url);
        let found = list
            .iter()
            .find(|entry| entry.matches(query, &query_path))
            .cloned();

        if list.is_empty() {
            self.entries.remove(key);
        }
        found
    }

    /// Renew the lifetime of the entry for `realm` after it was used.
    ///
    /// Binds the entry to `window_id` when one is given, or restarts its grace
    /// period otherwise.
    pub fn refresh(&mut self, key: &str, realm: &str, window_id: WindowId) {
        let grace_period = self.grace_period;
        if let Some(entry) = self
            .entries
            .get_mut(key)
            .and_then(|list| list.iter_mut().find(|e| e.info.realm == realm))
        {
            entry.update_expire(window_id, false, grace_period);
        }
    }

    /// Insert or replace the entry for `info.realm` under `key`.
    ///
    /// An existing entry keeps its lifetime policy and window bindings; its
    /// credential, directory, sequence number and cancel flag are replaced.
    pub fn upsert(
        &mut self,
        key: &str,
        info: AuthInfo,
        window_id: WindowId,
        seq_nr: SeqNr,
        canceled: bool,
    ) -> CacheEntry {
        debug!(
            key = %key,
            window_id,
            username = %info.username,
            realm = %info.realm,
            seq_nr,
            keep_password = info.keep_password,
            canceled,
            "Adding cache entry"
        );

        let grace_period = self.grace_period;
        let list = self.entries.entry(key.to_string()).or_default();
        let keep = info.keep_password && !canceled;

        let mut entry = match list.iter().position(|e| e.info.realm == info.realm) {
            Some(idx) => {
                let mut existing = list.remove(idx);
                existing.directory = directory_of(&url_path(&info.url)).to_string();
                existing.info = info;
                existing.seq_nr = seq_nr;
                existing.canceled = canceled;
                existing
            }
            None => CacheEntry::new(info, seq_nr, canceled),
        };
        entry.update_expire(window_id, keep, grace_period);

        let result = entry.clone();
        list.push(entry);
        // Stable sort: longest directory first, insertion order otherwise.
        list.sort_by(|a, b| b.directory.len().cmp(&a.directory.len()));
        result
    }

    /// Remove the entries for `realm` under `key`.
    ///
    /// Returns the number of entries removed.
    pub fn remove(&mut self, key: &str, realm: &str) -> usize {
        let Some(list) = self.entries.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        list.retain(|e| e.info.realm != realm);
        let removed = before - list.len();
        if list.is_empty() {
            self.entries.remove(key);
        }
        if removed > 0 {
            trace!(key = %key, realm = %realm, removed, "Removed cache entries");
        }
        removed
    }

    /// Remove every entry whose URL has the given scheme and host, and whose
    /// username is `user` (any username when `user` is empty).
    ///
    /// Scheme and host compare case-insensitively.
    pub fn remove_matching(&mut self, host: &str, protocol: &str, user: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, list| {
            let before = list.len();
            list.retain(|entry| {
                let Ok(url) = url::Url::parse(&entry.info.url) else {
                    return true;
                };
                let hit = url.scheme().eq_ignore_ascii_case(protocol)
                    && url.host_str().unwrap_or_default().eq_ignore_ascii_case(host)
                    && (user.is_empty() || entry.info.username == user);
                !hit
            });
            removed += before - list.len();
            !list.is_empty()
        });
        debug!(host = %host, protocol = %protocol, user = %user, removed, "Removed matching entries");
        removed
    }

    /// Drop the binding of every window-scoped entry to `window_id`.
    ///
    /// Entries left without any window are removed. Returns how many were.
    pub fn remove_for_window(&mut self, window_id: WindowId) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, list| {
            let before = list.len();
            list.retain_mut(|entry| {
                if entry.expire != ExpirePolicy::UntilWindowClose {
                    return true;
                }
                let bound = entry.windows.len();
                entry.windows.retain(|w| *w != window_id);
                !(entry.windows.len() != bound && entry.windows.is_empty())
            });
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            debug!(window_id, removed, "Removed entries for closed window");
        }
        removed
    }

    /// Remove all time-limited entries that ran out.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, list| {
            let before = list.len();
            list.retain(|entry| !entry.is_expired(now));
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            debug!(removed, "Cleaned up expired entries");
        }
        removed
    }

    /// Iterate over all entries with their cache key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries
            .iter()
            .flat_map(|(key, list)| list.iter().map(move |entry| (key.as_str(), entry)))
    }

    /// Total number of entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if any entry exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::thread::sleep;

    const KEY: &str = "http-www.example.com";

    fn login(url: &str, user: &str, pass: &str) -> AuthInfo {
        AuthInfo::new(url).with_login(user, pass)
    }

    #[test]
    fn lookup_empty_cache() {
        let mut cache = CredentialCache::new();
        assert!(cache.lookup(KEY, &AuthInfo::new("http://www.example.com")).is_none());
    }

    #[test]
    fn upsert_then_lookup_by_realm() {
        let mut cache = CredentialCache::new();
        cache.upsert(
            KEY,
            login("http://www.example.com", "toto", "foobar").with_realm("WallyWorld"),
            0,
            1,
            false,
        );

        let query = AuthInfo::new("http://www.example.com").with_realm("WallyWorld");
        let entry = cache.lookup(KEY, &query).expect("entry should exist");
        assert_eq!(entry.info.username, "toto");
        assert_eq!(entry.info.password.expose_secret(), "foobar");
        assert_eq!(entry.seq_nr, 1);

        let other_realm = AuthInfo::new("http://www.example.com").with_realm("Elsewhere");
        assert!(cache.lookup(KEY, &other_realm).is_none());
    }

    #[test]
    fn lookup_filters_on_username() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);

        let mut query = AuthInfo::new("http://www.example.com");
        query.username = "someone-else".to_string();
        assert!(cache.lookup(KEY, &query).is_none());

        query.username = "toto".to_string();
        assert!(cache.lookup(KEY, &query).is_some());
    }

    #[test]
    fn verify_path_matches_prefix() {
        let mut cache = CredentialCache::new();
        cache.upsert(
            KEY,
            login("http://www.example.com/test/test.html", "toto", "foobar"),
            0,
            1,
            false,
        );

        let mut query = AuthInfo::new("http://www.example.com/test/test2/test.html");
        query.verify_path = true;
        assert!(cache.lookup(KEY, &query).is_some());

        query.url = "http://www.example.com/other/file".to_string();
        assert!(cache.lookup(KEY, &query).is_none());
    }

    #[test]
    fn longest_directory_wins() {
        let mut cache = CredentialCache::new();
        cache.upsert(
            KEY,
            login("http://www.example.com/a/", "short", "1").with_realm("r1"),
            0,
            1,
            false,
        );
        cache.upsert(
            KEY,
            login("http://www.example.com/a/b/c/", "long", "2").with_realm("r2"),
            0,
            2,
            false,
        );

        let mut query = AuthInfo::new("http://www.example.com/a/b/c/d.html");
        query.verify_path = true;
        assert_eq!(cache.lookup(KEY, &query).unwrap().info.username, "long");
    }

    #[test]
    fn upsert_same_realm_replaces_and_keeps_windows() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "one"), 42, 1, false);
        let entry = cache.upsert(KEY, login("http://www.example.com", "toto", "two"), 43, 2, false);

        assert_eq!(cache.len(), 1);
        assert_eq!(entry.expire, ExpirePolicy::UntilWindowClose);
        assert_eq!(entry.windows, vec![42, 43]);
        assert_eq!(entry.info.password.expose_secret(), "two");
        assert_eq!(entry.seq_nr, 2);
    }

    #[test]
    fn expire_policy_rules() {
        let mut cache = CredentialCache::new();

        let mut kept = login("http://kept.example.com", "a", "b");
        kept.keep_password = true;
        assert_eq!(cache.upsert("http-kept", kept.clone(), 0, 1, false).expire, ExpirePolicy::Never);
        // A window does not demote a permanent entry.
        let entry = cache.upsert("http-kept", kept.clone(), 5, 2, false);
        assert_eq!(entry.expire, ExpirePolicy::Never);
        assert!(entry.windows.is_empty());

        // A canceled entry is never kept.
        assert_eq!(
            cache.upsert("http-canceled", kept, 0, 1, true).expire,
            ExpirePolicy::TimeToLive
        );

        let windowed = cache.upsert("http-win", login("http://win", "a", "b"), 7, 1, false);
        assert_eq!(windowed.expire, ExpirePolicy::UntilWindowClose);

        let ttl = cache.upsert("http-ttl", login("http://ttl", "a", "b"), 0, 1, false);
        assert_eq!(ttl.expire, ExpirePolicy::TimeToLive);
        assert!(ttl.expire_at.is_some());
    }

    #[test]
    fn ttl_entries_expire_on_lookup() {
        let mut cache = CredentialCache::with_grace_period(Duration::from_millis(50));
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);
        let query = AuthInfo::new("http://www.example.com");
        assert!(cache.lookup(KEY, &query).is_some());

        sleep(Duration::from_millis(100));

        assert!(cache.lookup(KEY, &query).is_none());
        assert!(!cache.contains_key(KEY));
    }

    #[test]
    fn refresh_extends_ttl() {
        let mut cache = CredentialCache::with_grace_period(Duration::from_millis(200));
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);

        sleep(Duration::from_millis(120));
        cache.refresh(KEY, "", 0);
        sleep(Duration::from_millis(120));

        assert!(cache.lookup(KEY, &AuthInfo::new("http://www.example.com")).is_some());
    }

    #[test]
    fn refresh_binds_window() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);
        cache.refresh(KEY, "", 9);

        let entry = cache.lookup(KEY, &AuthInfo::new("http://www.example.com")).unwrap();
        assert_eq!(entry.expire, ExpirePolicy::UntilWindowClose);
        assert_eq!(entry.windows, vec![9]);
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);

        assert_eq!(cache.remove(KEY, "other-realm"), 0);
        assert_eq!(cache.remove(KEY, ""), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.remove(KEY, ""), 0);
    }

    #[test]
    fn remove_matching_by_host_protocol_user() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "1").with_realm("a"), 0, 1, false);
        cache.upsert(KEY, login("http://www.example.com", "titi", "2").with_realm("b"), 0, 1, false);
        cache.upsert("ftp-www.example.com", login("ftp://www.example.com", "toto", "3"), 0, 1, false);

        assert_eq!(cache.remove_matching("www.example.com", "http", "toto"), 1);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.remove_matching("www.example.com", "http", ""), 1);
        assert!(!cache.contains_key(KEY));
        assert!(cache.contains_key("ftp-www.example.com"));
    }

    #[test]
    fn remove_matching_ignores_host_case() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://WWW.Example.com", "toto", "1"), 0, 1, false);

        assert_eq!(cache.remove_matching("www.EXAMPLE.com", "HTTP", "toto"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_for_window_unbinds_then_deletes() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 1, 1, false);
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 2, 2, false);

        assert_eq!(cache.remove_for_window(1), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove_for_window(2), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_for_window_ignores_other_policies() {
        let mut cache = CredentialCache::new();
        let mut kept = login("http://www.example.com", "toto", "foobar");
        kept.keep_password = true;
        cache.upsert(KEY, kept, 0, 1, false);

        assert_eq!(cache.remove_for_window(1), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cleanup_expired_entries() {
        let mut cache = CredentialCache::with_grace_period(Duration::from_millis(50));
        cache.upsert("http-short", login("http://short", "a", "b"), 0, 1, false);
        cache.upsert("http-win", login("http://win", "a", "b"), 3, 1, false);

        sleep(Duration::from_millis(100));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("http-win"));
    }

    #[test]
    fn lookup_returns_copy() {
        let mut cache = CredentialCache::new();
        cache.upsert(KEY, login("http://www.example.com", "toto", "foobar"), 0, 1, false);

        let mut entry = cache.lookup(KEY, &AuthInfo::new("http://www.example.com")).unwrap();
        entry.info.username = "mutated".to_string();

        let again = cache.lookup(KEY, &AuthInfo::new("http://www.example.com")).unwrap();
        assert_eq!(again.info.username, "toto");
    }
}
