//! Core types for passwd-cache.
//!
//! This module contains the data structures shared by the cache, the request
//! router and the wire protocol: the [`AuthInfo`] credential record, the
//! identifiers used to correlate requests and windows, and the configuration
//! handed to an interaction backend when a dialog has to be shown.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Identifier of the window that owns a request. `0` means "no window".
pub type WindowId = i64;

/// Server-wide sequence number used to detect stale callers.
pub type SeqNr = i64;

/// Identifier correlating an asynchronous request with its result.
pub type RequestId = i64;

/// Error message that marks a query as non-interactive.
///
/// A query carrying this message is ordered with the other queries and may be
/// answered from the cache, but never opens a dialog.
pub const NO_AUTH_PROMPT: &str = "<NoAuthPrompt>";

/// Names of the extra fields understood by the server.
pub mod extra_field {
    /// Authentication domain, shown and editable in the dialog.
    pub const DOMAIN: &str = "domain";
    /// Offer anonymous login in the dialog.
    pub const ANONYMOUS: &str = "anonymous";
    /// Never consult or update the cache or the secret store.
    pub const BYPASS_CACHE_AND_WALLET: &str = "bypass-cache-and-wallet";
    /// Do not write an accepted credential to the secret store.
    pub const SKIP_CACHING_ON_QUERY: &str = "skip-caching-on-query";
    /// Hide the username input in the dialog.
    pub const HIDE_USERNAME_INPUT: &str = "hide-username-line";
    /// Help text for the username input.
    pub const USERNAME_CONTEXT_HELP: &str = "username-context-help";
}

/// A credential, or a query for one.
///
/// The same record is used for the caller's query, for the value stored in
/// the cache and for the reply. `modified` is only meaningful in a reply:
/// `true` means "use this credential", `false` means nothing usable was found
/// or the user declined.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// The URL the credential is for. Parsed on use.
    pub url: String,

    /// The username.
    #[serde(default)]
    pub username: String,

    /// The password. Serialized as a plain string for IPC.
    #[serde(
        default = "empty_secret",
        serialize_with = "crate::protocol::serialize_secret",
        deserialize_with = "crate::protocol::deserialize_secret"
    )]
    pub password: SecretString,

    /// Text shown above the dialog inputs.
    #[serde(default)]
    pub prompt: String,

    /// Dialog window title.
    #[serde(default)]
    pub caption: String,

    /// Additional comment line shown in the dialog.
    #[serde(default)]
    pub comment: String,

    /// Label for the comment line.
    #[serde(default)]
    pub comment_label: String,

    /// Authentication realm declared by the server.
    #[serde(default)]
    pub realm: String,

    /// Match cached entries by path prefix instead of realm.
    #[serde(default)]
    pub verify_path: bool,

    /// The username must not be changed in the dialog.
    #[serde(default)]
    pub read_only: bool,

    /// Keep the password beyond the lifetime of the requesting window.
    #[serde(default)]
    pub keep_password: bool,

    /// Whether the reply carries a usable credential.
    #[serde(default)]
    pub modified: bool,

    /// Protocol specific fields (see [`extra_field`]).
    #[serde(default)]
    pub extra_fields: BTreeMap<String, serde_json::Value>,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl AuthInfo {
    /// Create an empty query for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the username and password.
    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = SecretString::from(password.into());
        self
    }

    /// Set the realm.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Whether a password is present.
    pub fn has_password(&self) -> bool {
        !self.password.expose_secret().is_empty()
    }

    /// Get an extra field, if set.
    pub fn extra_field(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra_fields.get(name)
    }

    /// Get an extra field as a flag. Missing or non-boolean fields read as `false`.
    pub fn extra_flag(&self, name: &str) -> bool {
        self.extra_field(name)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Set an extra field.
    pub fn set_extra_field(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.extra_fields.insert(name.to_string(), value.into());
    }

    /// Whether this request must skip the cache and the secret store.
    pub fn bypasses_cache(&self) -> bool {
        self.extra_flag(extra_field::BYPASS_CACHE_AND_WALLET)
    }
}

impl Default for AuthInfo {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: empty_secret(),
            prompt: String::new(),
            caption: String::new(),
            comment: String::new(),
            comment_label: String::new(),
            realm: String::new(),
            verify_path: false,
            read_only: false,
            keep_password: false,
            modified: false,
            extra_fields: BTreeMap::new(),
        }
    }
}

// Manual Debug implementation to avoid exposing the password
impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("realm", &self.realm)
            .field("verify_path", &self.verify_path)
            .field("keep_password", &self.keep_password)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// How long a cached credential stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirePolicy {
    /// Kept until explicitly removed.
    Never,
    /// Kept until every window bound to it has closed.
    UntilWindowClose,
    /// Kept for a short grace period after its last use.
    TimeToLive,
}

impl std::fmt::Display for ExpirePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpirePolicy::Never => write!(f, "never"),
            ExpirePolicy::UntilWindowClose => write!(f, "window"),
            ExpirePolicy::TimeToLive => write!(f, "ttl"),
        }
    }
}

/// Which public operation produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Cache-only lookup, never prompts.
    Check,
    /// Lookup that may prompt the user.
    Query,
}

/// The result of a check or query.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The id handed out when the request was made.
    pub request_id: RequestId,
    /// Which operation this answers.
    pub kind: RequestKind,
    /// The server sequence number at the time of the reply.
    pub seq_nr: SeqNr,
    /// The credential; `info.modified` tells whether it is usable.
    pub info: AuthInfo,
}

impl AuthResult {
    /// Whether the reply carries a usable credential.
    pub fn is_modified(&self) -> bool {
        self.info.modified
    }
}

/// Configuration for a credential dialog.
///
/// Built by the server from the query and any stored logins, and handed to
/// the interaction backend.
#[derive(Clone)]
pub struct PromptConfig {
    /// Text shown above the inputs.
    pub prompt: String,
    /// Window title.
    pub caption: String,
    /// Optional comment line.
    pub comment: String,
    /// Label of the comment line.
    pub comment_label: String,
    /// Pre-filled username.
    pub username: String,
    /// Pre-filled password.
    pub password: SecretString,
    /// The username cannot be edited.
    pub username_read_only: bool,
    /// Show the username input.
    pub show_username: bool,
    /// Usernames known to the secret store for this credential.
    pub known_logins: Vec<String>,
    /// Offer the "keep password" checkbox.
    pub show_keep_password: bool,
    /// Initial state of the "keep password" checkbox.
    pub keep_password: bool,
    /// Domain input, when the protocol uses one.
    pub domain: Option<String>,
    /// Anonymous login checkbox, when offered.
    pub anonymous: Option<bool>,
    /// Help text for the username input.
    pub username_context_help: Option<String>,
    /// The window the dialog belongs to.
    pub window_id: WindowId,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            caption: "Authentication Dialog".to_string(),
            comment: String::new(),
            comment_label: String::new(),
            username: String::new(),
            password: empty_secret(),
            username_read_only: false,
            show_username: true,
            known_logins: Vec::new(),
            show_keep_password: false,
            keep_password: false,
            domain: None,
            anonymous: None,
            username_context_help: None,
            window_id: 0,
        }
    }
}

impl std::fmt::Debug for PromptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptConfig")
            .field("prompt", &self.prompt)
            .field("caption", &self.caption)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("username_read_only", &self.username_read_only)
            .field("known_logins", &self.known_logins)
            .field("keep_password", &self.keep_password)
            .field("window_id", &self.window_id)
            .finish_non_exhaustive()
    }
}

/// Values entered by the user in a credential dialog.
#[derive(Clone)]
pub struct PromptResponse {
    /// The username entered.
    pub username: String,
    /// The password entered.
    pub password: SecretString,
    /// Whether "keep password" was checked.
    pub keep_password: bool,
    /// Domain, if the dialog showed one.
    pub domain: Option<String>,
    /// Anonymous mode, if the dialog offered it.
    pub anonymous: Option<bool>,
}

impl PromptResponse {
    /// Create a response with the given login and "keep password" unchecked.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            keep_password: false,
            domain: None,
            anonymous: None,
        }
    }
}

// Manual Debug implementation to avoid exposing the secret
impl std::fmt::Debug for PromptResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptResponse")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("keep_password", &self.keep_password)
            .finish_non_exhaustive()
    }
}

/// Configuration for the "try again?" dialog shown after a rejected credential.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// The rejection message followed by the retry question.
    pub message: String,
    /// The window the dialog belongs to.
    pub window_id: WindowId,
}

impl RetryConfig {
    /// Build the retry question for a rejection message.
    pub fn for_error(error_message: &str, window_id: WindowId) -> Self {
        Self {
            message: format!("{}\nDo you want to retry?", error_message.trim()),
            window_id,
        }
    }
}

/// Convert a number of seconds to an optional duration, `0` meaning "none".
pub fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_info_new_is_empty() {
        let info = AuthInfo::new("http://www.example.com");
        assert_eq!(info.url, "http://www.example.com");
        assert!(info.username.is_empty());
        assert!(!info.has_password());
        assert!(!info.modified);
    }

    #[test]
    fn auth_info_debug_redacts_password() {
        let info = AuthInfo::new("http://www.example.com").with_login("toto", "foobar");
        let debug_output = format!("{:?}", info);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("foobar"));
        assert!(debug_output.contains("toto"));
    }

    #[test]
    fn extra_flag_reads_booleans_only() {
        let mut info = AuthInfo::new("smb://fileserver");
        info.set_extra_field(extra_field::BYPASS_CACHE_AND_WALLET, true);
        info.set_extra_field(extra_field::DOMAIN, "WORKGROUP");

        assert!(info.bypasses_cache());
        assert!(!info.extra_flag(extra_field::DOMAIN));
        assert!(!info.extra_flag(extra_field::ANONYMOUS));
    }

    #[test]
    fn auth_info_minimal_json() {
        let info: AuthInfo = serde_json::from_str(r#"{"url": "ftp://host"}"#).unwrap();
        assert_eq!(info.url, "ftp://host");
        assert!(!info.has_password());
        assert!(info.extra_fields.is_empty());
    }

    #[test]
    fn expire_policy_display() {
        assert_eq!(ExpirePolicy::Never.to_string(), "never");
        assert_eq!(ExpirePolicy::UntilWindowClose.to_string(), "window");
        assert_eq!(ExpirePolicy::TimeToLive.to_string(), "ttl");
    }

    #[test]
    fn retry_config_appends_question() {
        let config = RetryConfig::for_error("  Invalid username or password \n", 42);
        assert_eq!(
            config.message,
            "Invalid username or password\nDo you want to retry?"
        );
        assert_eq!(config.window_id, 42);
    }

    #[test]
    fn prompt_response_debug_redacts_password() {
        let response = PromptResponse::new("dfaure", "super-secret-password");
        let debug_output = format!("{:?}", response);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super-secret-password"));
    }

    #[test]
    fn optional_secs_zero_is_none() {
        assert_eq!(optional_secs(0), None);
        assert_eq!(optional_secs(30), Some(Duration::from_secs(30)));
    }
}
