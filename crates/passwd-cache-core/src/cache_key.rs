//! Cache key derivation.
//!
//! Every credential is filed under a key built from the URL it was requested
//! for: `scheme "-" [user "@"] host [":" port]`. The user part is only present
//! when the URL itself carried one, and the port only when it was given
//! explicitly. The user part is percent-decoded. A port equal to the scheme's
//! default is dropped by URL normalization, so `http://host:80` and
//! `http://host` share a key.
//!
//! # Example
//!
//! ```
//! use passwd_cache_core::cache_key::create_cache_key;
//!
//! assert_eq!(create_cache_key("http://www.example.com").unwrap(), "http-www.example.com");
//! assert_eq!(
//!     create_cache_key("smb://toto@fileserver:1445/share").unwrap(),
//!     "smb-toto@fileserver:1445"
//! );
//! ```

use thiserror::Error;
use url::Url;

/// Errors produced while deriving a cache key.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The request URL could not be parsed.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL cannot carry a username.
    #[error("URL {0:?} cannot carry a username")]
    CannotHaveUsername(String),
}

fn parse(url: &str) -> Result<Url, KeyError> {
    Url::parse(url).map_err(|source| KeyError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

fn decoded_username(url: &Url) -> String {
    let raw = url.username();
    urlencoding::decode(raw)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Derive the cache key for a URL.
pub fn create_cache_key(url: &str) -> Result<String, KeyError> {
    let url = parse(url)?;

    let mut key = String::from(url.scheme());
    key.push('-');
    let username = decoded_username(&url);
    if !username.is_empty() {
        key.push_str(&username);
        key.push('@');
    }
    key.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    Ok(key)
}

/// The percent-decoded username embedded in a URL, or an empty string.
///
/// Unparseable URLs have no username.
pub fn url_username(url: &str) -> String {
    Url::parse(url)
        .map(|u| decoded_username(&u))
        .unwrap_or_default()
}

/// The path component of a URL. Unparseable URLs have an empty path.
pub fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

/// Replace the username embedded in a URL.
pub fn with_username(url: &str, username: &str) -> Result<String, KeyError> {
    let mut parsed = parse(url)?;
    parsed
        .set_username(username)
        .map_err(|()| KeyError::CannotHaveUsername(url.to_string()))?;
    Ok(parsed.to_string())
}

/// Truncate a path after its last `/`.
///
/// `/test/test.html` becomes `/test/`; a path without a slash becomes empty.
pub fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Key of the secret store slot for a cache key and realm.
pub fn wallet_key(key: &str, realm: &str) -> String {
    if realm.is_empty() {
        key.to_string()
    } else {
        format!("{}-{}", key, realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_without_user_or_port() {
        assert_eq!(
            create_cache_key("http://www.example.com/test/test.html").unwrap(),
            "http-www.example.com"
        );
    }

    #[test]
    fn key_includes_url_username() {
        assert_eq!(
            create_cache_key("http://foo@www.example.com").unwrap(),
            "http-foo@www.example.com"
        );
    }

    #[test]
    fn key_includes_explicit_port() {
        assert_eq!(
            create_cache_key("ftp://ftp.example.com:2121/pub").unwrap(),
            "ftp-ftp.example.com:2121"
        );
    }

    #[test]
    fn default_port_is_normalized_away() {
        assert_eq!(create_cache_key("http://www.example.com:80/").unwrap(), "http-www.example.com");
        assert_eq!(
            create_cache_key("http://www.example.com:8080/").unwrap(),
            "http-www.example.com:8080"
        );
    }

    #[test]
    fn encoded_username_is_decoded() {
        let url = "imap://john%40example.com@mail.example.com/";
        assert_eq!(url_username(url), "john@example.com");
        assert_eq!(
            create_cache_key(url).unwrap(),
            "imap-john@example.com@mail.example.com"
        );

        // Setting the name encodes it again.
        let renamed = with_username("imap://mail.example.com/", "jane@example.com").unwrap();
        assert_eq!(url_username(&renamed), "jane@example.com");
        assert_eq!(create_cache_key(&renamed).unwrap(), "imap-jane@example.com@mail.example.com");
    }

    #[test]
    fn key_for_url_without_host() {
        assert_eq!(create_cache_key("file:///tmp/a").unwrap(), "file-");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = create_cache_key("not a url").unwrap_err();
        assert!(matches!(err, KeyError::InvalidUrl { .. }));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn username_helpers() {
        assert_eq!(url_username("http://foo@www.example.com/"), "foo");
        assert_eq!(url_username("http://www.example.com/"), "");
        assert_eq!(url_username("::"), "");

        let renamed = with_username("http://foo@www.example.com/a", "bar").unwrap();
        assert_eq!(url_username(&renamed), "bar");
        assert_eq!(create_cache_key(&renamed).unwrap(), "http-bar@www.example.com");
    }

    #[test]
    fn directory_prefix() {
        assert_eq!(directory_of("/test/test.html"), "/test/");
        assert_eq!(directory_of("/test/"), "/test/");
        assert_eq!(directory_of("/"), "/");
        assert_eq!(directory_of("nopath"), "");
        assert_eq!(url_path("http://www.example.com/test/test2/test.html"), "/test/test2/test.html");
    }

    #[test]
    fn wallet_key_appends_realm() {
        assert_eq!(wallet_key("http-www.example.com", ""), "http-www.example.com");
        assert_eq!(
            wallet_key("http-www.example.com", "WallyWorld"),
            "http-www.example.com-WallyWorld"
        );
    }
}
