use std::sync::Arc;
use std::time::Duration;

use passwd_cache_core::cache_key::url_username;
use passwd_cache_core::types::{extra_field, NO_AUTH_PROMPT};
use passwd_cache_core::{
    create_cache_key, AuthInfo, ExpirePolicy, PromptResponse, RequestKind, SecretStore,
    StoredLogin,
};
use secrecy::{ExposeSecret, SecretString};

use super::*;
use crate::prompt::MockInteraction;
use crate::store::MemorySecretStore;

const URL: &str = "http://www.example.com";
const WINDOW: WindowId = 42;

fn start(mock: &Arc<MockInteraction>) -> PasswdServer {
    start_with(mock, None, ServerSettings::default())
}

fn start_with(
    mock: &Arc<MockInteraction>,
    store: Option<Arc<MemorySecretStore>>,
    settings: ServerSettings,
) -> PasswdServer {
    let store = store.map(|s| s as Arc<dyn SecretStore>);
    let (server, _task) = PasswdServer::spawn(mock.clone(), store, settings);
    server
}

fn login(url: &str, username: &str, password: &str) -> AuthInfo {
    AuthInfo::new(url).with_login(username, password)
}

fn assert_login(info: &AuthInfo, username: &str, password: &str) {
    assert_eq!(info.username, username);
    assert_eq!(info.password.expose_secret(), password);
}

async fn wait_for_dialogs(mock: &MockInteraction, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while mock.credential_calls() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dialog was never shown");
}

#[tokio::test]
async fn check_on_empty_cache_is_unmodified() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);

    let result = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(!result.is_modified());
    assert_eq!(result.kind, RequestKind::Check);
    assert_eq!(result.seq_nr, 0);
    assert_eq!(mock.credential_calls(), 0);
}

#[tokio::test]
async fn add_then_check() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);

    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    let result = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "foobar");
    assert_eq!(result.seq_nr, 1);

    // Checking again changes nothing.
    let again = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(again.is_modified());
    assert_eq!(again.seq_nr, 1);
    assert_eq!(mock.credential_calls(), 0);
}

#[tokio::test]
async fn query_without_prompt_after_add() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    // The caller already used the cached credential.
    let result = server
        .query_auth_info(AuthInfo::new(URL), NO_AUTH_PROMPT, WINDOW, 2)
        .await
        .unwrap();
    assert!(!result.is_modified());
    assert_eq!(result.kind, RequestKind::Query);
    assert_eq!(result.seq_nr, 2);
    assert_eq!(mock.credential_calls(), 0);
}

#[tokio::test]
async fn stale_query_gets_newer_credential() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    let result = server
        .query_auth_info(AuthInfo::new(URL), "Invalid password", WINDOW, 0)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "foobar");
    assert_eq!(mock.credential_calls(), 0);
    assert_eq!(mock.retry_calls(), 0);
}

#[tokio::test]
async fn query_fills_dialog_and_caches() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar"));
    let server = start(&mock);

    let result = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "foobar");
    assert_eq!(result.seq_nr, 1);
    assert_eq!(mock.credential_calls(), 1);

    let configs = mock.prompt_configs();
    assert_eq!(configs[0].window_id, WINDOW);
    assert_eq!(configs[0].caption, "Authentication Dialog");

    let check = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(check.is_modified());
    assert_login(&check.info, "toto", "foobar");
}

#[tokio::test]
async fn cancelled_dialog_returns_query_unchanged() {
    let mock = Arc::new(MockInteraction::cancelled());
    let server = start(&mock);

    let result = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!result.is_modified());
    assert!(result.info.username.is_empty());
    assert!(result.info.password.expose_secret().is_empty());
}

#[tokio::test]
async fn cancelled_dialog_suppresses_stale_queries() {
    let mock = Arc::new(MockInteraction::cancelled());
    let server = start(&mock);

    let first = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!first.is_modified());

    // A caller that has not seen the cancellation gets it without a dialog.
    let second = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!second.is_modified());
    assert_eq!(mock.credential_calls(), 1);

    let check = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(!check.is_modified());
}

#[tokio::test]
async fn reject_then_accept() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").then_cancel());
    let server = start(&mock);

    let rejected = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!rejected.is_modified());

    let accepted = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, rejected.seq_nr)
        .await
        .unwrap();
    assert!(accepted.is_modified());
    assert_login(&accepted.info, "toto", "foobar");
    assert_eq!(mock.credential_calls(), 2);
}

#[tokio::test]
async fn retry_accepted_shows_password_dialog() {
    let mock = Arc::new(MockInteraction::with_login("toto", "newpass").then_retry(true));
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    let result = server
        .query_auth_info(AuthInfo::new(URL), "Invalid password\n", WINDOW, 1)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "newpass");
    assert_eq!(mock.retry_calls(), 1);
    assert_eq!(mock.credential_calls(), 1);
    assert_eq!(
        mock.retry_configs()[0].message,
        "Invalid password\nDo you want to retry?"
    );

    let check = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert_login(&check.info, "toto", "newpass");
}

#[tokio::test]
async fn retry_declined_forgets_credential() {
    let mock = Arc::new(MockInteraction::default().then_retry(false));
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    let result = server
        .query_auth_info(AuthInfo::new(URL), "Invalid password", WINDOW, 1)
        .await
        .unwrap();
    assert!(!result.is_modified());
    assert_eq!(mock.credential_calls(), 0);

    let check = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(!check.is_modified());
}

#[tokio::test]
async fn username_change_moves_credential() {
    let mock = Arc::new(MockInteraction::with_login("bar", "foobar"));
    let server = start(&mock);

    let result = server
        .query_auth_info(AuthInfo::new("http://foo@www.example.com"), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_eq!(result.info.username, "bar");
    assert_eq!(url_username(&result.info.url), "bar");
    assert_eq!(mock.prompt_configs()[0].username, "foo");

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].cache_key,
        create_cache_key("http://bar@www.example.com").unwrap()
    );

    let old = server
        .check_auth_info(AuthInfo::new("http://foo@www.example.com"), WINDOW)
        .await
        .unwrap();
    assert!(!old.is_modified());
    let new = server
        .check_auth_info(AuthInfo::new("http://bar@www.example.com"), WINDOW)
        .await
        .unwrap();
    assert_login(&new.info, "bar", "foobar");
}

#[tokio::test]
async fn encoded_url_username_matches_cached_login() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    let url = "imap://john%40example.com@mail.example.com";
    server
        .add_auth_info(login(url, "john@example.com", "secret"), WINDOW)
        .await
        .unwrap();

    let result = server
        .query_auth_info(AuthInfo::new(url), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "john@example.com", "secret");
    assert_eq!(mock.credential_calls(), 0);
}

#[tokio::test]
async fn encoded_url_username_is_not_an_identity_switch() {
    let mock = Arc::new(MockInteraction::with_login("john@example.com", "secret"));
    let server = start(&mock);
    let url = "imap://john%40example.com@mail.example.com";

    let result = server
        .query_auth_info(AuthInfo::new(url), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(result.is_modified());
    assert_eq!(mock.prompt_configs()[0].username, "john@example.com");
    assert_eq!(url_username(&result.info.url), "john@example.com");

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].cache_key, "imap-john@example.com@mail.example.com");
}

#[tokio::test]
async fn username_change_onto_open_dialog_keeps_its_guard() {
    let mock = Arc::new(
        MockInteraction::with_login("bar", "third")
            .then_delayed_login("bar", "early", Duration::from_millis(50))
            .then_delayed_login("bar", "late", Duration::from_millis(400)),
    );
    let server = start(&mock);

    let renamed = server
        .query_auth_info_async(AuthInfo::new("http://foo@host.example.com"), "", 1, 0)
        .unwrap();
    wait_for_dialogs(&mock, 1).await;
    let holder = server
        .query_auth_info_async(AuthInfo::new("http://bar@host.example.com"), "", 2, 0)
        .unwrap();
    wait_for_dialogs(&mock, 2).await;

    let first = renamed.wait().await.unwrap();
    assert_login(&first.info, "bar", "early");

    let third = server
        .query_auth_info_async(AuthInfo::new("http://bar@host.example.com"), "", 3, 100)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.credential_calls(), 2, "second dialog opened for a key in use");

    let second = holder.wait().await.unwrap();
    assert_login(&second.info, "bar", "late");
    let last = third.wait().await.unwrap();
    assert_login(&last.info, "bar", "third");
    assert_eq!(mock.credential_calls(), 3);
}

#[tokio::test]
async fn verify_path_matches_subdirectories() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login("http://www.example.com/test/test.html", "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    let mut below = AuthInfo::new("http://www.example.com/test/test2/test.html");
    below.verify_path = true;
    let result = server.check_auth_info(below, WINDOW).await.unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "foobar");

    let mut elsewhere = AuthInfo::new("http://www.example.com/other/test.html");
    elsewhere.verify_path = true;
    let result = server.check_auth_info(elsewhere, WINDOW).await.unwrap();
    assert!(!result.is_modified());
}

#[tokio::test]
async fn check_waits_for_pending_query() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_millis(50)));
    let server = start(&mock);

    let query = server
        .query_auth_info_async(AuthInfo::new(URL), "", WINDOW, 0)
        .unwrap();
    let check = server.check_auth_info_async(AuthInfo::new(URL), WINDOW).unwrap();
    assert_eq!(check.request_id(), query.request_id() + 1);

    let query = query.wait().await.unwrap();
    let check = check.wait().await.unwrap();
    assert!(query.is_modified());
    assert!(check.is_modified());
    assert_login(&check.info, "toto", "foobar");
    assert_eq!(check.request_id, query.request_id + 1);
    assert_eq!(mock.credential_calls(), 1);
}

#[tokio::test]
async fn checks_during_open_dialog_get_result() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_millis(100)));
    let server = start(&mock);

    let query = server
        .query_auth_info_async(AuthInfo::new(URL), "", WINDOW, 0)
        .unwrap();
    wait_for_dialogs(&mock, 1).await;

    let mut checks = Vec::new();
    for window in 1..=3 {
        checks.push(server.check_auth_info_async(AuthInfo::new(URL), window).unwrap());
    }
    for check in checks.iter_mut() {
        assert!(check.try_take().is_none());
    }

    assert!(query.wait().await.unwrap().is_modified());
    for check in checks {
        let result = check.wait().await.unwrap();
        assert!(result.is_modified());
        assert_login(&result.info, "toto", "foobar");
    }
}

#[tokio::test]
async fn concurrent_queries_share_one_dialog() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar"));
    let server = start(&mock);

    let mut replies = Vec::new();
    for i in 0..10 {
        let info = AuthInfo::new(format!("http://www.example.com/test{}.html", i));
        replies.push(server.query_auth_info_async(info, "", WINDOW, 0).unwrap());
    }

    for reply in replies {
        let result = reply.wait().await.unwrap();
        assert!(result.is_modified());
        assert_login(&result.info, "toto", "foobar");
    }
    assert_eq!(mock.credential_calls(), 1);
}

#[tokio::test]
async fn queries_from_different_windows_are_serialized() {
    let mock = Arc::new(
        MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_millis(20)),
    );
    let server = start(&mock);

    let a = server
        .query_auth_info_async(AuthInfo::new(URL), "", 1, 0)
        .unwrap();
    let b = server
        .query_auth_info_async(AuthInfo::new(URL), "", 2, 0)
        .unwrap();

    assert!(a.wait().await.unwrap().is_modified());
    assert!(b.wait().await.unwrap().is_modified());
    assert_eq!(mock.credential_calls(), 1);

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries[0].expire, ExpirePolicy::UntilWindowClose);
    assert_eq!(entries[0].windows, vec![1, 2]);
}

#[tokio::test]
async fn window_removal_expires_credentials() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();

    assert_eq!(server.remove_auth_for_window(7).await.unwrap(), 0);
    assert!(server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap().is_modified());

    assert_eq!(server.remove_auth_for_window(WINDOW).await.unwrap(), 1);
    assert!(!server.check_auth_info(AuthInfo::new(URL), 0).await.unwrap().is_modified());
}

#[tokio::test]
async fn windowless_credentials_expire_after_grace_period() {
    let mock = Arc::new(MockInteraction::default());
    let settings = ServerSettings {
        grace_period: Duration::from_millis(100),
        ..ServerSettings::default()
    };
    let server = start_with(&mock, None, settings);
    server.add_auth_info(login(URL, "toto", "foobar"), 0).await.unwrap();

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries[0].expire, ExpirePolicy::TimeToLive);
    assert!(server.check_auth_info(AuthInfo::new(URL), 0).await.unwrap().is_modified());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!server.check_auth_info(AuthInfo::new(URL), 0).await.unwrap().is_modified());
    assert!(server.list_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn kept_password_without_window_never_expires() {
    let mock = Arc::new(MockInteraction::default());
    let settings = ServerSettings {
        grace_period: Duration::from_millis(10),
        ..ServerSettings::default()
    };
    let server = start_with(&mock, None, settings);
    let mut info = login(URL, "toto", "foobar");
    info.keep_password = true;
    server.add_auth_info(info, 0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries[0].expire, ExpirePolicy::Never);
    assert!(server.check_auth_info(AuthInfo::new(URL), 0).await.unwrap().is_modified());
}

#[tokio::test]
async fn closing_window_cancels_its_dialog() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_secs(30)));
    let server = start(&mock);

    let query = server
        .query_auth_info_async(AuthInfo::new(URL), "", WINDOW, 0)
        .unwrap();
    wait_for_dialogs(&mock, 1).await;

    server.window_closed(WINDOW).await.unwrap();
    let result = query.wait().await.unwrap();
    assert!(!result.is_modified());

    // The window's prompt slot is free again.
    let next = tokio::time::timeout(
        Duration::from_secs(5),
        server.query_auth_info(AuthInfo::new(URL), NO_AUTH_PROMPT, WINDOW, 0),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!next.is_modified());
    assert!(server.list_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn closing_window_answers_queued_requests() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_secs(30)));
    let server = start(&mock);

    let first = server
        .query_auth_info_async(AuthInfo::new("http://a.example.com"), "", WINDOW, 0)
        .unwrap();
    wait_for_dialogs(&mock, 1).await;
    let queued = server
        .query_auth_info_async(AuthInfo::new("http://b.example.com"), "", WINDOW, 0)
        .unwrap();

    server.window_closed(WINDOW).await.unwrap();
    assert!(!first.wait().await.unwrap().is_modified());
    assert!(!queued.wait().await.unwrap().is_modified());
    assert_eq!(mock.credential_calls(), 1);
}

#[tokio::test]
async fn dialog_timeout_counts_as_cancel() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_secs(30)));
    let settings = ServerSettings {
        dialog_timeout: Some(Duration::from_millis(50)),
        ..ServerSettings::default()
    };
    let server = start_with(&mock, None, settings);

    let result = server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!result.is_modified());

    let entries = server.list_entries().await.unwrap();
    assert!(entries[0].canceled);
}

#[tokio::test]
async fn bypass_flag_skips_cache() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar"));
    let server = start(&mock);

    let mut info = AuthInfo::new(URL);
    info.set_extra_field(extra_field::BYPASS_CACHE_AND_WALLET, true);

    let result = server.query_auth_info(info.clone(), "", WINDOW, 0).await.unwrap();
    assert!(result.is_modified());
    assert!(server.list_entries().await.unwrap().is_empty());

    server.query_auth_info(info.clone(), "", WINDOW, 0).await.unwrap();
    assert_eq!(mock.credential_calls(), 2);

    let check = server.check_auth_info(info, WINDOW).await.unwrap();
    assert!(!check.is_modified());
}

#[tokio::test]
async fn dialog_shows_domain_and_anonymous_fields() {
    let mut response = PromptResponse::new("toto", "foobar");
    response.domain = Some("CORP".to_string());
    response.anonymous = Some(false);
    let mock = Arc::new(MockInteraction::with_response(response));
    let server = start(&mock);

    let mut info = AuthInfo::new("smb://fileserver/share");
    info.set_extra_field(extra_field::DOMAIN, "WORKGROUP");
    info.set_extra_field(extra_field::ANONYMOUS, true);
    info.set_extra_field(extra_field::HIDE_USERNAME_INPUT, true);

    let result = server.query_auth_info(info, "", WINDOW, 0).await.unwrap();
    assert!(result.is_modified());
    assert_eq!(
        result.info.extra_field(extra_field::DOMAIN).and_then(|v| v.as_str()),
        Some("CORP")
    );
    assert_eq!(
        result.info.extra_field(extra_field::ANONYMOUS).and_then(|v| v.as_bool()),
        Some(false)
    );

    let config = &mock.prompt_configs()[0];
    assert_eq!(config.domain.as_deref(), Some("WORKGROUP"));
    assert_eq!(config.anonymous, Some(true));
    assert!(!config.show_username);
}

#[tokio::test]
async fn remove_auth_info_by_host_and_user() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login("http://toto@www.example.com", "toto", "a"), WINDOW)
        .await
        .unwrap();
    server
        .add_auth_info(login("http://titi@www.example.com", "titi", "b"), WINDOW)
        .await
        .unwrap();
    server
        .add_auth_info(login("ftp://www.example.com", "toto", "c"), WINDOW)
        .await
        .unwrap();

    let removed = server
        .remove_auth_info("WWW.Example.com", "http", "titi")
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let removed = server
        .remove_auth_info("www.example.com", "http", "")
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].cache_key, "ftp-www.example.com");
}

#[tokio::test]
async fn invalid_url_is_rejected() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);

    let check = server
        .check_auth_info(AuthInfo::new("not a url"), WINDOW)
        .await
        .unwrap();
    assert!(!check.is_modified());

    let query = server
        .query_auth_info(AuthInfo::new("not a url"), "", WINDOW, 0)
        .await
        .unwrap();
    assert!(!query.is_modified());
    assert_eq!(mock.credential_calls(), 0);

    let err = server
        .add_auth_info(login("not a url", "toto", "foobar"), WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::InvalidKey(_)));
}

#[tokio::test]
async fn list_entries_hides_passwords() {
    let mock = Arc::new(MockInteraction::default());
    let server = start(&mock);
    server
        .add_auth_info(login(URL, "toto", "foobar").with_realm("Secure Area"), WINDOW)
        .await
        .unwrap();

    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].username, "toto");
    assert_eq!(entries[0].realm, "Secure Area");
    assert_eq!(entries[0].windows, vec![WINDOW]);
    assert_eq!(entries[0].seq_nr, 1);

    let json = serde_json::to_string(&entries).unwrap();
    assert!(!json.contains("foobar"));
}

#[tokio::test]
async fn check_reads_through_to_store() {
    let mock = Arc::new(MockInteraction::default());
    let store = Arc::new(MemorySecretStore::new());
    store.insert(
        "http-www.example.com",
        StoredLogin::new("toto", SecretString::from("foobar")),
    );
    let server = start_with(&mock, Some(store), ServerSettings::default());

    let result = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(result.is_modified());
    assert_login(&result.info, "toto", "foobar");

    let mut read_only = AuthInfo::new(URL);
    read_only.read_only = true;
    let result = server.check_auth_info(read_only, WINDOW).await.unwrap();
    assert!(!result.is_modified());
}

#[tokio::test]
async fn unavailable_store_is_ignored() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar"));
    let store = Arc::new(MemorySecretStore::unavailable());
    let server = start_with(&mock, Some(store.clone()), ServerSettings::default());

    let check = server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap();
    assert!(!check.is_modified());

    let mut info = AuthInfo::new(URL);
    info.keep_password = true;
    let mut response = PromptResponse::new("toto", "foobar");
    response.keep_password = true;
    let mock = Arc::new(MockInteraction::with_response(response));
    let server = start_with(&mock, Some(store.clone()), ServerSettings::default());

    let result = server.query_auth_info(info, "", 0, 0).await.unwrap();
    assert!(result.is_modified());
    assert_eq!(store.write_count(), 0);

    // Not written to the store, so the cache keeps it for good.
    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries[0].expire, ExpirePolicy::Never);
}

#[tokio::test]
async fn dialog_is_prefilled_from_store() {
    let mock = Arc::new(MockInteraction::with_login("titi", "barfoo"));
    let store = Arc::new(MemorySecretStore::new());
    store.insert(
        "http-www.example.com",
        StoredLogin::new("toto", SecretString::from("foobar")),
    );
    store.insert(
        "http-www.example.com",
        StoredLogin::new("titi", SecretString::from("barfoo")),
    );
    let server = start_with(&mock, Some(store), ServerSettings::default());

    server
        .query_auth_info(AuthInfo::new(URL), "", WINDOW, 0)
        .await
        .unwrap();

    let config = &mock.prompt_configs()[0];
    assert_eq!(config.known_logins, vec!["toto", "titi"]);
    assert_eq!(config.username, "toto");
    assert_eq!(config.password.expose_secret(), "foobar");
    assert!(config.keep_password);
}

#[tokio::test]
async fn kept_password_is_written_to_store() {
    let mut response = PromptResponse::new("toto", "foobar");
    response.keep_password = true;
    let mock = Arc::new(MockInteraction::with_response(response));
    let store = Arc::new(MemorySecretStore::new());
    let server = start_with(&mock, Some(store.clone()), ServerSettings::default());

    let mut info = AuthInfo::new(URL).with_realm("Secure Area");
    info.keep_password = true;
    let result = server.query_auth_info(info, "", WINDOW, 0).await.unwrap();
    assert!(result.is_modified());
    assert!(mock.prompt_configs()[0].show_keep_password);

    assert!(store
        .logins("http-www.example.com-Secure Area")
        .contains("toto", "foobar"));

    // The store holds the long-term copy; the cache follows the window.
    let entries = server.list_entries().await.unwrap();
    assert_eq!(entries[0].expire, ExpirePolicy::UntilWindowClose);
}

#[tokio::test]
async fn skip_caching_flag_keeps_store_untouched() {
    let mut response = PromptResponse::new("toto", "foobar");
    response.keep_password = true;
    let mock = Arc::new(MockInteraction::with_response(response));
    let store = Arc::new(MemorySecretStore::new());
    let server = start_with(&mock, Some(store.clone()), ServerSettings::default());

    let mut info = AuthInfo::new(URL);
    info.keep_password = true;
    info.set_extra_field(extra_field::SKIP_CACHING_ON_QUERY, true);
    let result = server.query_auth_info(info, "", WINDOW, 0).await.unwrap();
    assert!(result.is_modified());
    assert_eq!(store.write_count(), 0);
    assert!(server.check_auth_info(AuthInfo::new(URL), WINDOW).await.unwrap().is_modified());
}

#[tokio::test]
async fn add_writes_to_store() {
    let mock = Arc::new(MockInteraction::default());
    let store = Arc::new(MemorySecretStore::new());
    let server = start_with(&mock, Some(store.clone()), ServerSettings::default());

    server
        .add_auth_info(login(URL, "toto", "foobar"), WINDOW)
        .await
        .unwrap();
    assert_eq!(store.write_count(), 1);
    assert!(store.logins("http-www.example.com").contains("toto", "foobar"));
}

#[tokio::test]
async fn requests_fail_after_shutdown() {
    let mock = Arc::new(MockInteraction::with_login("toto", "foobar").with_delay(Duration::from_secs(30)));
    let (server, task) = PasswdServer::spawn(mock.clone(), None, ServerSettings::default());

    let query = server
        .query_auth_info_async(AuthInfo::new(URL), "", WINDOW, 0)
        .unwrap();
    wait_for_dialogs(&mock, 1).await;

    drop(server);
    task.await.unwrap();
    assert!(matches!(query.wait().await, Err(ServerError::ShutDown)));
}
