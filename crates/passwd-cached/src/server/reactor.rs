//! The request router.
//!
//! A single task owns the credential cache and the pending request tracker
//! and processes commands one at a time, so neither needs a lock. Dialogs run
//! on their own tasks and post their outcome back as a command; secret store
//! I/O is awaited in place, which keeps requests in arrival order.

use std::sync::Arc;
use std::time::Duration;

use passwd_cache_core::cache_key::{url_username, wallet_key, with_username};
use passwd_cache_core::types::{extra_field, NO_AUTH_PROMPT};
use passwd_cache_core::{
    create_cache_key, AuthInfo, AuthResult, CacheEntryInfo, CredentialCache, InteractionController,
    PromptConfig, PromptError, PromptResponse, RequestId, RetryConfig, SecretStore, SeqNr,
    StoredLogin, StoredLogins, WindowId,
};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::pending::{ActiveDialog, AuthRequest, DialogId, DialogStage, PendingRequestTracker};
use super::ServerError;

/// Messages processed by the router task.
pub(crate) enum Command {
    CheckAuthInfo {
        id: RequestId,
        info: AuthInfo,
        window_id: WindowId,
        reply: oneshot::Sender<AuthResult>,
    },
    QueryAuthInfo {
        id: RequestId,
        info: AuthInfo,
        error_message: String,
        window_id: WindowId,
        seq_nr: SeqNr,
        reply: oneshot::Sender<AuthResult>,
    },
    AddAuthInfo {
        info: AuthInfo,
        window_id: WindowId,
        done: oneshot::Sender<Result<(), ServerError>>,
    },
    RemoveAuthInfo {
        host: String,
        protocol: String,
        user: String,
        done: oneshot::Sender<usize>,
    },
    RemoveAuthForWindow {
        window_id: WindowId,
        done: oneshot::Sender<usize>,
    },
    WindowClosed {
        window_id: WindowId,
        done: oneshot::Sender<()>,
    },
    ListEntries {
        reply: oneshot::Sender<Vec<CacheEntryInfo>>,
    },
    ProcessRequest,
    PasswordDialogDone {
        dialog: DialogId,
        result: Result<PromptResponse, PromptError>,
    },
    RetryDialogDone {
        dialog: DialogId,
        retry: bool,
    },
}

pub(crate) struct Reactor {
    cache: CredentialCache,
    tracker: PendingRequestTracker,
    seq_nr: SeqNr,
    interaction: Arc<dyn InteractionController>,
    store: Option<Arc<dyn SecretStore>>,
    dialog_timeout: Option<Duration>,
    cleanup_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::WeakUnboundedSender<Command>,
}

impl Reactor {
    pub fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        loopback: mpsc::WeakUnboundedSender<Command>,
        interaction: Arc<dyn InteractionController>,
        store: Option<Arc<dyn SecretStore>>,
        settings: &super::ServerSettings,
    ) -> Self {
        Self {
            cache: CredentialCache::with_grace_period(settings.grace_period),
            tracker: PendingRequestTracker::new(),
            seq_nr: 0,
            interaction,
            store,
            dialog_timeout: settings.dialog_timeout,
            cleanup_interval: settings.cleanup_interval,
            commands,
            loopback,
        }
    }

    /// Process commands until every handle is gone.
    pub async fn run(mut self) {
        let mut cleanup = tokio::time::interval(self.cleanup_interval);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        cleanup.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = cleanup.tick() => {
                    let removed = self.cache.cleanup_expired();
                    if removed > 0 {
                        debug!(removed, "Periodic cleanup removed expired credentials");
                    }
                }
            }
        }

        let unanswered = self.tracker.drain_all();
        if !unanswered.is_empty() {
            info!(count = unanswered.len(), "Dropping unanswered requests on shutdown");
        }
        debug!("Request router stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::CheckAuthInfo {
                id,
                info,
                window_id,
                reply,
            } => self.check_auth_info(id, info, window_id, reply).await,
            Command::QueryAuthInfo {
                id,
                info,
                error_message,
                window_id,
                seq_nr,
                reply,
            } => self.query_auth_info(id, info, error_message, window_id, seq_nr, reply),
            Command::AddAuthInfo {
                info,
                window_id,
                done,
            } => {
                let result = self.add_auth_info(info, window_id).await;
                let _ = done.send(result);
            }
            Command::RemoveAuthInfo {
                host,
                protocol,
                user,
                done,
            } => {
                let _ = done.send(self.cache.remove_matching(&host, &protocol, &user));
            }
            Command::RemoveAuthForWindow { window_id, done } => {
                let _ = done.send(self.cache.remove_for_window(window_id));
            }
            Command::WindowClosed { window_id, done } => {
                self.window_closed(window_id);
                let _ = done.send(());
            }
            Command::ListEntries { reply } => {
                let _ = reply.send(self.list_entries());
            }
            Command::ProcessRequest => self.process_request().await,
            Command::PasswordDialogDone { dialog, result } => {
                self.password_dialog_done(dialog, result).await
            }
            Command::RetryDialogDone { dialog, retry } => self.retry_dialog_done(dialog, retry).await,
        }
    }

    async fn check_auth_info(
        &mut self,
        id: RequestId,
        mut info: AuthInfo,
        window_id: WindowId,
        reply: oneshot::Sender<AuthResult>,
    ) {
        let key = match create_cache_key(&info.url) {
            Ok(key) => key,
            Err(e) => {
                warn!(request_id = id, error = %e, "Rejecting check with invalid URL");
                info.modified = false;
                AuthRequest::check(id, String::new(), info, window_id, reply).respond(self.seq_nr);
                return;
            }
        };

        let mut request = AuthRequest::check(id, key, info, window_id, reply);
        if self.tracker.has_in_flight(&request.key, &request.info) {
            debug!(request_id = id, key = %request.key, "Check waits for pending query");
            self.tracker.enqueue_waiting(request);
            return;
        }

        if request.info.bypasses_cache() {
            request.info.modified = false;
            request.respond(self.seq_nr);
            return;
        }

        match self.cache.lookup(&request.key, &request.info) {
            Some(entry) if !entry.canceled => {
                trace!(request_id = id, key = %request.key, "Found cached authentication");
                self.cache.refresh(&request.key, &entry.info.realm, window_id);
                request.info = entry.info;
                request.info.modified = true;
            }
            Some(_) => request.info.modified = false,
            None => {
                request.info.modified = false;
                if self.store.is_some()
                    && (request.info.username.is_empty() || !request.info.has_password())
                {
                    let logins = self.read_store(&request.key, &request.info.realm).await;
                    if let Some(login) =
                        logins.select(&request.info.username, request.info.read_only)
                    {
                        debug!(request_id = id, key = %request.key, "Found stored authentication");
                        request.info.username = login.username.clone();
                        request.info.password = login.password.clone();
                        request.info.modified = true;
                    }
                }
            }
        }

        request.respond(self.seq_nr);
    }

    fn query_auth_info(
        &mut self,
        id: RequestId,
        mut info: AuthInfo,
        error_message: String,
        window_id: WindowId,
        seq_nr: SeqNr,
        reply: oneshot::Sender<AuthResult>,
    ) {
        debug!(
            request_id = id,
            username = %info.username,
            window_id,
            seq_nr,
            error_message = %error_message,
            "Query received"
        );

        let key = match create_cache_key(&info.url) {
            Ok(key) => key,
            Err(e) => {
                warn!(request_id = id, error = %e, "Rejecting query with invalid URL");
                info.modified = false;
                let request = AuthRequest::query(
                    id,
                    String::new(),
                    info,
                    error_message,
                    false,
                    window_id,
                    seq_nr,
                    reply,
                );
                request.respond(self.seq_nr);
                return;
            }
        };

        let (error_message, prompt) = if error_message == NO_AUTH_PROMPT {
            (String::new(), false)
        } else {
            (error_message, true)
        };

        let request =
            AuthRequest::query(id, key, info, error_message, prompt, window_id, seq_nr, reply);
        if self.tracker.enqueue_pending(request) {
            self.schedule_processing();
        }
    }

    async fn add_auth_info(&mut self, mut info: AuthInfo, window_id: WindowId) -> Result<(), ServerError> {
        let key = create_cache_key(&info.url)?;
        debug!(
            key = %key,
            username = %info.username,
            realm = %info.realm,
            window_id,
            "Adding credential"
        );
        self.seq_nr += 1;

        if self.write_store(&key, &info).await {
            // The store holds the long-term copy.
            info.keep_password = false;
        }
        self.cache.upsert(&key, info, window_id, self.seq_nr, false);
        Ok(())
    }

    fn window_closed(&mut self, window_id: WindowId) {
        let removed = self.cache.remove_for_window(window_id);
        let (requests, dialogs) = self.tracker.drain_window(window_id);
        info!(
            window_id,
            removed,
            requests = requests.len(),
            dialogs = dialogs.len(),
            "Window closed"
        );

        for dialog in dialogs {
            dialog.abort.abort();
            debug!(request_id = dialog.request.id, stage = ?dialog.stage, "Canceled open dialog");
            let mut request = dialog.request;
            request.info.modified = false;
            request.respond(self.seq_nr);
        }
        for mut request in requests {
            request.info.modified = false;
            request.respond(self.seq_nr);
        }

        self.flush_waiters();
        if self.tracker.has_pending() {
            self.schedule_processing();
        }
    }

    fn list_entries(&self) -> Vec<CacheEntryInfo> {
        let mut entries: Vec<CacheEntryInfo> = self
            .cache
            .iter()
            .map(|(key, entry)| CacheEntryInfo::from_entry(key, entry))
            .collect();
        entries.sort_by(|a, b| a.cache_key.cmp(&b.cache_key).then(a.realm.cmp(&b.realm)));
        debug!(count = entries.len(), "Listed cache entries");
        entries
    }

    /// Run `process_request` once the commands already queued are handled.
    fn schedule_processing(&mut self) {
        match self.loopback.upgrade() {
            Some(tx) => {
                let _ = tx.send(Command::ProcessRequest);
            }
            None => trace!("Server is shutting down, not scheduling"),
        }
    }

    async fn process_request(&mut self) {
        let Some(mut request) = self.tracker.take_next() else {
            return;
        };

        // One dialog per window and per key at a time.
        if !self.tracker.try_mark_prompt_open(&mut request) {
            trace!(request_id = request.id, key = %request.key, "Prompt busy, request put back");
            self.tracker.put_back_front(request);
            return;
        }

        if request.info.username.is_empty() {
            let url_user = url_username(&request.info.url);
            if !url_user.is_empty() {
                request.info.username = url_user;
            }
        }

        let bypass = request.info.bypasses_cache();
        let found = if bypass {
            None
        } else {
            self.cache.lookup(&request.key, &request.info)
        };
        debug!(
            request_id = request.id,
            key = %request.key,
            username = %request.info.username,
            request_seq_nr = request.seq_nr,
            entry_seq_nr = found.as_ref().map(|e| e.seq_nr),
            pending = self.tracker.pending_len(),
            waiting = self.tracker.waiting_len(),
            dialogs = self.tracker.dialog_count(),
            "Processing query"
        );

        if let Some(entry) = found.as_ref().filter(|e| request.seq_nr < e.seq_nr) {
            debug!(request_id = request.id, "Auto retry with newer cached credential");
            if entry.canceled {
                request.info.modified = false;
            } else {
                self.cache.refresh(&request.key, &entry.info.realm, request.window_id);
                request.info = entry.info.clone();
                request.info.modified = true;
            }
            self.send_response(request);
            return;
        }

        self.seq_nr += 1;

        if found.is_some() && !request.error_message.is_empty() {
            self.show_retry_dialog(request);
            return;
        }

        if request.prompt {
            self.show_password_dialog(request).await;
            return;
        }

        request.info.modified = false;
        self.send_response(request);
    }

    fn show_retry_dialog(&mut self, request: AuthRequest) {
        let config = RetryConfig::for_error(&request.error_message, request.window_id);
        debug!(request_id = request.id, window_id = request.window_id, "Showing retry dialog");

        let dialog = self.tracker.allocate_dialog_id();
        let interaction = Arc::clone(&self.interaction);
        let loopback = self.loopback.clone();
        let timeout = self.dialog_timeout;

        let task = tokio::spawn(async move {
            let answer = match timeout {
                Some(limit) => tokio::time::timeout(limit, interaction.prompt_retry(config))
                    .await
                    .unwrap_or(Err(PromptError::Timeout(limit.as_secs()))),
                None => interaction.prompt_retry(config).await,
            };
            let retry = answer.unwrap_or_else(|e| {
                debug!(error = %e, "Retry dialog failed");
                false
            });
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::RetryDialogDone { dialog, retry });
            }
        });

        self.tracker.begin_dialog(
            dialog,
            ActiveDialog {
                request,
                stage: DialogStage::Retry,
                abort: task.abort_handle(),
            },
        );
    }

    async fn show_password_dialog(&mut self, request: AuthRequest) {
        let info = &request.info;
        let mut username = info.username.clone();
        let mut password = info.password.clone();
        let mut known_logins = Vec::new();
        let mut has_stored_data = false;

        if !info.bypasses_cache()
            && self.store.is_some()
            && (username.is_empty() || !info.has_password())
        {
            let logins = self.read_store(&request.key, &info.realm).await;
            if !logins.is_empty() {
                has_stored_data = true;
                known_logins = logins.usernames();
                if let Some(login) = logins.select(&username, info.read_only) {
                    username = login.username.clone();
                    password = login.password.clone();
                }
            }
        }

        let anonymous = info.extra_field(extra_field::ANONYMOUS).map(|value| {
            value.as_bool().unwrap_or(false)
                && username.is_empty()
                && password.expose_secret().is_empty()
        });

        let config = PromptConfig {
            prompt: info.prompt.clone(),
            caption: if info.caption.is_empty() {
                PromptConfig::default().caption
            } else {
                info.caption.clone()
            },
            comment: info.comment.clone(),
            comment_label: info.comment_label.clone(),
            username,
            password,
            username_read_only: info.read_only,
            show_username: !info.extra_flag(extra_field::HIDE_USERNAME_INPUT),
            known_logins: if info.read_only { Vec::new() } else { known_logins },
            show_keep_password: info.keep_password,
            keep_password: has_stored_data,
            domain: info
                .extra_field(extra_field::DOMAIN)
                .map(|value| value.as_str().unwrap_or_default().to_string()),
            anonymous,
            username_context_help: info
                .extra_field(extra_field::USERNAME_CONTEXT_HELP)
                .and_then(|value| value.as_str())
                .map(str::to_string),
            window_id: request.window_id,
        };

        debug!(
            request_id = request.id,
            window_id = request.window_id,
            key = %request.key,
            "Showing password dialog"
        );

        let dialog = self.tracker.allocate_dialog_id();
        let interaction = Arc::clone(&self.interaction);
        let loopback = self.loopback.clone();
        let timeout = self.dialog_timeout;

        let task = tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, interaction.prompt_credentials(config))
                    .await
                    .unwrap_or(Err(PromptError::Timeout(limit.as_secs()))),
                None => interaction.prompt_credentials(config).await,
            };
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::PasswordDialogDone { dialog, result });
            }
        });

        self.tracker.begin_dialog(
            dialog,
            ActiveDialog {
                request,
                stage: DialogStage::Password,
                abort: task.abort_handle(),
            },
        );
    }

    async fn password_dialog_done(
        &mut self,
        dialog: DialogId,
        result: Result<PromptResponse, PromptError>,
    ) {
        let Some(active) = self.tracker.finish_dialog(dialog) else {
            trace!(dialog, "Result for a dialog that is no longer wanted");
            return;
        };
        let mut request = active.request;
        let bypass = request.info.bypasses_cache();

        match result {
            Ok(response) => {
                debug!(request_id = request.id, username = %response.username, "Password dialog accepted");
                request.info.username = response.username;
                request.info.password = response.password;
                request.info.keep_password = response.keep_password;
                if request.info.extra_field(extra_field::DOMAIN).is_some() {
                    request
                        .info
                        .set_extra_field(extra_field::DOMAIN, response.domain.unwrap_or_default());
                }
                if request.info.extra_field(extra_field::ANONYMOUS).is_some() {
                    request
                        .info
                        .set_extra_field(extra_field::ANONYMOUS, response.anonymous.unwrap_or(false));
                }

                if !bypass {
                    self.switch_identity(&mut request);

                    let skip_store = request.info.extra_flag(extra_field::SKIP_CACHING_ON_QUERY);
                    if !skip_store
                        && request.info.keep_password
                        && self.write_store(&request.key, &request.info).await
                    {
                        // The store holds the long-term copy.
                        request.info.keep_password = false;
                    }
                    self.cache.upsert(
                        &request.key,
                        request.info.clone(),
                        request.window_id,
                        self.seq_nr,
                        false,
                    );
                }
                request.info.modified = true;
            }
            Err(e) => {
                debug!(request_id = request.id, error = %e, "Password dialog rejected");
                if !bypass && request.prompt {
                    self.cache
                        .upsert(&request.key, request.info.clone(), 0, self.seq_nr, true);
                }
                request.info.modified = false;
            }
        }

        self.send_response(request);
    }

    /// Refile a request under the username typed in the dialog when it
    /// differs from the one in the request URL.
    fn switch_identity(&mut self, request: &mut AuthRequest) {
        let url_user = url_username(&request.info.url);
        if url_user.is_empty() || url_user == request.info.username {
            return;
        }

        let new_url = match with_username(&request.info.url, &request.info.username) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot move credential to the new username");
                return;
            }
        };
        let new_key = match create_cache_key(&new_url) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Cannot move credential to the new username");
                return;
            }
        };

        let old_key = std::mem::replace(&mut request.key, new_key);
        debug!(old_key = %old_key, new_key = %request.key, "Username changed in dialog");
        self.cache.remove(&old_key, &request.info.realm);
        self.tracker.rekey(request, &old_key);
        request.info.url = new_url;
    }

    async fn retry_dialog_done(&mut self, dialog: DialogId, retry: bool) {
        let Some(active) = self.tracker.finish_dialog(dialog) else {
            trace!(dialog, "Result for a dialog that is no longer wanted");
            return;
        };
        let mut request = active.request;

        if retry {
            self.show_password_dialog(request).await;
        } else {
            debug!(request_id = request.id, key = %request.key, "Retry declined, dropping cached credential");
            self.cache.remove(&request.key, &request.info.realm);
            request.info.modified = false;
            self.send_response(request);
        }
    }

    /// Answer a processed query, then the checks that were waiting for it.
    fn send_response(&mut self, mut request: AuthRequest) {
        trace!(request_id = request.id, key = %request.key, modified = request.info.modified, "Sending response");
        self.tracker.clear_prompt_open(&mut request);
        request.respond(self.seq_nr);

        self.flush_waiters();

        if self.tracker.has_pending() {
            self.schedule_processing();
        }
    }

    fn flush_waiters(&mut self) {
        for mut waiter in self.tracker.take_resolvable_waiters() {
            let found = if waiter.info.bypasses_cache() {
                None
            } else {
                self.cache.lookup(&waiter.key, &waiter.info)
            };
            match found {
                Some(entry) if !entry.canceled => {
                    self.cache.refresh(&waiter.key, &entry.info.realm, waiter.window_id);
                    waiter.info = entry.info;
                    waiter.info.modified = true;
                }
                _ => waiter.info.modified = false,
            }
            trace!(request_id = waiter.id, modified = waiter.info.modified, "Answering waiting check");
            waiter.respond(self.seq_nr);
        }
    }

    async fn read_store(&self, key: &str, realm: &str) -> StoredLogins {
        let Some(store) = &self.store else {
            return StoredLogins::default();
        };
        match store.read(wallet_key(key, realm)).await {
            Ok(logins) => logins,
            Err(e) => {
                warn!(key = %key, error = %e, "Secret store read failed");
                StoredLogins::default()
            }
        }
    }

    /// Returns `true` if the credential was written.
    async fn write_store(&self, key: &str, info: &AuthInfo) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let login = StoredLogin::new(info.username.clone(), info.password.clone());
        match store.write(wallet_key(key, &info.realm), login).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Secret store write failed");
                false
            }
        }
    }
}
