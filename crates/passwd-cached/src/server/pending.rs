//! Bookkeeping for requests that have not been answered yet.
//!
//! Queries wait in the pending queue until the server gets to them, and sit in
//! the dialog table while a dialog is open for them. Checks that arrive while
//! a matching query is in flight wait in the wait queue until it resolves.
//! The prompt guard allows at most one open dialog per window and per cache
//! key.

use std::collections::{HashMap, HashSet, VecDeque};

use passwd_cache_core::cache_key::{directory_of, url_path};
use passwd_cache_core::{AuthInfo, AuthResult, RequestId, RequestKind, SeqNr, WindowId};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::trace;

/// Identifier of an open dialog.
pub(crate) type DialogId = u64;

/// A check or query waiting for its reply.
pub(crate) struct AuthRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub key: String,
    pub info: AuthInfo,
    pub error_message: String,
    pub window_id: WindowId,
    pub seq_nr: SeqNr,
    /// Whether a dialog may be shown for this request.
    pub prompt: bool,
    /// Key of the prompt guard this request holds, if any.
    guard: Option<String>,
    reply: oneshot::Sender<AuthResult>,
}

impl AuthRequest {
    pub fn check(
        id: RequestId,
        key: String,
        info: AuthInfo,
        window_id: WindowId,
        reply: oneshot::Sender<AuthResult>,
    ) -> Self {
        Self {
            id,
            kind: RequestKind::Check,
            key,
            info,
            error_message: String::new(),
            window_id,
            seq_nr: 0,
            prompt: false,
            guard: None,
            reply,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn query(
        id: RequestId,
        key: String,
        info: AuthInfo,
        error_message: String,
        prompt: bool,
        window_id: WindowId,
        seq_nr: SeqNr,
        reply: oneshot::Sender<AuthResult>,
    ) -> Self {
        Self {
            id,
            kind: RequestKind::Query,
            key,
            info,
            error_message,
            window_id,
            seq_nr,
            prompt,
            guard: None,
            reply,
        }
    }

    /// Send `self.info` to the caller.
    pub fn respond(self, seq_nr: SeqNr) {
        let result = AuthResult {
            request_id: self.id,
            kind: self.kind,
            seq_nr,
            info: self.info,
        };
        if self.reply.send(result).is_err() {
            trace!(request_id = self.id, "Caller went away before the reply");
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("window_id", &self.window_id)
            .field("seq_nr", &self.seq_nr)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// Which dialog is open for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialogStage {
    Password,
    Retry,
}

/// A request with an open dialog.
#[derive(Debug)]
pub(crate) struct ActiveDialog {
    pub request: AuthRequest,
    pub stage: DialogStage,
    pub abort: AbortHandle,
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequestTracker {
    pending: VecDeque<AuthRequest>,
    waiting: Vec<AuthRequest>,
    prompted_windows: HashSet<WindowId>,
    prompted_keys: HashSet<String>,
    dialogs: HashMap<DialogId, ActiveDialog>,
    next_dialog: DialogId,
}

impl PendingRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a query that will answer `query` under `key` is queued or has
    /// a dialog open.
    pub fn has_in_flight(&self, key: &str, query: &AuthInfo) -> bool {
        let probe = Probe { key, info: query };
        self.pending
            .iter()
            .chain(self.dialogs.values().map(|d| &d.request))
            .any(|request| probe.is_covered_by(request))
    }

    /// Queue a query. Returns `true` if the queue was empty before.
    pub fn enqueue_pending(&mut self, request: AuthRequest) -> bool {
        let was_empty = self.pending.is_empty();
        self.pending.push_back(request);
        was_empty
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_next(&mut self) -> Option<AuthRequest> {
        self.pending.pop_front()
    }

    pub fn put_back_front(&mut self, request: AuthRequest) {
        self.pending.push_front(request);
    }

    /// Park a check behind an in-flight query.
    pub fn enqueue_waiting(&mut self, request: AuthRequest) {
        self.waiting.push(request);
    }

    /// Take the waiting checks no in-flight query answers anymore.
    pub fn take_resolvable_waiters(&mut self) -> Vec<AuthRequest> {
        let (ready, still_waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiting)
            .into_iter()
            .partition(|w| !self.has_in_flight(&w.key, &w.info));
        self.waiting = still_waiting;
        ready
    }

    /// Take the prompt guard for the request's window and key.
    ///
    /// Returns `false`, leaving the guard untouched, if either is held.
    pub fn try_mark_prompt_open(&mut self, request: &mut AuthRequest) -> bool {
        if self.prompted_windows.contains(&request.window_id)
            || self.prompted_keys.contains(&request.key)
        {
            return false;
        }
        self.prompted_windows.insert(request.window_id);
        self.prompted_keys.insert(request.key.clone());
        request.guard = Some(request.key.clone());
        true
    }

    /// Release the prompt guard held by `request`. No-op if it holds none.
    pub fn clear_prompt_open(&mut self, request: &mut AuthRequest) {
        if let Some(key) = request.guard.take() {
            self.prompted_windows.remove(&request.window_id);
            self.prompted_keys.remove(&key);
        }
    }

    pub fn allocate_dialog_id(&mut self) -> DialogId {
        self.next_dialog += 1;
        self.next_dialog
    }

    pub fn begin_dialog(&mut self, id: DialogId, dialog: ActiveDialog) {
        self.dialogs.insert(id, dialog);
    }

    /// Take the request of a finished dialog, if it is still wanted.
    pub fn finish_dialog(&mut self, id: DialogId) -> Option<ActiveDialog> {
        self.dialogs.remove(&id)
    }

    /// Move queued requests from `old_key` to the key `request` was refiled
    /// under, along with the prompt guard `request` holds.
    ///
    /// The guard stays on `old_key` while another dialog holds the new key.
    pub fn rekey(&mut self, request: &mut AuthRequest, old_key: &str) {
        let new_key = request.key.as_str();
        for queued in self.pending.iter_mut().chain(self.waiting.iter_mut()) {
            if queued.key == old_key {
                queued.key = new_key.to_string();
            }
        }

        let Some(held) = request.guard.as_deref() else {
            return;
        };
        if held == new_key || self.prompted_keys.contains(new_key) {
            trace!(held = %held, new_key = %new_key, "Prompt guard left in place");
            return;
        }
        self.prompted_keys.remove(held);
        self.prompted_keys.insert(new_key.to_string());
        request.guard = Some(new_key.to_string());
    }

    /// Remove every request bound to `window_id`.
    ///
    /// Returns the queued requests and the open dialogs separately. The prompt
    /// guards of the removed dialogs are released.
    pub fn drain_window(&mut self, window_id: WindowId) -> (Vec<AuthRequest>, Vec<ActiveDialog>) {
        let mut requests = Vec::new();

        let (closed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| r.window_id == window_id);
        self.pending = kept;
        requests.extend(closed);

        let (closed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiting)
            .into_iter()
            .partition(|r| r.window_id == window_id);
        self.waiting = kept;
        requests.extend(closed);

        let ids: Vec<DialogId> = self
            .dialogs
            .iter()
            .filter(|(_, d)| d.request.window_id == window_id)
            .map(|(id, _)| *id)
            .collect();
        let mut dialogs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut dialog) = self.dialogs.remove(&id) {
                self.clear_prompt_open(&mut dialog.request);
                dialogs.push(dialog);
            }
        }

        (requests, dialogs)
    }

    /// Abort every open dialog and hand back all unanswered requests.
    pub fn drain_all(&mut self) -> Vec<AuthRequest> {
        let mut requests: Vec<AuthRequest> = self.pending.drain(..).collect();
        requests.append(&mut self.waiting);
        for (_, dialog) in self.dialogs.drain() {
            dialog.abort.abort();
            requests.push(dialog.request);
        }
        self.prompted_windows.clear();
        self.prompted_keys.clear();
        requests
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }
}

/// A lookup that has not become a request yet.
struct Probe<'a> {
    key: &'a str,
    info: &'a AuthInfo,
}

impl Probe<'_> {
    fn is_covered_by(&self, other: &AuthRequest) -> bool {
        if other.key != self.key {
            return false;
        }
        if !self.info.verify_path {
            return true;
        }
        let ancestor = url_path(&other.info.url);
        url_path(&self.info.url).starts_with(directory_of(&ancestor))
    }
}
