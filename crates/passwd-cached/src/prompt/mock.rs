//! Mock interaction backend for testing.
//!
//! This module provides a scriptable implementation of
//! [`InteractionController`] that can be used in tests without a terminal or
//! a display server.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use passwd_cache_core::{
    InteractionController, PromptConfig, PromptError, PromptResponse, RetryConfig,
};

/// A mock interaction backend.
///
/// Credential dialogs answer from a script, falling back to a default answer
/// once the script runs out. Every dialog configuration shown is recorded.
///
/// # Example
///
/// ```
/// use passwd_cached::prompt::MockInteraction;
///
/// // Always answer with the same login
/// let mock = MockInteraction::with_login("toto", "foobar");
///
/// // Reject the first dialog, accept the second
/// let mock = MockInteraction::cancelled().then_cancel().then_login("toto", "foobar");
/// ```
pub struct MockInteraction {
    /// Scripted credential answers, consumed in order, each with its own
    /// delay overriding `delay`.
    script: Mutex<VecDeque<(Result<PromptResponse, PromptError>, Option<Duration>)>>,
    /// Answer once the script is exhausted.
    fallback: Result<PromptResponse, PromptError>,
    /// Scripted retry answers, consumed in order.
    retries: Mutex<VecDeque<bool>>,
    /// Retry answer once the script is exhausted.
    retry_fallback: bool,
    /// Delay before answering.
    delay: Option<Duration>,
    credential_calls: Arc<AtomicUsize>,
    retry_calls: Arc<AtomicUsize>,
    shown: Mutex<Vec<PromptConfig>>,
    retries_shown: Mutex<Vec<RetryConfig>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockInteraction {
    fn new(fallback: Result<PromptResponse, PromptError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            retries: Mutex::new(VecDeque::new()),
            retry_fallback: false,
            delay: None,
            credential_calls: Arc::new(AtomicUsize::new(0)),
            retry_calls: Arc::new(AtomicUsize::new(0)),
            shown: Mutex::new(Vec::new()),
            retries_shown: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always answers with the given login.
    pub fn with_login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Ok(PromptResponse::new(username, password)))
    }

    /// Create a mock that always answers with the given response.
    pub fn with_response(response: PromptResponse) -> Self {
        Self::new(Ok(response))
    }

    /// Create a mock that simulates user cancellation.
    pub fn cancelled() -> Self {
        Self::new(Err(PromptError::Cancelled))
    }

    /// Create a mock that fails with the given error.
    pub fn with_error(error: PromptError) -> Self {
        Self::new(Err(error))
    }

    /// Queue a login as the next credential answer.
    pub fn then_login(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.then_response(PromptResponse::new(username, password))
    }

    /// Queue a response as the next credential answer.
    pub fn then_response(self, response: PromptResponse) -> Self {
        lock(&self.script).push_back((Ok(response), None));
        self
    }

    /// Queue a login answered only after `delay`.
    pub fn then_delayed_login(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
        delay: Duration,
    ) -> Self {
        let response = PromptResponse::new(username, password);
        lock(&self.script).push_back((Ok(response), Some(delay)));
        self
    }

    /// Queue a cancellation as the next credential answer.
    pub fn then_cancel(self) -> Self {
        lock(&self.script).push_back((Err(PromptError::Cancelled), None));
        self
    }

    /// Queue the next answer to the retry question.
    pub fn then_retry(self, retry: bool) -> Self {
        lock(&self.retries).push_back(retry);
        self
    }

    /// Answer to the retry question once the script is exhausted.
    pub fn retry_by_default(mut self, retry: bool) -> Self {
        self.retry_fallback = retry;
        self
    }

    /// Add a delay before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of credential dialogs shown.
    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }

    /// Number of retry dialogs shown.
    pub fn retry_calls(&self) -> usize {
        self.retry_calls.load(Ordering::SeqCst)
    }

    /// Configurations of every credential dialog shown, in order.
    pub fn prompt_configs(&self) -> Vec<PromptConfig> {
        lock(&self.shown).clone()
    }

    /// Configurations of every retry dialog shown, in order.
    pub fn retry_configs(&self) -> Vec<RetryConfig> {
        lock(&self.retries_shown).clone()
    }
}

impl Default for MockInteraction {
    fn default() -> Self {
        Self::with_login("mock-user", "mock-password")
    }
}

impl InteractionController for MockInteraction {
    fn prompt_credentials(
        &self,
        config: PromptConfig,
    ) -> Pin<Box<dyn Future<Output = Result<PromptResponse, PromptError>> + Send + '_>> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.shown).push(config);

        let (answer, delay) = match lock(&self.script).pop_front() {
            Some((answer, delay)) => (answer, delay.or(self.delay)),
            None => (self.fallback.clone(), self.delay),
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            answer
        })
    }

    fn prompt_retry(
        &self,
        config: RetryConfig,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PromptError>> + Send + '_>> {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.retries_shown).push(config);

        let answer = lock(&self.retries)
            .pop_front()
            .unwrap_or(self.retry_fallback);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(answer)
        })
    }
}
