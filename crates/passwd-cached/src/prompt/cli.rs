//! Terminal dialogs for headless systems.
//!
//! Uses `rpassword` for password entry (no echo). Both dialogs run on a
//! blocking task since they read from the controlling terminal.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::pin::Pin;

use passwd_cache_core::{
    InteractionController, PromptConfig, PromptError, PromptResponse, RetryConfig,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// Terminal-based interaction backend.
pub struct CliInteraction;

impl CliInteraction {
    /// Create a new terminal interaction backend.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliInteraction {
    fn default() -> Self {
        Self::new()
    }
}

fn ui_error(what: &str) -> impl FnOnce(io::Error) -> PromptError + '_ {
    move |e| PromptError::UiError(format!("{}: {}", what, e))
}

fn read_line(label: &str) -> Result<String, PromptError> {
    print!("{}", label);
    io::stdout().flush().map_err(ui_error("Failed to flush stdout"))?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(ui_error("Failed to read input"))?;
    if read == 0 {
        return Err(PromptError::Cancelled);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn run_credentials_dialog(config: PromptConfig) -> Result<PromptResponse, PromptError> {
    if !config.caption.is_empty() {
        println!("== {} ==", config.caption);
    }
    if !config.prompt.is_empty() {
        println!("{}", config.prompt);
    }
    if !config.comment.is_empty() {
        println!("{} {}", config.comment_label, config.comment);
    }

    let username = if !config.show_username || config.username_read_only {
        if config.show_username {
            println!("Username: {}", config.username);
        }
        config.username.clone()
    } else {
        if !config.known_logins.is_empty() {
            println!("Known logins: {}", config.known_logins.join(", "));
        }
        let label = if config.username.is_empty() {
            "Username: ".to_string()
        } else {
            format!("Username [{}]: ", config.username)
        };
        let entered = read_line(&label)?;
        if entered.is_empty() {
            config.username.clone()
        } else {
            entered
        }
    };

    let domain = match &config.domain {
        Some(current) => {
            let entered = read_line(&format!("Domain [{}]: ", current))?;
            Some(if entered.is_empty() {
                current.clone()
            } else {
                entered
            })
        }
        None => None,
    };

    let label = if config.password.expose_secret().is_empty() {
        "Password: "
    } else {
        "Password (empty keeps stored): "
    };
    print!("{}", label);
    io::stdout().flush().map_err(ui_error("Failed to flush stdout"))?;
    let entered = rpassword::read_password().map_err(ui_error("Failed to read password"))?;
    let password = if entered.is_empty() {
        if config.password.expose_secret().is_empty() {
            return Err(PromptError::Cancelled);
        }
        config.password.clone()
    } else {
        SecretString::from(entered)
    };

    let keep_password = if config.show_keep_password {
        let default = if config.keep_password { "Y/n" } else { "y/N" };
        let answer = read_line(&format!("Remember password? [{}] ", default))?;
        if answer.trim().is_empty() {
            config.keep_password
        } else {
            yes(&answer)
        }
    } else {
        false
    };

    debug!(username = %username, "Credentials entered via CLI");

    Ok(PromptResponse {
        username,
        password,
        keep_password,
        domain,
        anonymous: config.anonymous.map(|_| false),
    })
}

impl InteractionController for CliInteraction {
    fn prompt_credentials(
        &self,
        config: PromptConfig,
    ) -> Pin<Box<dyn Future<Output = Result<PromptResponse, PromptError>> + Send + '_>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || run_credentials_dialog(config))
                .await
                .map_err(|e| PromptError::UiError(format!("Task failed: {}", e)))?
        })
    }

    fn prompt_retry(
        &self,
        config: RetryConfig,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PromptError>> + Send + '_>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                println!("{}", config.message);
                read_line("[y/N] ").map(|answer| yes(&answer))
            })
            .await
            .map_err(|e| PromptError::UiError(format!("Task failed: {}", e)))?
        })
    }
}
