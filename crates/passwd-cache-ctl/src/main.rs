//! passwd-cache-ctl - Control utility for the passwd-cache credential server.
//!
//! This utility allows you to:
//! - List cached credentials (metadata only, no secrets)
//! - Check for or query a credential the way a client would
//! - Seed the cache with a credential
//! - Remove credentials by host or by window
//! - Check if the daemon is running
//!
//! # Usage
//!
//! ```bash
//! # List all cached credentials
//! passwd-cache-ctl list
//!
//! # Look up a credential without prompting
//! passwd-cache-ctl check http://www.example.com/
//!
//! # Ask for a credential, prompting if needed
//! passwd-cache-ctl query http://www.example.com/ --window 42
//!
//! # Remove every credential for a host
//! passwd-cache-ctl remove --protocol http --host www.example.com
//!
//! # Tell the daemon a window went away
//! passwd-cache-ctl close-window 42
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use passwd_cache_core::{
    default_socket_path, AuthInfo, ExpirePolicy, Request, Response, SeqNr, WindowId,
};
use secrecy::{ExposeSecret, SecretString};

/// Control utility for the passwd-cache credential server.
#[derive(Parser)]
#[command(name = "passwd-cache-ctl")]
#[command(about = "Control the passwd-cache credential server")]
#[command(version)]
struct Cli {
    /// Path to the daemon socket
    #[arg(long, short = 's', value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached credentials (metadata only, no secrets)
    #[command(alias = "ls")]
    List,

    /// Look up a cached credential without prompting
    Check {
        url: String,

        /// Authentication realm
        #[arg(long, short = 'r', default_value = "")]
        realm: String,

        /// Window the request belongs to
        #[arg(long, short = 'w', default_value_t = 0)]
        window: WindowId,

        /// Print the password as well
        #[arg(long)]
        show_password: bool,
    },

    /// Ask for a credential, prompting the user if needed
    Query {
        url: String,

        /// Authentication realm
        #[arg(long, short = 'r', default_value = "")]
        realm: String,

        /// Window the request belongs to
        #[arg(long, short = 'w', default_value_t = 0)]
        window: WindowId,

        /// Sequence number of the credential last used
        #[arg(long, default_value_t = 0)]
        seq: SeqNr,

        /// Why the last credential was rejected
        #[arg(long, short = 'e', default_value = "")]
        error: String,

        /// Print the password as well
        #[arg(long)]
        show_password: bool,
    },

    /// Add a credential to the cache (password is read from the terminal)
    Add {
        url: String,

        /// Username
        #[arg(long, short = 'u')]
        user: String,

        /// Authentication realm
        #[arg(long, short = 'r', default_value = "")]
        realm: String,

        /// Window the credential belongs to
        #[arg(long, short = 'w', default_value_t = 0)]
        window: WindowId,

        /// Keep the credential until the daemon exits
        #[arg(long, short = 'k')]
        keep: bool,
    },

    /// Remove cached credentials for a host
    #[command(alias = "rm")]
    Remove {
        /// URL scheme, e.g. http
        #[arg(long, short = 'p')]
        protocol: String,

        /// Host name
        #[arg(long)]
        host: String,

        /// Only this user's credentials
        #[arg(long, short = 'u', default_value = "")]
        user: String,
    },

    /// Unbind a window from its cached credentials
    ForgetWindow { window: WindowId },

    /// Report a closed window, canceling its pending requests
    CloseWindow { window: WindowId },

    /// Check if daemon is running
    #[command(alias = "status")]
    Ping,
}

/// Send a request to the daemon and receive a response.
fn send_request(socket_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to daemon at {:?}", socket_path))?;

    let request_json = request
        .to_json_line()
        .context("Failed to serialize request")?;
    stream
        .write_all(request_json.as_bytes())
        .context("Failed to send request")?;
    stream.flush().context("Failed to flush request")?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .context("Failed to read response")?;

    Response::parse(response_line.trim()).context("Failed to parse response")
}

/// Format TTL as human-readable string.
fn format_ttl(secs: Option<u64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) if s < 60 => format!("{}s", s),
        Some(s) if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        Some(s) => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

/// Describe when an entry goes away.
fn format_expiry(expire: ExpirePolicy, windows: &[WindowId], ttl: Option<u64>) -> String {
    match expire {
        ExpirePolicy::Never => "never".to_string(),
        ExpirePolicy::UntilWindowClose => {
            let ids: Vec<String> = windows.iter().map(|w| w.to_string()).collect();
            format!("window {}", ids.join(","))
        }
        ExpirePolicy::TimeToLive => format_ttl(ttl),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

fn unexpected(response: Response) -> Result<ExitCode> {
    match response {
        Response::Error { code, message } => {
            eprintln!("Error ({}): {}", code, message);
        }
        _ => eprintln!("Unexpected response from daemon"),
    }
    Ok(ExitCode::FAILURE)
}

/// Handle the list command.
fn cmd_list(socket: &Path) -> Result<ExitCode> {
    match send_request(socket, &Request::ListCache)? {
        Response::CacheEntries { entries } => {
            if entries.is_empty() {
                println!("No cached credentials.");
                return Ok(ExitCode::SUCCESS);
            }

            println!(
                "{:<10} {:<35} {:<16} {:<16} EXPIRES",
                "ID", "CACHE KEY", "REALM", "USER"
            );
            println!("{}", "-".repeat(95));

            for entry in entries {
                let mut expires =
                    format_expiry(entry.expire, &entry.windows, entry.ttl_remaining_secs);
                if entry.canceled {
                    expires.push_str(" (canceled)");
                }
                println!(
                    "{:<10} {:<35} {:<16} {:<16} {}",
                    entry.id,
                    truncate(&entry.cache_key, 35),
                    truncate(&entry.realm, 16),
                    truncate(&entry.username, 16),
                    expires
                );
            }

            Ok(ExitCode::SUCCESS)
        }
        other => unexpected(other),
    }
}

/// Print an auth result. Exits with failure when no credential was provided.
fn print_auth_result(response: Response, show_password: bool) -> Result<ExitCode> {
    match response {
        Response::AuthResult { seq_nr, info, .. } => {
            if !info.modified {
                println!("No credential (seq {}).", seq_nr);
                return Ok(ExitCode::FAILURE);
            }
            println!("user: {}", info.username);
            if show_password {
                println!("password: {}", info.password.expose_secret());
            }
            println!("seq: {}", seq_nr);
            Ok(ExitCode::SUCCESS)
        }
        other => unexpected(other),
    }
}

fn cmd_add(
    socket: &Path,
    url: String,
    user: String,
    realm: String,
    window: WindowId,
    keep: bool,
) -> Result<ExitCode> {
    print!("Password for {}: ", user);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let password = rpassword::read_password().context("Failed to read password")?;

    let mut info = AuthInfo::new(url).with_realm(realm);
    info.username = user;
    info.password = SecretString::from(password);
    info.keep_password = keep;

    match send_request(socket, &Request::AddAuthInfo { info, window_id: window })? {
        Response::Added => {
            println!("Credential added.");
            Ok(ExitCode::SUCCESS)
        }
        other => unexpected(other),
    }
}

fn print_removed(response: Response) -> Result<ExitCode> {
    match response {
        Response::Removed { count } => {
            match count {
                0 => println!("No matching entries found."),
                1 => println!("Removed 1 entry."),
                n => println!("Removed {} entries.", n),
            }
            Ok(ExitCode::SUCCESS)
        }
        other => unexpected(other),
    }
}

/// Handle the ping command.
fn cmd_ping(socket: &Path) -> Result<ExitCode> {
    match send_request(socket, &Request::Ping)? {
        Response::Pong => {
            println!("Daemon is running.");
            Ok(ExitCode::SUCCESS)
        }
        other => unexpected(other),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let socket = cli.socket.unwrap_or_else(default_socket_path);

    match cli.command {
        Commands::List => cmd_list(&socket),
        Commands::Check {
            url,
            realm,
            window,
            show_password,
        } => {
            let request = Request::CheckAuthInfo {
                info: AuthInfo::new(url).with_realm(realm),
                window_id: window,
            };
            print_auth_result(send_request(&socket, &request)?, show_password)
        }
        Commands::Query {
            url,
            realm,
            window,
            seq,
            error,
            show_password,
        } => {
            let request = Request::QueryAuthInfo {
                info: AuthInfo::new(url).with_realm(realm),
                error_message: error,
                window_id: window,
                seq_nr: seq,
            };
            print_auth_result(send_request(&socket, &request)?, show_password)
        }
        Commands::Add {
            url,
            user,
            realm,
            window,
            keep,
        } => cmd_add(&socket, url, user, realm, window, keep),
        Commands::Remove {
            protocol,
            host,
            user,
        } => {
            let request = Request::RemoveAuthInfo {
                host,
                protocol,
                user,
            };
            print_removed(send_request(&socket, &request)?)
        }
        Commands::ForgetWindow { window } => {
            let request = Request::RemoveAuthForWindow { window_id: window };
            print_removed(send_request(&socket, &request)?)
        }
        Commands::CloseWindow { window } => {
            match send_request(&socket, &Request::WindowClosed { window_id: window })? {
                Response::WindowClosed => {
                    println!("Window {} closed.", window);
                    Ok(ExitCode::SUCCESS)
                }
                other => unexpected(other),
            }
        }
        Commands::Ping => cmd_ping(&socket),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
