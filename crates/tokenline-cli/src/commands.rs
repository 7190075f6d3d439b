//! Command-line parsing and command implementations.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use tokenline_core::{AuthClient, Config, Method, SessionState};
use tracing::{info, warn};

const ENV_EMAIL: &str = "TOKENLINE_EMAIL";
const ENV_PASSWORD: &str = "TOKENLINE_PASSWORD";

pub const USAGE: &str = "\
Usage: tokenline <command>

Commands:
  login [email]      Sign in and store tokens
  register [email]   Create an account, then sign in
  logout [--yes]     Sign out and clear stored tokens
  whoami             Show the signed-in user
  status             Show session and configuration details
  get <path>         GET a backend path with the current session
  watch              Keep the session alive until interrupted
  help               Show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Register { email: Option<String> },
    Logout { assume_yes: bool },
    Whoami,
    Status,
    Get { path: String },
    Watch,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter().map(String::as_str);
        let command = match iter.next() {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => Command::Login {
                email: iter.next().map(str::to_string),
            },
            Some("register") => Command::Register {
                email: iter.next().map(str::to_string),
            },
            Some("logout") => {
                let assume_yes = match iter.next() {
                    None => false,
                    Some("--yes") | Some("-y") => true,
                    Some(other) => bail!("Unknown logout option: {}", other),
                };
                Command::Logout { assume_yes }
            }
            Some("whoami") => Command::Whoami,
            Some("status") => Command::Status,
            Some("get") => match iter.next() {
                Some(path) => Command::Get {
                    path: path.to_string(),
                },
                None => bail!("get requires a path, e.g. `tokenline get /auth/me`"),
            },
            Some("watch") => Command::Watch,
            Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
        };

        if let Some(extra) = iter.next() {
            bail!("Unexpected argument: {}", extra);
        }
        Ok(command)
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn resolve_email(arg: Option<String>, config: &Config) -> Result<String> {
    if let Some(email) = arg.or_else(|| std::env::var(ENV_EMAIL).ok()) {
        return Ok(email);
    }

    let email = match config.last_email {
        Some(ref last) => {
            let input = prompt_line(&format!("Email [{}]: ", last))?;
            if input.is_empty() {
                last.clone()
            } else {
                input
            }
        }
        None => prompt_line("Email: ")?,
    };

    if email.is_empty() {
        bail!("Email required");
    }
    Ok(email)
}

fn resolve_password(confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        bail!("Password required");
    }
    if confirm && rpassword::prompt_password("Confirm password: ")? != password {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// True when the answer is an explicit yes
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ============================================================================
// Commands
// ============================================================================

pub async fn login(client: &AuthClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = resolve_email(email, config)?;
    let password = resolve_password(false)?;

    println!("\nAuthenticating...");
    let user = client.login(&email, &password).await.context("Login failed")?;

    remember_email(config, email);
    println!("Logged in as {}", user.display_name());
    Ok(())
}

pub async fn register(client: &AuthClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = resolve_email(email, config)?;
    let password = resolve_password(true)?;

    println!("\nCreating account...");
    let user = client.register(&email, &password).await.context("Registration failed")?;

    remember_email(config, email);
    println!("Account created; logged in as {}", user.display_name());
    Ok(())
}

fn remember_email(config: &mut Config, email: String) {
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

pub fn logout(client: &AuthClient, config: &Config, assume_yes: bool) -> Result<()> {
    if !assume_yes {
        let who = config.last_email.as_deref().unwrap_or("the current session");
        let answer = prompt_line(&format!("Log out of {}? [y/N]: ", who))?;
        if !is_affirmative(&answer) {
            println!("Cancelled");
            return Ok(());
        }
    }

    client.logout().context("Failed to clear stored credentials")?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(client: &AuthClient) -> Result<()> {
    let state = client.initialize_auth().await?;
    match state.current_user {
        Some(user) => {
            println!("{} <{}> (id {})", user.display_name(), user.email, user.id);
            Ok(())
        }
        None => bail!("Not logged in"),
    }
}

pub async fn status(client: &AuthClient, config: &Config) -> Result<()> {
    let state = client.initialize_auth().await?;
    println!("Backend:          {}", config.base_url);
    println!("Token storage:    {:?}", config.token_backend);
    println!("Refresh interval: {}", format_interval(config.refresh_interval_secs));
    println!("Session:          {}", describe_state(&state));
    Ok(())
}

pub async fn get(client: &AuthClient, path: &str) -> Result<()> {
    client.initialize_auth().await?;

    let response = client.send(client.request(Method::GET, path)).await?;
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    let rendered = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => body,
    };
    println!("{}", rendered);

    if !status.is_success() {
        bail!("Request failed with status {}", status);
    }
    Ok(())
}

pub async fn watch(client: &AuthClient) -> Result<()> {
    let state = client.initialize_auth().await?;
    if !state.is_authenticated {
        bail!("Not logged in");
    }

    let mut updates = client.subscribe();
    println!("Session active: {}. Press Ctrl-C to stop.", describe_state(&state));
    info!("Watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped; session left in place");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = updates.borrow_and_update().clone();
                if !state.is_authenticated {
                    bail!("Session ended; log in again");
                }
            }
        }
    }
}

pub fn describe_state(state: &SessionState) -> String {
    match (&state.current_user, state.signed_in_at) {
        (Some(user), Some(at)) => format!(
            "logged in as {} since {}",
            user.email,
            at.format("%Y-%m-%d %H:%M UTC")
        ),
        (Some(user), None) => format!("logged in as {}", user.email),
        _ => "logged out".to_string(),
    }
}

/// Format a second count as days/hours/minutes
pub fn format_interval(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, 0) => format!("{}h", h),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, 0, _) => format!("{}d", d),
        (d, h, _) => format!("{}d {}h", d, h),
    }
}
