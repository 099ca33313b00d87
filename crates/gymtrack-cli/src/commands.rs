//! Command parsing and execution.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use gymtrack_core::models::{ProfileUpdate, User};
use gymtrack_core::{ApiError, Config, SessionError, SessionManager, SessionStatus};
use tracing::{debug, warn};

pub const USAGE: &str = "\
Usage: gymtrack <command>

Commands:
  login [email]                    Sign in (prompts for the password)
  logout                           Sign out and forget the stored session
  whoami                           Show the signed-in user
  profile <name> [--password]      Change your name, optionally your password
  groups                           List muscle groups
  exercises <group>                List the exercises of a muscle group
  exercise <id>                    Show one exercise";

/// How long to wait for the session to react to a rejected token
const AUTH_FAILURE_SETTLE_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    WhoAmI,
    Profile { name: String, change_password: bool },
    Groups,
    Exercises { group: String },
    Exercise { id: i64 },
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            Some("login") => Command::Login {
                email: args.next().map(str::to_string),
            },
            Some("logout") => Command::Logout,
            Some("whoami") => Command::WhoAmI,
            Some("profile") => {
                let rest: Vec<&str> = args.by_ref().collect();
                let change_password = rest.contains(&"--password");
                let name = rest
                    .iter()
                    .filter(|a| **a != "--password")
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                if name.trim().is_empty() {
                    bail!("profile needs a name");
                }
                Command::Profile {
                    name: name.trim().to_string(),
                    change_password,
                }
            }
            Some("groups") => Command::Groups,
            Some("exercises") => Command::Exercises {
                group: args
                    .next()
                    .ok_or_else(|| anyhow!("exercises needs a group"))?
                    .to_string(),
            },
            Some("exercise") => {
                let id = args.next().ok_or_else(|| anyhow!("exercise needs an id"))?;
                Command::Exercise {
                    id: id.parse().with_context(|| format!("'{}' is not an exercise id", id))?,
                }
            }
            Some(other) => bail!("unknown command '{}'", other),
            None => bail!("no command given"),
        };

        if let Some(extra) = args.next() {
            bail!("unexpected argument '{}'", extra);
        }
        Ok(command)
    }
}

pub async fn run(command: Command, manager: &SessionManager, config: Config) -> Result<()> {
    match command {
        Command::Login { email } => login(manager, config, email).await,
        Command::Logout => logout(manager).await,
        Command::WhoAmI => whoami(manager),
        Command::Profile { name, change_password } => profile(manager, name, change_password).await,
        Command::Groups => {
            require_user(manager)?;
            let groups = settle(manager, manager.api().fetch_groups().await).await?;
            for group in groups {
                println!("{}", group);
            }
            Ok(())
        }
        Command::Exercises { group } => {
            require_user(manager)?;
            let exercises = settle(manager, manager.api().fetch_exercises_by_group(&group).await).await?;
            if exercises.is_empty() {
                println!("No exercises for '{}'", group);
            }
            for exercise in exercises {
                println!("{:>4}  {:<32} {}", exercise.id, exercise.name, exercise.display_summary());
            }
            Ok(())
        }
        Command::Exercise { id } => {
            require_user(manager)?;
            let exercise = settle(manager, manager.api().fetch_exercise(id).await).await?;
            let base = manager.api().base_url();
            println!("{} ({})", exercise.name, exercise.group);
            println!("  {}", exercise.display_summary());
            println!("  thumb: {}", exercise.thumb_url(base));
            println!("  demo:  {}", exercise.demo_url(base));
            Ok(())
        }
    }
}

fn require_user(manager: &SessionManager) -> Result<User> {
    let session = manager.current();
    match (session.status, session.user) {
        (SessionStatus::Authenticated, Some(user)) => Ok(user),
        _ => bail!("Not signed in. Run `gymtrack login` first."),
    }
}

/// Give the session manager a chance to sign out (or refresh) after a
/// rejected token before reporting the error
async fn settle<T>(manager: &SessionManager, result: Result<T, ApiError>) -> Result<T> {
    let err = match result {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    if !err.is_auth_failure() {
        return Err(anyhow!(err.user_message()));
    }

    let rejected = manager.api().auth_token();
    let api = manager.api().clone();
    let mut rx = manager.subscribe();
    let settled = tokio::time::timeout(
        Duration::from_secs(AUTH_FAILURE_SETTLE_SECS),
        rx.wait_for(|s| !s.is_loading && (!s.is_authenticated() || api.auth_token() != rejected)),
    )
    .await;
    debug!(settled = settled.is_ok(), "Waited for session after auth failure");

    if manager.current().is_authenticated() {
        bail!("Your session was renewed, please try again.");
    }
    bail!("Your session has expired. Run `gymtrack login` to sign in again.");
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn login(manager: &SessionManager, mut config: Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(last) if !last.is_empty() => {
            let input = prompt(&format!("Email [{}]: ", last))?;
            if input.is_empty() { last } else { input }
        }
        _ => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    if email.is_empty() || password.is_empty() {
        bail!("Email and password required");
    }

    let user = manager
        .sign_in(&email, &password)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Welcome, {}!", user.name);
    Ok(())
}

async fn logout(manager: &SessionManager) -> Result<()> {
    manager.sign_out().await.map_err(|e| anyhow!(e.user_message()))?;
    println!("Signed out.");
    Ok(())
}

fn whoami(manager: &SessionManager) -> Result<()> {
    let user = require_user(manager)?;
    println!("{} <{}>", user.name, user.email);
    if let Some(url) = user.avatar_url(manager.api().base_url()) {
        println!("  avatar: {}", url);
    }
    if let Ok(Some(credentials)) = manager.store().credentials() {
        println!("  token issued {} minutes ago", credentials.age_minutes());
    }
    Ok(())
}

async fn profile(manager: &SessionManager, name: String, change_password: bool) -> Result<()> {
    require_user(manager)?;

    let mut update = ProfileUpdate::rename(name);
    if change_password {
        let old_password = rpassword::prompt_password("Current password: ")?;
        let password = rpassword::prompt_password("New password: ")?;
        let confirm = rpassword::prompt_password("Confirm new password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }
        update = update.with_password_change(old_password, password);
    }

    let user = match manager.update_profile(&update).await {
        Ok(user) => user,
        Err(SessionError::Api(e)) => return settle(manager, Err(e)).await,
        Err(e) => bail!(e.user_message()),
    };
    println!("Profile updated: {}", user.name);
    Ok(())
}
