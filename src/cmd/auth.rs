//! Account commands: `taskboard signup|login|logout|whoami`.

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::path::Path;

use taskboard::board::{AuthClient, Session, SessionStore};
use taskboard::config::TaskboardConfig;

fn prompt_text(label: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => Input::<String>::new()
            .with_prompt(label)
            .interact_text()
            .with_context(|| format!("Failed to read {}", label.to_lowercase())),
    }
}

fn prompt_password(value: Option<String>, confirm: bool) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    let mut prompt = Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "Passwords do not match");
    }
    prompt.interact().context("Failed to read password")
}

fn store_session(store: &SessionStore, session: &Session) -> Result<()> {
    store.save(session)?;
    println!(
        "Logged in as {} <{}> on {}",
        session.user.name, session.user.email, session.server_url
    );
    Ok(())
}

pub async fn cmd_signup(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    config.ensure_valid()?;
    let store = SessionStore::open(session_file)?;
    let name = prompt_text("Name", name)?;
    let email = prompt_text("Email", email)?;
    let password = prompt_password(password, true)?;

    let server_url = &config.client.server_url;
    let auth = AuthClient::new(server_url)
        .signup(&name, &email, &password)
        .await
        .context("Signup failed")?;
    store_session(&store, &Session::from_auth(server_url, auth))
}

pub async fn cmd_login(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    config.ensure_valid()?;
    let store = SessionStore::open(session_file)?;
    let email = prompt_text("Email", email)?;
    let password = prompt_password(password, false)?;

    let server_url = &config.client.server_url;
    let auth = AuthClient::new(server_url)
        .login(&email, &password)
        .await
        .context("Login failed")?;
    store_session(&store, &Session::from_auth(server_url, auth))
}

/// Revoke the credential on the server and clear it locally. The local copy
/// is cleared even when the server cannot be reached.
pub async fn cmd_logout(session_file: Option<&Path>) -> Result<()> {
    let store = SessionStore::open(session_file)?;
    let Some(session) = store.load()? else {
        println!("Not logged in.");
        return Ok(());
    };

    if let Err(e) = AuthClient::new(&session.server_url)
        .logout(&session.token)
        .await
    {
        tracing::warn!(error = %e, "could not revoke credential on the server");
    }
    store.clear()?;
    println!("Logged out {}.", session.user.email);
    Ok(())
}

pub async fn cmd_whoami(session_file: Option<&Path>) -> Result<()> {
    let store = SessionStore::open(session_file)?;
    let session = store.require()?;
    let user = AuthClient::new(&session.server_url)
        .me(&session.token)
        .await
        .context("Could not verify the stored session")?;
    println!("{} <{}>", user.name, user.email);
    println!("server: {}", session.server_url);
    Ok(())
}
