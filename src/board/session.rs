//! Durable client-local storage for the bearer credential and the cached
//! user profile.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{AuthResponse, User};

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Service the credential was issued by
    pub server_url: String,
    pub token: String,
    pub user: User,
    pub saved_at: DateTime<Utc>,
}

impl Session {
    pub fn from_auth(server_url: &str, auth: AuthResponse) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            token: auth.token,
            user: auth.user,
            saved_at: Utc::now(),
        }
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/taskboard/session.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(dir.join("taskboard").join(SESSION_FILE))
    }

    /// The store at `path`, or at the default location.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::new(path)),
            None => Ok(Self::new(Self::default_path()?)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", self.path.display()))?;
        Ok(Some(session))
    }

    /// Like `load`, but a missing session is an error telling the user to log in.
    pub fn require(&self) -> Result<Session> {
        self.load()?
            .context("Not logged in. Run `taskboard login` or `taskboard signup` first.")
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        restrict_permissions(&self.path)
    }

    /// Remove the stored session. Returns false when there was none.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove session file: {}", self.path.display()))?;
        Ok(true)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
