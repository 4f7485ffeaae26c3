//! Session persistence: bearer token, minimal user identity and the voice
//! handed from the voice browser to clip creation.
//!
//! Storage sits behind [`SessionStore`] so the context can be backed by a
//! JSON file on disk or by memory in tests and embedders.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::protocol::{User, Voice};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<User> for SessionUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceChoice {
    pub id: String,
    pub name: String,
}

impl From<Voice> for VoiceChoice {
    fn from(v: Voice) -> Self {
        Self { id: v.id, name: v.name }
    }
}

/// Everything kept between runs. The selected voice survives logout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<SessionUser>,
    #[serde(default)]
    pub selected_voice: Option<VoiceChoice>,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> anyhow::Result<SessionState>;
    fn save(&self, state: &SessionState) -> anyhow::Result<()>;
    /// Forget everything, including the selected voice.
    fn clear(&self) -> anyhow::Result<()>;
}

/// JSON file store.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> anyhow::Result<SessionState> {
        if !self.path.exists() {
            return Ok(SessionState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file {}", self.path.display()))?;
        match serde_json::from_str::<SessionState>(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                // A corrupt file is treated as logged out rather than fatal
                warn!("Ignoring unreadable session file {:?}: {}", self.path, e);
                Ok(SessionState::default())
            }
        }
    }

    fn save(&self, state: &SessionState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove session file {}", self.path.display())
            }),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<SessionState>,
}

impl MemorySessionStore {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> anyhow::Result<SessionState> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("session store poisoned"))?;
        Ok(state.clone())
    }

    fn save(&self, state: &SessionState) -> anyhow::Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("session store poisoned"))?;
        *guard = state.clone();
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.save(&SessionState::default())
    }
}

/// Explicit session handed to the API client and commands.
pub struct SessionContext {
    store: Box<dyn SessionStore>,
    state: SessionState,
}

impl SessionContext {
    pub fn load(store: Box<dyn SessionStore>) -> anyhow::Result<Self> {
        let state = store.load()?;
        debug!(
            "Session loaded (logged_in={}, voice={:?})",
            state.token.is_some(),
            state.selected_voice.as_ref().map(|v| &v.id)
        );
        Ok(Self { store, state })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemorySessionStore::default()),
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.state.token.as_deref()
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.state.user.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.token.is_some()
    }

    pub fn begin(&mut self, token: String, user: SessionUser) -> anyhow::Result<()> {
        self.state.token = Some(token);
        self.state.user = Some(user);
        self.store.save(&self.state)
    }

    /// Store the token an OAuth redirect delivered as query parameters.
    pub fn accept_callback(&mut self, token: &str, user_id: &str, username: &str) -> anyhow::Result<()> {
        let id = user_id
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Invalid user id in callback: {:?}", user_id))?;
        if token.trim().is_empty() {
            anyhow::bail!("Callback carried an empty token");
        }
        self.begin(
            token.trim().to_string(),
            SessionUser {
                id,
                username: username.to_string(),
                email: None,
            },
        )
    }

    pub fn end(&mut self) -> anyhow::Result<()> {
        self.state.token = None;
        self.state.user = None;
        self.store.save(&self.state)
    }

    /// Drop the whole session, selected voice included.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.state = SessionState::default();
        self.store.clear()
    }

    pub fn selected_voice(&self) -> Option<&VoiceChoice> {
        self.state.selected_voice.as_ref()
    }

    pub fn select_voice(&mut self, voice: VoiceChoice) -> anyhow::Result<()> {
        self.state.selected_voice = Some(voice);
        self.store.save(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user() -> SessionUser {
        SessionUser {
            id: 4,
            username: "ada".to_string(),
            email: Some("ada@example.com".to_string()),
        }
    }

    #[test]
    fn file_store_round_trips_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut ctx = SessionContext::load(Box::new(FileSessionStore::new(path.clone()))).unwrap();
        assert!(!ctx.is_logged_in());
        ctx.begin("tok-1".to_string(), user()).unwrap();
        ctx.select_voice(VoiceChoice {
            id: "en-US-AvaMultilingualNeural".to_string(),
            name: "Ava Multilingual".to_string(),
        })
        .unwrap();

        let reloaded = SessionContext::load(Box::new(FileSessionStore::new(path))).unwrap();
        assert_eq!(reloaded.token(), Some("tok-1"));
        assert_eq!(reloaded.user(), Some(&user()));
        assert_eq!(
            reloaded.selected_voice().map(|v| v.id.as_str()),
            Some("en-US-AvaMultilingualNeural")
        );
    }

    #[test]
    fn logout_keeps_selected_voice() {
        let mut ctx = SessionContext::in_memory();
        ctx.begin("tok".to_string(), user()).unwrap();
        ctx.select_voice(VoiceChoice {
            id: "v".to_string(),
            name: "V".to_string(),
        })
        .unwrap();
        ctx.end().unwrap();
        assert!(!ctx.is_logged_in());
        assert!(ctx.user().is_none());
        assert!(ctx.selected_voice().is_some());
    }

    #[test]
    fn reset_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let mut ctx = SessionContext::load(Box::new(FileSessionStore::new(path.clone()))).unwrap();
        ctx.begin("tok".to_string(), user()).unwrap();
        assert!(path.exists());

        ctx.reset().unwrap();
        assert!(!path.exists());
        assert_eq!(ctx.state(), &SessionState::default());
        // Clearing twice is fine
        ctx.reset().unwrap();
    }

    #[test]
    fn corrupt_file_reads_as_logged_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let state = FileSessionStore::new(path).load().unwrap();
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn callback_parses_user_id() {
        let mut ctx = SessionContext::in_memory();
        ctx.accept_callback("jwt", "12", "grace").unwrap();
        assert_eq!(ctx.user().map(|u| u.id), Some(12));
        assert!(ctx.accept_callback("jwt", "abc", "grace").is_err());
        assert!(ctx.accept_callback(" ", "1", "grace").is_err());
    }
}
