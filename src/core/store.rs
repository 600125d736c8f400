//! Persisted application state: chats, selection, pane layout, provider and
//! model choice, API keys.
//!
//! [`ConversationStore`] owns the state and writes it through a
//! [`StatePersistence`] port after every successful mutation. Operations on
//! chat ids that do not exist fail with [`StoreError::ChatNotFound`] and leave
//! the state untouched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat::{Chat, ChatConfig};
use crate::core::config::io::write_atomically;
use crate::core::config::path_display;
use crate::core::message::Message;

const DEFAULT_PROVIDER: &str = "ollama";

/// One of the two chat panes of the split view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaneId {
    Primary,
    Secondary,
}

impl PaneId {
    fn index(self) -> usize {
        match self {
            PaneId::Primary => 0,
            PaneId::Secondary => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub split: bool,
    #[serde(default)]
    pub panes: [Option<String>; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub has_completed_setup: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub current_chat_id: Option<String>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default = "default_true")]
    pub is_sidebar_open: bool,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            has_completed_setup: false,
            provider: default_provider(),
            model: String::new(),
            api_keys: BTreeMap::new(),
            chats: Vec::new(),
            current_chat_id: None,
            layout: Layout::default(),
            is_sidebar_open: true,
        }
    }
}

impl AppState {
    /// Stored key for `provider`, or an empty string.
    pub fn api_key(&self, provider: &str) -> &str {
        self.api_keys
            .get(&provider.to_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn chat(&self, chat_id: &str) -> Option<&Chat> {
        self.chats.iter().find(|chat| chat.id == chat_id)
    }

    fn chat_mut(&mut self, chat_id: &str) -> Result<&mut Chat, StoreError> {
        self.chats
            .iter_mut()
            .find(|chat| chat.id == chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))
    }

    fn require_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        match self.chat(chat_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::ChatNotFound(chat_id.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// The operation named a chat id that is not in the store.
    ChatNotFound(String),

    /// Failed to read the persisted state.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The persisted state is not a valid state document.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to write the state. The in-memory mutation has been applied.
    Write {
        path: PathBuf,
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ChatNotFound(id) => write!(f, "No chat with id '{id}'"),
            StoreError::Read { path, source } => {
                write!(f, "Failed to read chats at {}: {}", path_display(path), source)
            }
            StoreError::Parse { path, source } => {
                write!(f, "Failed to parse chats at {}: {}", path_display(path), source)
            }
            StoreError::Write { path, source } => {
                write!(f, "Failed to save chats to {}: {}", path_display(path), source)
            }
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::ChatNotFound(_) => None,
            StoreError::Read { source, .. } => Some(source),
            StoreError::Parse { source, .. } => Some(source),
            StoreError::Write { source, .. } => Some(source.as_ref()),
        }
    }
}

/// Durable storage for the whole state document: read once on startup,
/// written after every mutation.
pub trait StatePersistence: Send {
    fn load(&self) -> Result<Option<AppState>, StoreError>;
    fn save(&mut self, state: &AppState) -> Result<(), StoreError>;
}

/// State stored as a single JSON document on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatePersistence for JsonFileStore {
    fn load(&self) -> Result<Option<AppState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let state = serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &AppState) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(state).map_err(|err| StoreError::Write {
            path: self.path.clone(),
            source: Box::new(err),
        })?;
        write_atomically(&self.path, &contents).map_err(|err| StoreError::Write {
            path: self.path.clone(),
            source: Box::new(err),
        })
    }
}

/// In-memory persistence, for tests and sessions that should leave no trace.
#[derive(Default)]
pub struct MemoryStore {
    saved: Option<AppState>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<&AppState> {
        self.saved.as_ref()
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl StatePersistence for MemoryStore {
    fn load(&self) -> Result<Option<AppState>, StoreError> {
        Ok(self.saved.clone())
    }

    fn save(&mut self, state: &AppState) -> Result<(), StoreError> {
        self.saved = Some(state.clone());
        self.saves += 1;
        Ok(())
    }
}

/// The stream currently answering a chat.
struct StreamClaim {
    stream_id: u64,
    cancel_token: CancellationToken,
}

pub struct ConversationStore<P: StatePersistence> {
    state: AppState,
    persistence: P,
    // In-flight streams by chat id. Never persisted.
    streams: HashMap<String, StreamClaim>,
}

impl<P: StatePersistence> ConversationStore<P> {
    /// Load the persisted state, or start from defaults when nothing has been
    /// saved yet.
    pub fn open(persistence: P) -> Result<Self, StoreError> {
        let state = persistence.load()?.unwrap_or_default();
        debug!(chats = state.chats.len(), provider = %state.provider, "state loaded");
        Ok(Self {
            state,
            persistence,
            streams: HashMap::new(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn chats(&self) -> &[Chat] {
        &self.state.chats
    }

    pub fn chat(&self, chat_id: &str) -> Option<&Chat> {
        self.state.chat(chat_id)
    }

    pub fn current_chat_id(&self) -> Option<&str> {
        self.state.current_chat_id.as_deref()
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.current_chat_id().and_then(|id| self.chat(id))
    }

    pub fn api_key(&self, provider: &str) -> &str {
        self.state.api_key(provider)
    }

    pub fn pane_chat(&self, pane: PaneId) -> Option<&str> {
        self.state.layout.panes[pane.index()].as_deref()
    }

    /// Make `stream_id` the only stream answering `chat_id`. A stream that
    /// held the chat before is cancelled and its id returned.
    pub fn claim_stream(
        &mut self,
        chat_id: &str,
        stream_id: u64,
        cancel_token: CancellationToken,
    ) -> Option<u64> {
        let previous = self.streams.insert(
            chat_id.to_string(),
            StreamClaim {
                stream_id,
                cancel_token,
            },
        )?;
        previous.cancel_token.cancel();
        (previous.stream_id != stream_id).then_some(previous.stream_id)
    }

    /// Whether `stream_id` still answers `chat_id`: claimed, not superseded
    /// and not cancelled.
    pub fn owns_stream(&self, chat_id: &str, stream_id: u64) -> bool {
        self.streams.get(chat_id).is_some_and(|claim| {
            claim.stream_id == stream_id && !claim.cancel_token.is_cancelled()
        })
    }

    pub fn release_stream(&mut self, chat_id: &str, stream_id: u64) {
        if self
            .streams
            .get(chat_id)
            .is_some_and(|claim| claim.stream_id == stream_id)
        {
            self.streams.remove(chat_id);
        }
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.persistence.save(&self.state).inspect_err(|err| {
            warn!(%err, "failed to persist chat state");
        })
    }

    /// Prepend `chat` and select it.
    pub fn add_chat(&mut self, chat: Chat) -> Result<(), StoreError> {
        self.state.current_chat_id = Some(chat.id.clone());
        self.state.chats.insert(0, chat);
        self.persist()
    }

    /// An empty chat with an id no stored chat uses. Timestamp ids that
    /// collide are bumped until unique.
    pub fn new_chat(&self, config: Option<ChatConfig>) -> Chat {
        let mut chat = Chat::new();
        while self.state.chat(&chat.id).is_some() {
            let bumped = chat.id.parse::<i64>().map(|millis| millis + 1).unwrap_or_default();
            chat.id = bumped.to_string();
        }
        chat.config = config;
        chat
    }

    /// Create and select an empty chat, returning its id.
    pub fn create_chat(&mut self, config: Option<ChatConfig>) -> Result<String, StoreError> {
        let chat = self.new_chat(config);
        let id = chat.id.clone();
        self.add_chat(chat)?;
        Ok(id)
    }

    pub fn add_message(&mut self, chat_id: &str, message: Message) -> Result<(), StoreError> {
        self.state.chat_mut(chat_id)?.push(message);
        self.persist()
    }

    /// Drop every message from `len` onward. Editing a message is a truncate
    /// followed by an append.
    pub fn truncate_chat(&mut self, chat_id: &str, len: usize) -> Result<(), StoreError> {
        self.state.chat_mut(chat_id)?.messages.truncate(len);
        self.persist()
    }

    pub fn rename_chat(&mut self, chat_id: &str, title: impl Into<String>) -> Result<(), StoreError> {
        self.state.chat_mut(chat_id)?.title = title.into();
        self.persist()
    }

    pub fn set_chat_config(&mut self, chat_id: &str, config: ChatConfig) -> Result<(), StoreError> {
        self.state.chat_mut(chat_id)?.config = Some(config);
        self.persist()
    }

    /// Remove a chat, cancel the stream answering it and clear every
    /// selection that pointed at it.
    pub fn delete_chat(&mut self, chat_id: &str) -> Result<(), StoreError> {
        self.state.require_chat(chat_id)?;
        if let Some(claim) = self.streams.remove(chat_id) {
            claim.cancel_token.cancel();
        }
        self.state.chats.retain(|chat| chat.id != chat_id);
        if self.state.current_chat_id.as_deref() == Some(chat_id) {
            self.state.current_chat_id = None;
        }
        for pane in self.state.layout.panes.iter_mut() {
            if pane.as_deref() == Some(chat_id) {
                *pane = None;
            }
        }
        self.persist()
    }

    pub fn set_current_chat(&mut self, chat_id: Option<&str>) -> Result<(), StoreError> {
        if let Some(id) = chat_id {
            self.state.require_chat(id)?;
        }
        self.state.current_chat_id = chat_id.map(str::to_owned);
        self.persist()
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) -> Result<(), StoreError> {
        self.state.provider = provider.into().to_lowercase();
        self.persist()
    }

    pub fn set_model(&mut self, model: impl Into<String>) -> Result<(), StoreError> {
        self.state.model = model.into();
        self.persist()
    }

    pub fn set_api_key(&mut self, provider: &str, key: impl Into<String>) -> Result<(), StoreError> {
        self.state
            .api_keys
            .insert(provider.to_lowercase(), key.into());
        self.persist()
    }

    pub fn complete_setup(&mut self) -> Result<(), StoreError> {
        self.state.has_completed_setup = true;
        self.persist()
    }

    pub fn set_split(&mut self, split: bool) -> Result<(), StoreError> {
        self.state.layout.split = split;
        if !split {
            self.state.layout.panes[PaneId::Secondary.index()] = None;
        }
        self.persist()
    }

    pub fn set_pane_chat(&mut self, pane: PaneId, chat_id: Option<&str>) -> Result<(), StoreError> {
        if let Some(id) = chat_id {
            self.state.require_chat(id)?;
        }
        self.state.layout.panes[pane.index()] = chat_id.map(str::to_owned);
        self.persist()
    }

    pub fn toggle_sidebar(&mut self) -> Result<(), StoreError> {
        self.state.is_sidebar_open = !self.state.is_sidebar_open;
        self.persist()
    }
}
