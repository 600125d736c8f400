//! Per-pane send path: records the user's turn, prepares the request, and
//! folds streamed events back into the store.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::chat::ChatConfig;
use crate::core::chat_stream::{StreamMessage, StreamParams, StreamState};
use crate::core::context::ContextWindow;
use crate::core::message::Message;
use crate::core::providers::ProviderSession;
use crate::core::store::{ConversationStore, PaneId, StatePersistence, StoreError};

// Shared across panes so every stream on a service channel has its own id.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A failed write has already been applied in memory and logged by the
/// store; the send path carries on with the unsaved state.
fn saved(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::Write { .. }) => Ok(()),
        other => other,
    }
}

/// What a pane needs to issue a request.
#[derive(Clone)]
pub struct SessionSettings {
    pub client: reqwest::Client,
    pub provider: ProviderSession,
    pub context: ContextWindow,
}

impl SessionSettings {
    pub fn new(provider: ProviderSession, context: ContextWindow) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            context,
        }
    }

    fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            provider: self.provider.provider_id.clone(),
            model: self.provider.model.clone(),
        }
    }
}

struct ActiveStream {
    stream_id: u64,
    chat_id: String,
    cancel_token: CancellationToken,
    state: StreamState,
}

pub struct ChatPane {
    pane: PaneId,
    chat_id: Option<String>,
    active: Option<ActiveStream>,
}

impl ChatPane {
    /// A pane restored from the persisted layout.
    pub fn open<P: StatePersistence>(pane: PaneId, store: &ConversationStore<P>) -> Self {
        let chat_id = store
            .pane_chat(pane)
            .or(match pane {
                PaneId::Primary => store.current_chat_id(),
                PaneId::Secondary => None,
            })
            .map(str::to_owned);
        Self {
            pane,
            chat_id,
            active: None,
        }
    }

    pub fn pane(&self) -> PaneId {
        self.pane
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.stream_id)
    }

    /// Partial answer of the in-flight request, for rendering.
    pub fn live(&self) -> Option<&StreamState> {
        self.active.as_ref().map(|active| &active.state)
    }

    /// Show another chat (or none) in this pane. A running stream is
    /// cancelled first.
    pub fn bind<P: StatePersistence>(
        &mut self,
        store: &mut ConversationStore<P>,
        chat_id: Option<&str>,
    ) -> Result<(), StoreError> {
        saved(store.set_pane_chat(self.pane, chat_id))?;
        if self.pane == PaneId::Primary {
            saved(store.set_current_chat(chat_id))?;
        }
        self.cancel();
        self.chat_id = chat_id.map(str::to_owned);
        Ok(())
    }

    /// Record `text` as the next user turn and return the request to stream.
    ///
    /// Blank input is ignored. A pane without a chat (or whose chat was
    /// deleted) starts a new one. A stream already answering the chat, from
    /// either pane, is cancelled.
    pub fn submit<P: StatePersistence>(
        &mut self,
        store: &mut ConversationStore<P>,
        settings: &SessionSettings,
        text: &str,
    ) -> Result<Option<StreamParams>, StoreError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let chat_id = match self.chat_id.as_deref() {
            Some(id) if store.chat(id).is_some() => id.to_string(),
            _ => {
                let chat = store.new_chat(Some(settings.chat_config()));
                let id = chat.id.clone();
                saved(store.add_chat(chat))?;
                saved(store.set_pane_chat(self.pane, Some(id.as_str())))?;
                self.chat_id = Some(id.clone());
                id
            }
        };

        saved(store.add_message(&chat_id, Message::user(text)))?;
        self.start(store, settings, chat_id).map(Some)
    }

    /// Replace message `index` and everything after it with `text`, then ask
    /// again.
    pub fn edit_and_resubmit<P: StatePersistence>(
        &mut self,
        store: &mut ConversationStore<P>,
        settings: &SessionSettings,
        index: usize,
        text: &str,
    ) -> Result<Option<StreamParams>, StoreError> {
        let Some(chat_id) = self.chat_id.clone() else {
            return self.submit(store, settings, text);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.cancel();
        saved(store.truncate_chat(&chat_id, index))?;
        saved(store.add_message(&chat_id, Message::user(text)))?;
        self.start(store, settings, chat_id).map(Some)
    }

    fn start<P: StatePersistence>(
        &mut self,
        store: &mut ConversationStore<P>,
        settings: &SessionSettings,
        chat_id: String,
    ) -> Result<StreamParams, StoreError> {
        let messages = store
            .chat(&chat_id)
            .map(|chat| chat.messages.as_slice())
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.clone()))?;
        let api_messages = settings.context.build(messages);

        self.cancel();
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();
        debug!(pane = ?self.pane, stream_id, chat_id = %chat_id, "starting stream");
        if let Some(previous) = store.claim_stream(&chat_id, stream_id, cancel_token.clone()) {
            debug!(previous, stream_id, "superseded the stream answering this chat");
        }

        self.active = Some(ActiveStream {
            stream_id,
            chat_id,
            cancel_token: cancel_token.clone(),
            state: StreamState::default(),
        });

        Ok(StreamParams {
            client: settings.client.clone(),
            provider: settings.provider.clone(),
            api_messages,
            cancel_token,
            stream_id,
        })
    }

    /// Fold one service event into the pane. Returns false when the event
    /// belongs to a stream this pane is no longer waiting for, including one
    /// another pane superseded on the same chat.
    ///
    /// An `End` with no content appends nothing, so a chat never holds an
    /// empty assistant turn.
    pub fn apply<P: StatePersistence>(
        &mut self,
        store: &mut ConversationStore<P>,
        message: StreamMessage,
        stream_id: u64,
    ) -> Result<bool, StoreError> {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.stream_id == stream_id)
        else {
            return Ok(false);
        };
        if !store.owns_stream(&active.chat_id, stream_id) {
            debug!(pane = ?self.pane, stream_id, "dropping superseded stream");
            self.active = None;
            return Ok(false);
        }

        match message {
            StreamMessage::Thinking(text) => active.state.thinking.push_str(&text),
            StreamMessage::Chunk(text) => active.state.content.push_str(&text),
            StreamMessage::Error(detail) => {
                let chat_id = std::mem::take(&mut active.chat_id);
                self.active = None;
                store.release_stream(&chat_id, stream_id);
                saved(store.add_message(&chat_id, Message::error(detail)))?;
            }
            StreamMessage::End => {
                let chat_id = std::mem::take(&mut active.chat_id);
                let content = std::mem::take(&mut active.state.content);
                self.active = None;
                store.release_stream(&chat_id, stream_id);
                if !content.is_empty() {
                    saved(store.add_message(&chat_id, Message::assistant(content)))?;
                }
            }
        }
        Ok(true)
    }

    /// Stop the in-flight request. Nothing it produced is kept.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(pane = ?self.pane, stream_id = active.stream_id, "cancelling stream");
            active.cancel_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builtin_providers::ProviderMode;
    use crate::core::message::Role;
    use crate::core::store::MemoryStore;

    fn settings() -> SessionSettings {
        SessionSettings::new(
            ProviderSession {
                provider_id: "ollama".into(),
                provider_display_name: "Ollama".into(),
                mode: ProviderMode::Ollama,
                base_url: "http://localhost:11434".into(),
                api_key: String::new(),
                model: "llama3.2".into(),
            },
            ContextWindow::default(),
        )
    }

    fn store() -> ConversationStore<MemoryStore> {
        ConversationStore::open(MemoryStore::new()).unwrap()
    }

    #[test]
    fn submit_creates_a_chat_and_sends_the_whole_turn() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);

        let params = pane
            .submit(&mut store, &settings(), "Hello there")
            .unwrap()
            .expect("request");

        let chat_id = pane.chat_id().expect("bound chat").to_string();
        let chat = store.chat(&chat_id).unwrap();
        assert_eq!(chat.messages, vec![Message::user("Hello there")]);
        assert_eq!(chat.title, "Hello there");
        assert_eq!(chat.config.as_ref().unwrap().model, "llama3.2");
        assert_eq!(store.pane_chat(PaneId::Primary), Some(chat_id.as_str()));
        assert_eq!(params.api_messages.len(), 1);
        assert_eq!(pane.stream_id(), Some(params.stream_id));
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        assert!(pane.submit(&mut store, &settings(), "  \n").unwrap().is_none());
        assert!(store.chats().is_empty());
    }

    #[test]
    fn end_appends_the_accumulated_answer() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let params = pane.submit(&mut store, &settings(), "Hi").unwrap().unwrap();
        let id = params.stream_id;

        assert!(pane
            .apply(&mut store, StreamMessage::Thinking("hmm".into()), id)
            .unwrap());
        pane.apply(&mut store, StreamMessage::Chunk("Hel".into()), id)
            .unwrap();
        pane.apply(&mut store, StreamMessage::Chunk("lo".into()), id)
            .unwrap();
        assert_eq!(pane.live().unwrap().content, "Hello");
        assert_eq!(pane.live().unwrap().thinking, "hmm");

        pane.apply(&mut store, StreamMessage::End, id).unwrap();
        assert!(!pane.is_streaming());

        let chat = store.chat(pane.chat_id().unwrap()).unwrap();
        assert_eq!(chat.messages.last(), Some(&Message::assistant("Hello")));
    }

    #[test]
    fn empty_answers_append_nothing() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let id = pane.submit(&mut store, &settings(), "Hi").unwrap().unwrap().stream_id;
        pane.apply(&mut store, StreamMessage::End, id).unwrap();
        assert_eq!(store.chat(pane.chat_id().unwrap()).unwrap().messages.len(), 1);
    }

    #[test]
    fn errors_become_assistant_messages_and_drop_partial_text() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let id = pane.submit(&mut store, &settings(), "Hi").unwrap().unwrap().stream_id;

        pane.apply(&mut store, StreamMessage::Chunk("partial".into()), id)
            .unwrap();
        pane.apply(
            &mut store,
            StreamMessage::Error("API Error: model not found".into()),
            id,
        )
        .unwrap();
        // The service always follows an error with End; it is stale by then.
        assert!(!pane.apply(&mut store, StreamMessage::End, id).unwrap());

        let messages = &store.chat(pane.chat_id().unwrap()).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Error: API Error: model not found");
    }

    #[test]
    fn cancelled_streams_leave_the_chat_unchanged() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let params = pane.submit(&mut store, &settings(), "Hi").unwrap().unwrap();
        let id = params.stream_id;

        pane.apply(&mut store, StreamMessage::Chunk("Hel".into()), id)
            .unwrap();
        pane.cancel();
        assert!(params.cancel_token.is_cancelled());
        assert!(pane.live().is_none());

        assert!(!pane
            .apply(&mut store, StreamMessage::Chunk("lo".into()), id)
            .unwrap());
        assert!(!pane.apply(&mut store, StreamMessage::End, id).unwrap());
        assert_eq!(
            store.chat(pane.chat_id().unwrap()).unwrap().messages,
            vec![Message::user("Hi")]
        );
    }

    #[test]
    fn resubmitting_supersedes_the_previous_stream() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let first = pane.submit(&mut store, &settings(), "one").unwrap().unwrap();
        let second = pane.submit(&mut store, &settings(), "two").unwrap().unwrap();

        assert!(first.cancel_token.is_cancelled());
        assert!(second.stream_id > first.stream_id);
        assert!(!pane
            .apply(&mut store, StreamMessage::Chunk("old".into()), first.stream_id)
            .unwrap());
        assert_eq!(second.api_messages.len(), 2);
    }

    #[test]
    fn editing_truncates_before_resending() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let id = pane.submit(&mut store, &settings(), "typo").unwrap().unwrap().stream_id;
        pane.apply(&mut store, StreamMessage::Chunk("answer".into()), id)
            .unwrap();
        pane.apply(&mut store, StreamMessage::End, id).unwrap();

        let params = pane
            .edit_and_resubmit(&mut store, &settings(), 0, "fixed")
            .unwrap()
            .unwrap();
        assert_eq!(params.api_messages.len(), 1);
        assert_eq!(params.api_messages[0].content, "fixed");
        assert_eq!(
            store.chat(pane.chat_id().unwrap()).unwrap().messages,
            vec![Message::user("fixed")]
        );
    }

    #[test]
    fn panes_stream_independently() {
        let mut store = store();
        store.set_split(true).unwrap();
        let mut left = ChatPane::open(PaneId::Primary, &store);
        let mut right = ChatPane::open(PaneId::Secondary, &store);

        let left_id = left.submit(&mut store, &settings(), "left").unwrap().unwrap().stream_id;
        let right_id = right
            .submit(&mut store, &settings(), "right")
            .unwrap()
            .unwrap()
            .stream_id;
        assert_ne!(left.chat_id(), right.chat_id());

        assert!(!left
            .apply(&mut store, StreamMessage::Chunk("R".into()), right_id)
            .unwrap());
        right
            .apply(&mut store, StreamMessage::Chunk("R".into()), right_id)
            .unwrap();
        left.cancel();
        right.apply(&mut store, StreamMessage::End, right_id).unwrap();
        assert!(!left.apply(&mut store, StreamMessage::End, left_id).unwrap());

        assert_eq!(store.chat(left.chat_id().unwrap()).unwrap().messages.len(), 1);
        assert_eq!(
            store.chat(right.chat_id().unwrap()).unwrap().messages.last(),
            Some(&Message::assistant("R"))
        );
    }

    #[test]
    fn one_stream_answers_a_chat_shown_in_both_panes() {
        let mut store = store();
        store.set_split(true).unwrap();
        let mut left = ChatPane::open(PaneId::Primary, &store);
        left.submit(&mut store, &settings(), "warm up").unwrap();
        left.cancel();
        let chat_id = left.chat_id().unwrap().to_string();
        let mut right = ChatPane::open(PaneId::Secondary, &store);
        right.bind(&mut store, Some(chat_id.as_str())).unwrap();

        let first = left.submit(&mut store, &settings(), "q1").unwrap().unwrap();
        let second = right.submit(&mut store, &settings(), "q2").unwrap().unwrap();
        assert!(first.cancel_token.is_cancelled());
        assert!(!second.cancel_token.is_cancelled());

        assert!(!left
            .apply(&mut store, StreamMessage::Chunk("A1".into()), first.stream_id)
            .unwrap());
        assert!(!left.is_streaming());
        assert!(!left.apply(&mut store, StreamMessage::End, first.stream_id).unwrap());
        right
            .apply(&mut store, StreamMessage::Chunk("B1".into()), second.stream_id)
            .unwrap();
        right.apply(&mut store, StreamMessage::End, second.stream_id).unwrap();

        let contents: Vec<&str> = store
            .chat(&chat_id)
            .unwrap()
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["warm up", "q1", "q2", "B1"]);
        assert!(!store.owns_stream(&chat_id, second.stream_id));
    }

    #[test]
    fn deleting_a_chat_drops_its_answer() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        let params = pane.submit(&mut store, &settings(), "Hi").unwrap().unwrap();
        let chat_id = pane.chat_id().unwrap().to_string();

        store.delete_chat(&chat_id).unwrap();
        assert!(params.cancel_token.is_cancelled());
        assert!(!pane
            .apply(&mut store, StreamMessage::End, params.stream_id)
            .unwrap());
        assert!(!pane.is_streaming());
    }

    struct ReadOnlyDisk;

    impl StatePersistence for ReadOnlyDisk {
        fn load(&self) -> Result<Option<crate::core::store::AppState>, StoreError> {
            Ok(None)
        }

        fn save(&mut self, _state: &crate::core::store::AppState) -> Result<(), StoreError> {
            Err(StoreError::Write {
                path: "/read-only/state.json".into(),
                source: "read-only file system".into(),
            })
        }
    }

    #[test]
    fn failed_saves_do_not_stop_the_conversation() {
        let mut store = ConversationStore::open(ReadOnlyDisk).unwrap();
        let mut pane = ChatPane::open(PaneId::Primary, &store);

        let params = pane
            .submit(&mut store, &settings(), "Hi")
            .expect("a failed save does not fail the send")
            .expect("request");
        pane.apply(&mut store, StreamMessage::Chunk("Hello".into()), params.stream_id)
            .unwrap();
        pane.apply(&mut store, StreamMessage::End, params.stream_id)
            .unwrap();

        let chat_id = pane.chat_id().expect("bound chat").to_string();
        assert_eq!(
            store.chat(&chat_id).unwrap().messages,
            vec![Message::user("Hi"), Message::assistant("Hello")]
        );

        let again = pane
            .edit_and_resubmit(&mut store, &settings(), 0, "Hey")
            .unwrap()
            .expect("request");
        assert_eq!(again.api_messages.len(), 1);
        pane.bind(&mut store, None).unwrap();
        assert!(pane.chat_id().is_none());
    }

    #[test]
    fn deleted_chats_are_replaced_on_next_submit() {
        let mut store = store();
        let mut pane = ChatPane::open(PaneId::Primary, &store);
        pane.submit(&mut store, &settings(), "first").unwrap();
        let old = pane.chat_id().unwrap().to_string();
        pane.cancel();
        store.delete_chat(&old).unwrap();

        pane.submit(&mut store, &settings(), "again").unwrap();
        assert_ne!(pane.chat_id(), Some(old.as_str()));
        assert_eq!(store.chats().len(), 1);
    }
}
