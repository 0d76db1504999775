//! Conversation session state.
//!
//! A [`Session`] binds one ingested document to its conversation history.
//! The service clients created at ingestion travel with the session, so
//! every question in the session is answered with the credential that
//! ingested the document.
//!
//! Mutating operations take `&mut Session`, which makes the borrow checker
//! enforce one question at a time per session. Concurrent conversations
//! use separate sessions.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::embedding::EmbeddingClient;
use crate::llm::ChatClient;
use crate::models::{ConversationTurn, IndexHandle};

pub(crate) struct ActiveDocument {
    pub(crate) handle: IndexHandle,
    pub(crate) embedder: Arc<dyn EmbeddingClient>,
    pub(crate) chat: Arc<dyn ChatClient>,
}

/// One document-grounded conversation.
pub struct Session {
    pub(crate) id: String,
    pub(crate) active: Option<ActiveDocument>,
    pub(crate) turns: Vec<ConversationTurn>,
}

impl Session {
    pub(crate) fn activate(
        handle: IndexHandle,
        embedder: Arc<dyn EmbeddingClient>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            active: Some(ActiveDocument {
                handle,
                embedder,
                chat,
            }),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle of the active document, if any.
    pub fn document(&self) -> Option<&IndexHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    /// Completed turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub(crate) fn append_turn(&mut self, question: String, answer: String) {
        self.turns.push(ConversationTurn {
            question,
            answer,
            asked_at: chrono::Utc::now().timestamp(),
        });
    }

    /// Drop the active document and the conversation history.
    ///
    /// Does not evict the stored index; use
    /// [`Assistant::forget`](crate::assistant::Assistant::forget) for
    /// that. The session stays usable as a value but answers no further
    /// questions until a new ingestion produces a fresh session.
    pub fn clear(&mut self) {
        self.active = None;
        self.turns.clear();
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id.clone(),
            document: self.active.as_ref().map(|a| DocumentStatus {
                document_hash: a.handle.document_hash.clone(),
                passage_count: a.handle.passage_count,
                model: a.handle.model.clone(),
                built_at: a.handle.built_at,
            }),
            turn_count: self.turns.len(),
        }
    }
}

// The service clients carry the credential, so Debug shows the handle
// and turn count only.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("document", &self.active.as_ref().map(|a| &a.handle))
            .field("turns", &self.turns.len())
            .finish()
    }
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub document: Option<DocumentStatus>,
    pub turn_count: usize,
}

/// Document metadata within a [`SessionStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document_hash: String,
    pub passage_count: i64,
    pub model: String,
    pub built_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct NoopEmbedder;

    #[async_trait]
    impl EmbeddingClient for NoopEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
        fn model(&self) -> &str {
            "noop"
        }
        fn dims(&self) -> usize {
            1
        }
    }

    struct NoopChat;

    #[async_trait]
    impl ChatClient for NoopChat {
        async fn complete(&self, _messages: &[crate::llm::ChatMessage]) -> Result<String> {
            Ok(String::new())
        }
    }

    fn handle() -> IndexHandle {
        IndexHandle {
            document_hash: "abc".to_string(),
            passage_count: 3,
            dims: 1,
            model: "noop".to_string(),
            built_at: 0,
        }
    }

    fn session() -> Session {
        Session::activate(handle(), Arc::new(NoopEmbedder), Arc::new(NoopChat))
    }

    #[test]
    fn activation_yields_unique_ids() {
        assert_ne!(session().id(), session().id());
    }

    #[test]
    fn turns_append_in_order() {
        let mut s = session();
        s.append_turn("q1".to_string(), "a1".to_string());
        s.append_turn("q2".to_string(), "a2".to_string());

        let turns = s.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question, "q1");
        assert_eq!(turns[1].question, "q2");
    }

    #[test]
    fn clear_drops_document_and_history() {
        let mut s = session();
        s.append_turn("q".to_string(), "a".to_string());
        s.clear();

        assert!(s.document().is_none());
        assert!(s.turns().is_empty());

        let status = s.status();
        assert!(status.document.is_none());
        assert_eq!(status.turn_count, 0);
    }

    #[test]
    fn debug_shows_document_but_no_clients() {
        let s = session();
        let printed = format!("{:?}", s);
        assert!(printed.contains(s.id()));
        assert!(printed.contains("abc"));
        assert!(!printed.contains("embedder"));
        assert!(!printed.contains("chat"));
    }

    #[test]
    fn status_reflects_document() {
        let s = session();
        let status = s.status();
        assert_eq!(status.document.unwrap().passage_count, 3);
        assert_eq!(status.turn_count, 0);
    }
}
