//! Conversational retrieval engine.
//!
//! One question flows through four stages:
//!
//! 1. **Condense** — when the session has history, a chat call rewrites the
//!    follow-up into a standalone question so retrieval is not thrown off
//!    by pronouns. A first question skips this stage.
//! 2. **Embed** — the standalone question becomes a query vector.
//! 3. **Retrieve** — the store ranks the document's passages against it.
//! 4. **Generate** — one chat call answers the original question from the
//!    retrieved passages plus the full conversation history.
//!
//! The turn is appended to the session only after generation succeeds, so
//! a failed question never pollutes the history it would later be
//! condensed against.

use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::models::{ConversationTurn, GroundedAnswer, ScoredPassage};
use crate::session::{ActiveDocument, Session};
use crate::store::IndexStore;

const CONDENSE_INSTRUCTIONS: &str = "Rewrite the follow-up question as a single standalone \
question, using the conversation so far to resolve pronouns and references. Reply with the \
rewritten question only.";

const ANSWER_INSTRUCTIONS: &str = "You answer questions about a document. Ground every answer \
in the passages below. If the passages do not contain the answer, say that the document does \
not cover it instead of guessing.";

/// Answer a question within a session, appending the turn on success.
pub(crate) async fn answer(
    store: &dyn IndexStore,
    top_k: usize,
    session: &mut Session,
    question: &str,
) -> Result<GroundedAnswer> {
    let active = session
        .active
        .as_ref()
        .ok_or_else(|| Error::IndexNotFound("session has no active document".to_string()))?;

    let answer = run(store, top_k, active, &session.turns, question).await?;
    session.append_turn(question.to_string(), answer.text.clone());
    Ok(answer)
}

/// Answer a question against a session's document without reading or
/// writing its history.
pub(crate) async fn answer_detached(
    store: &dyn IndexStore,
    top_k: usize,
    session: &Session,
    question: &str,
) -> Result<GroundedAnswer> {
    let active = session
        .active
        .as_ref()
        .ok_or_else(|| Error::IndexNotFound("session has no active document".to_string()))?;

    run(store, top_k, active, &[], question).await
}

async fn run(
    store: &dyn IndexStore,
    top_k: usize,
    active: &ActiveDocument,
    history: &[ConversationTurn],
    question: &str,
) -> Result<GroundedAnswer> {
    let standalone = if history.is_empty() {
        question.to_string()
    } else {
        active.chat.complete(&condense_messages(history, question)).await?
    };

    let vectors = active.embedder.embed(&[standalone]).await?;
    let query_vector = vectors.into_iter().next().ok_or_else(|| {
        Error::EmbeddingService("service returned no vector for the question".to_string())
    })?;

    let sources = store.retrieve(&active.handle, &query_vector, top_k).await?;

    let messages = generation_messages(&sources, history, question);
    let text = active.chat.complete(&messages).await?;

    Ok(GroundedAnswer { text, sources })
}

fn condense_messages(history: &[ConversationTurn], question: &str) -> Vec<ChatMessage> {
    let mut transcript = String::new();
    for turn in history {
        transcript.push_str("User: ");
        transcript.push_str(&turn.question);
        transcript.push('\n');
        transcript.push_str("Assistant: ");
        transcript.push_str(&turn.answer);
        transcript.push('\n');
    }

    vec![
        ChatMessage::system(CONDENSE_INSTRUCTIONS),
        ChatMessage::user(format!(
            "Conversation so far:\n{}\nFollow-up question: {}",
            transcript, question
        )),
    ]
}

/// Build the generation request: grounding passages in the system message
/// (retrieval order), then the history as alternating turns, then the
/// user's original question.
fn generation_messages(
    sources: &[ScoredPassage],
    history: &[ConversationTurn],
    question: &str,
) -> Vec<ChatMessage> {
    let passages = sources
        .iter()
        .map(|s| s.passage.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\nPassages:\n\n{}",
        ANSWER_INSTRUCTIONS, passages
    )));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::embedding::EmbeddingClient;
    use crate::llm::ChatClient;
    use crate::models::Passage;
    use crate::store::memory::InMemoryStore;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn model(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
    }

    struct CountingChat {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingChat {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ChatClient for CountingChat {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::GenerationService("boom".to_string()));
            }
            Ok("canned answer".to_string())
        }
    }

    fn passage(seq: i64, text: &str) -> Passage {
        Passage {
            seq,
            start_char: 0,
            end_char: text.chars().count(),
            text: text.to_string(),
        }
    }

    async fn seeded_store() -> (InMemoryStore, crate::models::IndexHandle) {
        let store = InMemoryStore::new();
        let handle = store
            .build(
                "doc-hash",
                &[passage(0, "alpha"), passage(1, "beta")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "fixed",
                2,
            )
            .await
            .unwrap();
        (store, handle)
    }

    fn session_for(handle: crate::models::IndexHandle, chat: Arc<CountingChat>) -> Session {
        Session::activate(handle, Arc::new(FixedEmbedder), chat)
    }

    #[tokio::test]
    async fn answering_appends_the_turn() {
        let (store, handle) = seeded_store().await;
        let chat = CountingChat::new(false);
        let mut session = session_for(handle, chat);

        let answer = answer(&store, 2, &mut session, "what is alpha?")
            .await
            .unwrap();

        assert_eq!(answer.text, "canned answer");
        assert!(!answer.sources.is_empty());
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.turns()[0].question, "what is alpha?");
        assert_eq!(session.turns()[0].answer, "canned answer");
    }

    #[tokio::test]
    async fn first_question_skips_condense() {
        let (store, handle) = seeded_store().await;
        let chat = CountingChat::new(false);
        let mut session = session_for(handle, chat.clone());

        answer(&store, 2, &mut session, "first").await.unwrap();
        // Generation only.
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);

        answer(&store, 2, &mut session, "and then?").await.unwrap();
        // Condense plus generation.
        assert_eq!(chat.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_unchanged() {
        let (store, handle) = seeded_store().await;
        let chat = CountingChat::new(true);
        let mut session = session_for(handle, chat);

        let err = answer(&store, 2, &mut session, "q").await.unwrap_err();
        assert!(matches!(err, Error::GenerationService(_)));
        assert!(session.turns().is_empty());
    }

    #[tokio::test]
    async fn detached_answers_without_touching_history() {
        let (store, handle) = seeded_store().await;
        let chat = CountingChat::new(false);
        let mut session = session_for(handle, chat.clone());

        answer(&store, 2, &mut session, "first").await.unwrap();
        let detached = answer_detached(&store, 2, &session, "side question")
            .await
            .unwrap();

        assert_eq!(detached.text, "canned answer");
        assert_eq!(session.turns().len(), 1);
        // Detached questions never condense, even with history present.
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cleared_session_cannot_answer() {
        let (store, handle) = seeded_store().await;
        let chat = CountingChat::new(false);
        let mut session = session_for(handle, chat);
        session.clear();

        let err = answer(&store, 2, &mut session, "q").await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }

    #[test]
    fn generation_messages_keep_retrieval_order_and_end_with_question() {
        let sources = vec![
            ScoredPassage {
                passage: passage(3, "most relevant"),
                score: 0.9,
            },
            ScoredPassage {
                passage: passage(0, "less relevant"),
                score: 0.5,
            },
        ];
        let history = vec![ConversationTurn {
            question: "earlier q".to_string(),
            answer: "earlier a".to_string(),
            asked_at: 0,
        }];

        let messages = generation_messages(&sources, &history, "the follow-up");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        let most = messages[0].content.find("most relevant").unwrap();
        let less = messages[0].content.find("less relevant").unwrap();
        assert!(most < less);
        assert_eq!(messages[1].content, "earlier q");
        assert_eq!(messages[2].content, "earlier a");
        assert_eq!(messages[3].role, "user");
        assert_eq!(messages[3].content, "the follow-up");
    }

    #[test]
    fn condense_messages_carry_transcript_and_follow_up() {
        let history = vec![ConversationTurn {
            question: "who is Ishmael?".to_string(),
            answer: "the narrator".to_string(),
            asked_at: 0,
        }];

        let messages = condense_messages(&history, "where does he sail from?");

        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("who is Ishmael?"));
        assert!(messages[1].content.contains("the narrator"));
        assert!(messages[1].content.contains("where does he sail from?"));
    }
}
