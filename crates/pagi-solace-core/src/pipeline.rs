//! Conversation Pipeline: filter → generate → post-process → log, scoped to one session.
//!
//! The session's turn lock is held from classification until the bot reply is logged, so two
//! requests for the same session never interleave. Generation and logging faults degrade to
//! a default reply and a warning; only empty input is an error for the caller.

use crate::config::SolaceConfig;
use crate::enhancer::ResponseEnhancer;
use crate::error::ChatError;
use crate::filter::ContentFilter;
use crate::generator::TextGenerator;
use crate::interaction_log::{InteractionLog, Speaker};
use crate::session::{InMemorySessionStore, SessionStore, Turn};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_CONTEXT_TURNS: usize = 3;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_logged_sessions: usize,
}

/// The most recent `n` turns (all of them when history is shorter).
pub fn context_window(history: &[Turn], n: usize) -> &[Turn] {
    &history[history.len().saturating_sub(n)..]
}

/// `"User: ..\nBot: ..\n"` for each turn in the window, followed by the new user text.
pub fn build_prompt(history: &[Turn], user_text: &str, window: usize) -> String {
    let mut prompt = String::new();
    for turn in context_window(history, window) {
        prompt.push_str("User: ");
        prompt.push_str(&turn.user);
        prompt.push_str("\nBot: ");
        prompt.push_str(&turn.bot);
        prompt.push('\n');
    }
    prompt.push_str(user_text);
    prompt
}

pub struct ConversationPipeline {
    filter: ContentFilter,
    enhancer: ResponseEnhancer,
    generator: Arc<dyn TextGenerator>,
    sessions: Arc<dyn SessionStore>,
    log: Arc<InteractionLog>,
    context_turns: usize,
    max_new_tokens: u32,
}

impl ConversationPipeline {
    pub fn new(
        filter: ContentFilter,
        enhancer: ResponseEnhancer,
        generator: Arc<dyn TextGenerator>,
        sessions: Arc<dyn SessionStore>,
        log: Arc<InteractionLog>,
    ) -> Self {
        Self {
            filter,
            enhancer,
            generator,
            sessions,
            log,
            context_turns: DEFAULT_CONTEXT_TURNS,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }

    /// Wire every component from config. Word-list or log-path problems fail startup.
    pub fn from_config(cfg: &SolaceConfig, generator: Arc<dyn TextGenerator>) -> Result<Self, ChatError> {
        let filter = ContentFilter::from_paths(
            cfg.stopwords_path.as_deref().map(std::path::Path::new),
            cfg.flagged_terms_path.as_deref().map(std::path::Path::new),
        )
        .map_err(|e| ChatError::Internal(format!("content filter word lists: {}", e)))?;
        let enhancer = ResponseEnhancer::new(cfg.min_response_len, cfg.follow_up_probability, cfg.rng_seed);
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(cfg.session_ttl(), cfg.max_sessions));
        let log = InteractionLog::open(cfg.log_path())
            .map_err(|e| ChatError::Internal(format!("interaction log: {}", e)))?;
        Ok(Self::new(filter, enhancer, generator, sessions, Arc::new(log))
            .with_context_turns(cfg.context_turns)
            .with_max_new_tokens(cfg.max_new_tokens))
    }

    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    pub fn with_max_new_tokens(mut self, tokens: u32) -> Self {
        self.max_new_tokens = tokens;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn log(&self) -> &Arc<InteractionLog> {
        &self.log
    }

    pub async fn handle_message(&self, session_id: Option<&str>, text: &str) -> Result<ChatReply, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let slot = match session_id.filter(|s| !s.is_empty()).and_then(|id| self.sessions.get(id)) {
            Some(slot) => slot,
            None => {
                let slot = self.sessions.create();
                info!(target: "pagi::solace::pipeline", session_id = %slot.id(), "new session");
                slot
            }
        };
        let mut session = slot.lock().await;
        let sid = session.id.clone();

        self.record(&sid, Speaker::User, text);

        let verdict = self.filter.classify(text);
        let reply = if verdict.is_flagged {
            let reply = self.filter.get_canned_response(session.step).to_string();
            session.step += 1;
            info!(target: "pagi::solace::pipeline", session_id = %sid, step = session.step, "flagged message; canned response");
            reply
        } else {
            let prompt = build_prompt(session.history(), text, self.context_turns);
            match self.generator.generate(&prompt, self.max_new_tokens).await {
                Ok(raw) => self.enhancer.enhance(&raw, text),
                Err(e) => {
                    error!(
                        target: "pagi::solace::pipeline",
                        session_id = %sid,
                        generator = self.generator.name(),
                        error = %e,
                        "generation failed; using default response"
                    );
                    self.enhancer.default_response()
                }
            }
        };

        session.push_turn(text, reply.clone());
        info!(
            target: "pagi::solace::pipeline",
            session_id = %sid,
            turns = session.history().len(),
            flagged = verdict.is_flagged,
            mental_health_terms = self.filter.contains_mental_health_keywords(text),
            "turn recorded"
        );
        self.record(&sid, Speaker::Bot, &reply);
        drop(session);
        slot.touch();

        Ok(ChatReply {
            response: reply,
            session_id: sid,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Best-effort log append; failures never reach the caller.
    fn record(&self, session_id: &str, speaker: Speaker, message: &str) {
        if let Err(e) = self.log.append(session_id, speaker, message) {
            warn!(target: "pagi::solace::pipeline", session_id = %session_id, error = %e, "interaction log append failed");
        }
    }

    pub fn stats(&self) -> SessionStats {
        let total_logged_sessions = self.log.count_sessions().unwrap_or_else(|e| {
            warn!(target: "pagi::solace::pipeline", error = %e, "interaction log unreadable");
            0
        });
        SessionStats {
            active_sessions: self.sessions.active_count(),
            total_logged_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed reply and records every prompt it was given.
    struct StubGenerator {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) })
        }
        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err(()), prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, prompt: &str, _max_new_tokens: u32) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|_| GenerationError::Empty)
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    fn pipeline(dir: &tempfile::TempDir, generator: Arc<dyn TextGenerator>) -> ConversationPipeline {
        ConversationPipeline::new(
            ContentFilter::default(),
            ResponseEnhancer::new(5, 0.0, Some(9)),
            generator,
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InteractionLog::open(dir.path().join("sessions.log")).unwrap()),
        )
    }

    fn turn(u: &str, b: &str) -> Turn {
        Turn { user: u.to_string(), bot: b.to_string() }
    }

    #[test]
    fn window_is_bounded() {
        let history: Vec<_> = (0..10).map(|i| turn(&format!("u{i}"), &format!("b{i}"))).collect();
        assert_eq!(context_window(&history, 3).len(), 3);
        assert_eq!(context_window(&history, 3)[0].user, "u7");
        assert_eq!(context_window(&history[..2], 3).len(), 2);
        assert!(context_window(&[], 3).is_empty());
    }

    #[test]
    fn prompt_format() {
        let history = vec![turn("hi", "hello"), turn("how", "fine")];
        assert_eq!(build_prompt(&history, "next", 1), "User: how\nBot: fine\nnext");
        assert_eq!(build_prompt(&[], "first", 3), "first");
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, StubGenerator::ok("unused"));
        for text in ["", "   ", "\n\t"] {
            assert!(matches!(p.handle_message(None, text).await, Err(ChatError::EmptyInput)));
        }
        assert_eq!(p.sessions().active_count(), 0);
        assert_eq!(p.stats().total_logged_sessions, 0);
    }

    #[tokio::test]
    async fn flagged_messages_rotate_canned_responses() {
        let dir = tempfile::tempdir().unwrap();
        let gen = StubGenerator::ok("unused");
        let p = pipeline(&dir, gen.clone());
        let filter = ContentFilter::default();

        let first = p.handle_message(None, "I feel hopeless").await.unwrap();
        assert_eq!(first.response, filter.get_canned_response(0));
        let second = p.handle_message(Some(&first.session_id), "I feel worthless").await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.response, filter.get_canned_response(1));

        let slot = p.sessions().get(&first.session_id).unwrap();
        assert_eq!(slot.lock().await.step, 2);
        assert!(gen.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unflagged_message_goes_through_generator() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, StubGenerator::ok("It's sunny."));
        let reply = p.handle_message(None, "Tell me about the weather").await.unwrap();
        assert_eq!(reply.response, "It's sunny.");
        let slot = p.sessions().get(&reply.session_id).unwrap();
        let session = slot.lock().await;
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.step, 0);
    }

    #[tokio::test]
    async fn prompt_never_carries_more_than_three_turns() {
        let dir = tempfile::tempdir().unwrap();
        let gen = StubGenerator::ok("Noted, go on.");
        let p = pipeline(&dir, gen.clone());
        let mut sid: Option<String> = None;
        for i in 0..6 {
            let r = p.handle_message(sid.as_deref(), &format!("message {i}")).await.unwrap();
            sid = Some(r.session_id);
        }
        let prompts = gen.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 6);
        assert!(prompts.iter().all(|p| p.matches("User: ").count() <= 3));
        assert_eq!(prompts[5], "User: message 2\nBot: Noted, go on.\nUser: message 3\nBot: Noted, go on.\nUser: message 4\nBot: Noted, go on.\nmessage 5");

        let slot = p.sessions().get(sid.as_deref().unwrap()).unwrap();
        assert_eq!(slot.lock().await.history().len(), 6);
    }

    #[tokio::test]
    async fn generation_failure_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, StubGenerator::failing());
        let reply = p.handle_message(None, "Tell me about the weather").await.unwrap();
        assert!(ResponseEnhancer::is_default_response(&reply.response));
    }

    #[tokio::test]
    async fn unknown_session_id_mints_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, StubGenerator::ok("Hello there."));
        let reply = p.handle_message(Some("stale-id"), "hello").await.unwrap();
        assert_ne!(reply.session_id, "stale-id");
        assert_eq!(p.sessions().active_count(), 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failing_log_sink_does_not_block_reply() {
        let p = ConversationPipeline::new(
            ContentFilter::default(),
            ResponseEnhancer::new(5, 0.0, Some(9)),
            StubGenerator::ok("It's sunny."),
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InteractionLog::open("/dev/full").unwrap()),
        );
        assert!(p.log().append("x", Speaker::User, "disk check").is_err());

        let flagged = p.handle_message(None, "I feel hopeless").await.unwrap();
        assert_eq!(flagged.response, ContentFilter::default().get_canned_response(0));
        let plain = p
            .handle_message(Some(&flagged.session_id), "Tell me about the weather")
            .await
            .unwrap();
        assert_eq!(plain.response, "It's sunny.");
        assert_eq!(plain.session_id, flagged.session_id);

        let slot = p.sessions().get(&flagged.session_id).unwrap();
        assert_eq!(slot.lock().await.history().len(), 2);
    }

    #[tokio::test]
    async fn both_sides_of_each_turn_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, StubGenerator::ok("It's sunny."));
        let reply = p.handle_message(None, "  Tell me about the weather  ").await.unwrap();
        let entries = p.log().query(&reply.session_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[0].message, "Tell me about the weather");
        assert_eq!(entries[1].speaker, Speaker::Bot);
        assert_eq!(entries[1].message, "It's sunny.");
        assert_eq!(p.stats().total_logged_sessions, 1);
        assert_eq!(p.stats().active_sessions, 1);
    }
}
