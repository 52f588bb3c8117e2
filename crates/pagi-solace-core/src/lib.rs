//! PAGI Solace — Core library.
//! Supportive-chat pipeline: content filter, response enhancer, sessions, interaction log.

pub mod config;
pub mod enhancer;
pub mod error;
pub mod filter;
pub mod generator;
pub mod interaction_log;
pub mod pipeline;
pub mod session;
pub mod training;

pub use config::{LlmMode, SolaceConfig};
pub use enhancer::ResponseEnhancer;
pub use error::{ChatError, GenerationError, LogError};
pub use filter::{ContentFilter, FilterVerdict};
pub use generator::{generator_from_config, MockGenerator, OpenRouterGenerator, TextGenerator};
pub use interaction_log::{ExportSummary, InteractionLog, LogEntry, Speaker};
pub use pipeline::{build_prompt, context_window, ChatReply, ConversationPipeline, SessionStats};
pub use session::{InMemorySessionStore, Session, SessionSlot, SessionState, SessionStore, Turn};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
