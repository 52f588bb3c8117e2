//! Training corpus preparation for the external fine-tuning job.
//!
//! Conversations become one text sample each: user turns as `User: ...`, bot turns as
//! `Bot: ...` followed by the end-of-sequence marker. Samples are written as JSONL next to a
//! TOML manifest carrying the trainer hyperparameters. The trainer itself runs elsewhere.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// End-of-sequence marker of the DialoGPT tokenizer family.
pub const DEFAULT_EOS: &str = "<|endoftext|>";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training data io: {0}")]
    Io(#[from] std::io::Error),
    #[error("training data json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("trainer manifest: {0}")]
    Manifest(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingSpeaker {
    User,
    #[serde(alias = "assistant")]
    Bot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingTurn {
    pub speaker: TrainingSpeaker,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConversation {
    pub conversation: Vec<TrainingTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub text: String,
}

/// Hyperparameters handed to the external causal-LM trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerManifest {
    pub base_model: String,
    pub output_dir: String,
    pub num_train_epochs: u32,
    pub per_device_train_batch_size: u32,
    pub learning_rate: f64,
    pub warmup_steps: u32,
    pub save_steps: u32,
    pub save_total_limit: u32,
    pub logging_steps: u32,
    pub max_length: u32,
    /// Causal LM objective (no masked-LM collator).
    pub mlm: bool,
}

impl Default for TrainerManifest {
    fn default() -> Self {
        Self {
            base_model: "microsoft/DialoGPT-medium".to_string(),
            output_dir: "./fine_tuned_model".to_string(),
            num_train_epochs: 3,
            per_device_train_batch_size: 2,
            learning_rate: 5e-5,
            warmup_steps: 100,
            save_steps: 500,
            save_total_limit: 2,
            logging_steps: 100,
            max_length: 512,
            mlm: false,
        }
    }
}

pub fn format_conversation(conv: &TrainingConversation, eos: &str) -> TrainingSample {
    let mut text = String::new();
    for turn in &conv.conversation {
        match turn.speaker {
            TrainingSpeaker::User => {
                text.push_str("User: ");
                text.push_str(&turn.text);
            }
            TrainingSpeaker::Bot => {
                text.push_str("Bot: ");
                text.push_str(&turn.text);
                text.push_str(eos);
            }
        }
    }
    TrainingSample { text }
}

/// Read a JSON array of conversations and format each into a sample.
pub fn prepare_dataset(path: &Path, eos: &str) -> Result<Vec<TrainingSample>, TrainingError> {
    let raw = fs::read_to_string(path)?;
    let conversations: Vec<TrainingConversation> = serde_json::from_str(&raw)?;
    Ok(conversations.iter().map(|c| format_conversation(c, eos)).collect())
}

/// Write samples as JSONL. Returns the number of lines written.
pub fn write_jsonl(samples: &[TrainingSample], path: &Path) -> Result<usize, TrainingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(path)?;
    for s in samples {
        serde_json::to_writer(&mut f, s)?;
        f.write_all(b"\n")?;
    }
    Ok(samples.len())
}

pub fn write_manifest(manifest: &TrainerManifest, path: &Path) -> Result<(), TrainingError> {
    let content = toml::to_string_pretty(manifest)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
