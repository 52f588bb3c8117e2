//! Response Enhancer: post-processes raw generator output for a supportive register.
//!
//! Short or empty output is replaced by a default supportive message. Distress triggers in
//! the user's text prepend a supportive phrase, and a follow-up question is appended with a
//! configurable probability. Randomness comes from an injected seeded RNG so replies are
//! reproducible in tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

const SUPPORTIVE_PHRASES: &[&str] = &[
    "I understand that must be difficult.",
    "Thank you for sharing that with me.",
    "It sounds like you're going through a lot.",
    "Your feelings are completely valid.",
    "I'm here to listen and support you.",
];

const FOLLOW_UP_QUESTIONS: &[&str] = &[
    "How long have you been feeling this way?",
    "What do you think might have triggered these feelings?",
    "Have you talked to anyone else about this?",
    "What usually helps you feel better?",
    "Would you like to explore this feeling more?",
];

const DEFAULT_RESPONSES: &[&str] = &[
    "I'm here to listen. How are you feeling right now?",
    "Thank you for reaching out. What's on your mind today?",
    "I want to support you. Can you tell me more about what you're experiencing?",
    "It's okay to take your time. I'm here when you're ready to share.",
];

/// Substring triggers (matched against the lower-cased user text).
const DISTRESS_TRIGGERS: &[&str] = &[
    "sad", "depressed", "anxious", "worried", "scared",
    "lonely", "hopeless", "tired", "overwhelmed", "stressed",
];

pub const DEFAULT_MIN_RESPONSE_LEN: usize = 5;
pub const DEFAULT_FOLLOW_UP_PROBABILITY: f64 = 0.3;

pub struct ResponseEnhancer {
    min_response_len: usize,
    follow_up_probability: f64,
    rng: Mutex<StdRng>,
}

impl Default for ResponseEnhancer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RESPONSE_LEN, DEFAULT_FOLLOW_UP_PROBABILITY, None)
    }
}

impl ResponseEnhancer {
    /// `seed = None` seeds from OS entropy.
    pub fn new(min_response_len: usize, follow_up_probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            min_response_len,
            follow_up_probability: if follow_up_probability.is_nan() { 0.0 } else { follow_up_probability.clamp(0.0, 1.0) },
            rng: Mutex::new(rng),
        }
    }

    pub fn enhance(&self, raw_response: &str, user_text: &str) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        self.enhance_with(&mut *rng, raw_response, user_text)
    }

    /// Same as [`enhance`](Self::enhance) with a caller-supplied RNG.
    pub fn enhance_with<R: Rng + ?Sized>(&self, rng: &mut R, raw_response: &str, user_text: &str) -> String {
        let trimmed = raw_response.trim();
        if trimmed.chars().count() < self.min_response_len {
            return pick(rng, DEFAULT_RESPONSES);
        }

        let mut out = if needs_empathy(user_text) {
            format!("{} {}", pick(rng, SUPPORTIVE_PHRASES), raw_response)
        } else {
            raw_response.to_string()
        };

        if rng.gen_bool(self.follow_up_probability) {
            out.push(' ');
            out.push_str(&pick(rng, FOLLOW_UP_QUESTIONS));
        }
        out
    }

    pub fn default_response(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        pick(&mut *rng, DEFAULT_RESPONSES)
    }

    pub fn is_default_response(text: &str) -> bool {
        DEFAULT_RESPONSES.contains(&text)
    }
}

pub fn needs_empathy(user_text: &str) -> bool {
    let lower = user_text.to_lowercase();
    DISTRESS_TRIGGERS.iter().any(|t| lower.contains(t))
}

fn pick<R: Rng + ?Sized>(rng: &mut R, options: &[&str]) -> String {
    options.choose(rng).copied().unwrap_or_default().to_string()
}
