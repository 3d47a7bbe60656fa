//! Offline generative backend.
//!
//! Improvises rounds from stock lines so the CLI runs without a model. The
//! output follows the same JSON turn contract a real backend must honour.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::json;
use stage_director::{BackendRequest, GenerativeBackend, Result};

const OPENERS: &[&str] = &[
    "Fine day, isn't it?",
    "Have you eaten yet?",
    "I heard something odd last night.",
    "The well water tastes different lately.",
    "Someone left the gate open again.",
];

const REPLIES: &[&str] = &[
    "Can't complain.",
    "Not yet, maybe later.",
    "You worry too much.",
    "I noticed that too.",
    "That explains a lot.",
    "Let's not start this again.",
];

/// Improvising backend.
pub struct ImprovBackend {
    rng: Mutex<StdRng>,
    latency: Duration,
}

impl ImprovBackend {
    /// Create a backend answering after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            latency,
        }
    }

    fn improvise(&self, request: &BackendRequest) -> String {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut turns = Vec::new();
        for (i, speaker) in request.whitelist.iter().enumerate() {
            // Now and then a participant stays quiet.
            if i > 0 && rng.gen_bool(0.1) {
                continue;
            }
            let pool = if i == 0 && request.round == 1 {
                OPENERS
            } else {
                REPLIES
            };
            let line = pool.choose(&mut *rng).copied().unwrap_or("...");
            turns.push(json!({ "speaker": speaker.as_str(), "content": line }));
        }

        json!(turns).to_string()
    }
}

#[async_trait]
impl GenerativeBackend for ImprovBackend {
    async fn send(&self, request: BackendRequest) -> Result<String> {
        tokio::time::sleep(self.latency).await;
        Ok(self.improvise(&request))
    }
}
