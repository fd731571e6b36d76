//! In-memory test double for [`StyleBackend`].

use async_trait::async_trait;
use std::sync::Mutex;

use super::StyleBackend;
use crate::error::Result;
use crate::protocol::{Reply, Request};

/// A test double that records every call and answers with fixed text.
pub struct RecordingBackend {
    reply: String,
    calls: Mutex<Vec<Request>>,
}

impl RecordingBackend {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, request: Request) -> Result<Reply> {
        self.calls.lock().unwrap().push(request);
        Ok(Reply::text(self.reply.clone()))
    }
}

#[async_trait]
impl StyleBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn seed(&self, user_id: &str, samples: &[String]) -> Result<Reply> {
        self.record(Request::Seed {
            user_id: user_id.to_string(),
            samples: samples.to_vec(),
        })
    }

    async fn generate(&self, user_id: &str, prompt: &str) -> Result<Reply> {
        self.record(Request::Generate {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
        })
    }

    async fn summarize_nudges(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        self.record(Request::NudgeSummary {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            nudges: nudges.to_vec(),
        })
    }

    async fn draft_nudge_email(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        self.record(Request::NudgeEmail {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            nudges: nudges.to_vec(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
