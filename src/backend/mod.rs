//! Style backend implementations.
//!
//! This module provides a single interface for the engines that hold a
//! user's writing style: the external process (the default) and an
//! in-process engine talking to the OpenAI API.

pub mod openai;
pub mod process;
pub mod store;

#[cfg(test)]
pub mod mock;

use crate::config::{BackendConfig, Config};
use crate::error::Result;
use crate::protocol::{Reply, Request};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// An engine that can learn a user's style and write in it.
#[async_trait]
pub trait StyleBackend: Send + Sync {
    /// Backend name, for status output.
    fn name(&self) -> &'static str;

    /// Record writing samples for a user.
    async fn seed(&self, user_id: &str, samples: &[String]) -> Result<Reply>;

    /// Draft an email for a user from a prompt.
    async fn generate(&self, user_id: &str, prompt: &str) -> Result<Reply>;

    /// Summarize a list of nudges.
    async fn summarize_nudges(&self, user_id: &str, prompt: &str, nudges: &[String])
        -> Result<Reply>;

    /// Draft an email addressing a list of nudges.
    async fn draft_nudge_email(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply>;

    /// Drop everything the backend keeps for a user.
    async fn forget(&self, user_id: &str) -> Result<Reply> {
        let _ = user_id;
        Err(crate::error::Error::invalid_input(format!(
            "the {} backend cannot forget users",
            self.name()
        )))
    }

    /// Check if the backend is usable.
    async fn health_check(&self) -> Result<()>;
}

/// Route a request to the matching backend call.
pub async fn dispatch(backend: &dyn StyleBackend, request: &Request) -> Result<Reply> {
    match request {
        Request::Seed { user_id, samples } => backend.seed(user_id, samples).await,
        Request::Generate { user_id, prompt } => backend.generate(user_id, prompt).await,
        Request::NudgeSummary {
            user_id,
            prompt,
            nudges,
        } => backend.summarize_nudges(user_id, prompt, nudges).await,
        Request::NudgeEmail {
            user_id,
            prompt,
            nudges,
        } => backend.draft_nudge_email(user_id, prompt, nudges).await,
    }
}

/// Create a backend from configuration.
pub fn create_backend(config: &Config) -> anyhow::Result<Arc<dyn StyleBackend>> {
    match &config.backend {
        BackendConfig::Process {
            program,
            entry,
            args,
            working_dir,
        } => {
            let entry = match entry {
                Some(entry) if !entry.as_os_str().is_empty() => {
                    Some(crate::config::resolve_entry(&Config::config_dir()?, entry))
                }
                _ => None,
            };
            let invoker = process::ProcessInvoker::new(process::InvokerSettings {
                program: program.clone(),
                entry,
                args: args.clone(),
                working_dir: working_dir.clone(),
                max_concurrency: config.pool.max_concurrency,
                timeout: config.pool.timeout_secs.map(std::time::Duration::from_secs),
                exit_policy: config.exit_policy,
            });
            Ok(Arc::new(process::ProcessBackend::new(invoker)))
        }
        BackendConfig::OpenAI {
            model,
            embedding_model,
            api_key,
            base_url,
            store_dir,
        } => {
            let store_dir = match store_dir {
                Some(dir) => dir.clone(),
                None => Config::data_dir()?.join("styles"),
            };
            let mut backend = openai::OpenAIBackend::new(
                model.clone(),
                embedding_model.clone(),
                api_key.clone(),
                store::StyleStore::new(store_dir),
            )
            .context("Failed to create OpenAI backend")?;
            if let Some(url) = base_url {
                backend = backend.with_base_url(url.trim_end_matches('/'));
            }
            Ok(Arc::new(backend))
        }
    }
}
