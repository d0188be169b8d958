//! Per-turn transcript assembly and the send pipeline.
//!
//! A send runs strictly in this order:
//!
//! 1. Validate the user text (blank → [`ChatError::InvalidInput`], nothing
//!    written).
//! 2. Persist the user message.
//! 3. Load the most recent messages, ending with the one just written.
//! 4. Build the file context and compose the system prompt.
//! 5. Call the model with `[system, ...history]`.
//! 6. Persist the reply and bump the conversation's `updated_at`.
//!
//! The user message from step 2 stays persisted when step 5 fails. A naive
//! retry after such a failure therefore stores the user turn twice.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::context::ContextBuilder;
use crate::error::{ChatError, Result};
use crate::llm::InferenceClient;
use crate::models::{ChatTurn, Message, Role};
use crate::prompt::{compose, Intent, OutputMode};
use crate::store::ChatStore;

/// Number of earlier messages the model sees alongside the new one.
pub const HISTORY_WINDOW: i64 = 20;

/// Caller-selectable knobs for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub intent: Intent,
    pub mode: OutputMode,
    /// Overrides `[llm] model` for this turn.
    pub model: Option<String>,
}

/// The persisted user message and the transcript built around it.
#[derive(Debug)]
pub struct Assembled {
    pub user_message: Message,
    pub transcript: Vec<ChatTurn>,
}

/// Both halves of a completed turn.
#[derive(Debug)]
pub struct SendOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
}

pub struct TranscriptAssembler {
    store: Arc<dyn ChatStore>,
    context: Arc<ContextBuilder>,
    inference: Arc<dyn InferenceClient>,
    default_model: String,
    max_chars: usize,
}

impl TranscriptAssembler {
    pub fn new(
        store: Arc<dyn ChatStore>,
        context: Arc<ContextBuilder>,
        inference: Arc<dyn InferenceClient>,
        default_model: impl Into<String>,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            context,
            inference,
            default_model: default_model.into(),
            max_chars,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn ChatStore>,
        context: Arc<ContextBuilder>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        Self::new(
            store,
            context,
            inference,
            config.llm.model.clone(),
            config.context.max_chars,
        )
    }

    /// Persists the user message and returns it with the ordered transcript
    /// for the model: one system turn, then history in ascending id order.
    pub async fn assemble(
        &self,
        conversation_id: &str,
        text: &str,
        intent: Intent,
        mode: OutputMode,
    ) -> Result<Assembled> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::invalid("content is required"));
        }
        self.require_conversation(conversation_id).await?;

        let user_message = self
            .store
            .insert_message(conversation_id, Role::User, text)
            .await?;

        // The window plus the message just written.
        let history = self
            .store
            .list_messages(conversation_id, HISTORY_WINDOW + 1, None)
            .await?;

        let system = self.system_prompt(conversation_id, intent, mode).await?;

        let mut transcript = Vec::with_capacity(history.len() + 1);
        transcript.push(ChatTurn::new(Role::System, system));
        transcript.extend(history.iter().map(ChatTurn::from));

        Ok(Assembled {
            user_message,
            transcript,
        })
    }

    /// Runs one full turn: assemble, call the model, persist the reply.
    pub async fn send(
        &self,
        conversation_id: &str,
        text: &str,
        options: &TurnOptions,
    ) -> Result<SendOutcome> {
        let Assembled {
            user_message,
            transcript,
        } = self
            .assemble(conversation_id, text, options.intent, options.mode)
            .await?;

        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);

        let reply = match self.inference.chat(model, &transcript).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    conversation_id,
                    provider = self.inference.name(),
                    model,
                    error = %format!("{:#}", e),
                    "model call failed"
                );
                return Err(ChatError::UpstreamModel(e.to_string()));
            }
        };
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ChatError::UpstreamModel("model returned an empty reply".into()));
        }

        let assistant_message = self.store.append_reply(conversation_id, reply).await?;
        info!(
            conversation_id,
            model,
            turns = transcript.len(),
            reply_chars = reply.chars().count(),
            "turn completed"
        );

        Ok(SendOutcome {
            user_message,
            assistant_message,
        })
    }

    /// The system prompt a turn would use right now, without writing anything.
    pub async fn preview_prompt(
        &self,
        conversation_id: &str,
        intent: Intent,
        mode: OutputMode,
    ) -> Result<String> {
        self.require_conversation(conversation_id).await?;
        self.system_prompt(conversation_id, intent, mode).await
    }

    async fn system_prompt(
        &self,
        conversation_id: &str,
        intent: Intent,
        mode: OutputMode,
    ) -> Result<String> {
        let files_text = self.context.build(conversation_id, self.max_chars).await?;
        Ok(compose(intent, mode, &files_text))
    }

    async fn require_conversation(&self, conversation_id: &str) -> Result<()> {
        match self.store.get_conversation(conversation_id).await? {
            Some(_) => Ok(()),
            None => Err(ChatError::not_found(format!(
                "conversation not found: {}",
                conversation_id
            ))),
        }
    }
}
