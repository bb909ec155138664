//! The turn executor.
//!
//! One turn takes a user message to a final answer:
//!
//! 1. **Start**: lock the thread, append the user message
//! 2. **Model step**: send system prompt + history + capability definitions
//! 3. **Invoking**: run every requested capability concurrently, append
//!    the results in request order, go back to 2
//! 4. **Done**: the model answered with text only; append it and return
//!
//! A turn fails only when the model keeps requesting capabilities past the
//! step limit, or when the provider or store fail outright. Capability
//! failures are fed back to the model as error results.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use scholarly_config::AppConfig;
use scholarly_core::capability::CapabilityRegistry;
use scholarly_core::error::{ProviderError, TurnError};
use scholarly_core::message::{HistoryEntry, InvocationRequest, Message, ThreadId};
use scholarly_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use scholarly_core::store::ConversationStore;
use scholarly_core::trace::{QUERY_PREVIEW, TraceStep, preview};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::prompt;

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The final answer text
    pub answer: String,
    /// Model-step/invocation round trips taken
    pub rounds: u32,
    /// Capability invocations executed
    pub invocations: usize,
    /// Every trace step emitted, in order
    pub trace: Vec<TraceStep>,
    /// Token usage summed over the turn's model steps
    pub usage: Usage,
}

/// Collects trace steps and forwards them to a live listener, if any.
struct TraceSink {
    steps: Vec<TraceStep>,
    live: Option<UnboundedSender<TraceStep>>,
}

impl TraceSink {
    fn emit(&mut self, step: TraceStep) {
        info!(kind = %step.kind, "{}", step.payload);
        if let Some(tx) = &self.live {
            // Listener may have gone away; the turn continues regardless.
            let _ = tx.send(step.clone());
        }
        self.steps.push(step);
    }
}

/// Drives a language model through capability invocations to an answer.
pub struct TurnExecutor {
    provider: Arc<dyn Provider>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn ConversationStore>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
    max_steps: u32,
    streaming: bool,
}

impl TurnExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn ConversationStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 25,
            streaming: false,
        }
    }

    /// Build an executor with the model, limits and prompt taken from `config`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn ConversationStore>,
        config: &AppConfig,
    ) -> Self {
        let model = config
            .providers
            .get(&config.default_provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone());

        Self::new(provider, registry, store, model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_steps(config.agent.max_steps)
            .with_streaming(config.agent.streaming)
            .with_system_prompt(prompt::system_prompt(&config.agent))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the maximum number of invocation rounds per turn.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one turn on `thread_id`.
    pub async fn run(
        &self,
        thread_id: &ThreadId,
        user_message: Message,
        trace_tx: Option<UnboundedSender<TraceStep>>,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_seeded(thread_id, &[], user_message, trace_tx).await
    }

    /// Run one turn, first seeding an empty thread from advisory `history`.
    ///
    /// Once a thread holds messages, `history` is ignored: the store is authoritative.
    pub async fn run_seeded(
        &self,
        thread_id: &ThreadId,
        history: &[HistoryEntry],
        user_message: Message,
        trace_tx: Option<UnboundedSender<TraceStep>>,
    ) -> Result<TurnOutcome, TurnError> {
        info!(
            thread_id = %thread_id,
            query = %preview(&user_message.content, QUERY_PREVIEW),
            "Starting turn"
        );

        let _turn = self.store.begin_turn(thread_id).await?;
        let thread = self.store.get_or_create(thread_id).await?;

        if thread.messages.is_empty() && !history.is_empty() {
            let mut seeded = 0;
            for message in history.iter().filter_map(HistoryEntry::to_message) {
                self.store.append(thread_id, message).await?;
                seeded += 1;
            }
            debug!(thread_id = %thread_id, seeded, "Seeded thread from caller history");
        }

        self.store.append(thread_id, user_message).await?;

        let definitions = self.registry.definitions();
        let mut sink = TraceSink {
            steps: Vec::new(),
            live: trace_tx,
        };
        let mut rounds: u32 = 0;
        let mut invocations = 0;
        let mut usage = Usage::default();

        loop {
            let thread = self.store.get_or_create(thread_id).await?;
            let mut messages = Vec::with_capacity(thread.messages.len() + 1);
            messages.push(Message::system(&self.system_prompt));
            messages.extend(thread.messages.iter().cloned());

            let request = ProviderRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
                stream: false,
            };

            debug!(thread_id = %thread_id, round = rounds, "Model step");
            let response = match self.model_step(request).await {
                Ok(response) => response,
                Err(e) => {
                    let error = TurnError::from(e);
                    warn!(thread_id = %thread_id, error = %error, "Model step failed");
                    // Answer the stored user message so the next turn starts clean.
                    self.store
                        .append(thread_id, Message::assistant(format!("Error: {error}")))
                        .await?;
                    return Err(error);
                }
            };
            if let Some(step_usage) = &response.usage {
                usage.accumulate(step_usage);
            }

            let mut message = response.message;
            if message.tool_calls.is_empty() {
                let answer = message.content.clone();
                self.store
                    .append(thread_id, Message::assistant(&answer))
                    .await?;
                sink.emit(TraceStep::final_answer(&answer));

                let mut checkpoint = self.store.checkpoint_of(thread_id).await?;
                checkpoint.turns += 1;
                checkpoint.message_count = thread.messages.len() + 1;
                checkpoint.last_model = Some(response.model);
                checkpoint.usage.accumulate(&usage);
                checkpoint.updated_at = Some(Utc::now());
                self.store.save_checkpoint(thread_id, checkpoint).await?;

                info!(thread_id = %thread_id, rounds, invocations, "Turn complete");
                return Ok(TurnOutcome {
                    answer,
                    rounds,
                    invocations,
                    trace: sink.steps,
                    usage,
                });
            }

            if rounds >= self.max_steps {
                let error = TurnError::StepLimitExceeded {
                    limit: self.max_steps,
                };
                warn!(thread_id = %thread_id, limit = self.max_steps, "Step limit exceeded");
                // Keep the thread well-formed: the unanswered request is not stored.
                self.store
                    .append(thread_id, Message::assistant(format!("Error: {error}")))
                    .await?;
                return Err(error);
            }
            rounds += 1;

            if !message.content.trim().is_empty() {
                sink.emit(TraceStep::reasoning(&message.content));
            }
            assign_unique_ids(&mut message.tool_calls, &thread.messages);
            let calls = message.tool_calls.clone();
            self.store
                .append(thread_id, Message::assistant_with_calls(message.content, calls.clone()))
                .await?;

            for call in &calls {
                sink.emit(TraceStep::invocation(&call.name, &call.arguments));
            }

            let results =
                futures::future::join_all(calls.iter().map(|call| self.registry.invoke(call))).await;

            for (call, result) in calls.iter().zip(results) {
                sink.emit(TraceStep::result(&call.name, &result.content, result.is_error));
                let message = if result.is_error {
                    Message::tool_error(&result.request_id, result.content)
                } else {
                    Message::tool_result(&result.request_id, result.content)
                };
                self.store.append(thread_id, message).await?;
            }
            invocations += calls.len();
        }
    }

    /// One model round trip, streaming first when enabled.
    async fn model_step(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if self.streaming {
            match self.stream_step(request.clone()).await {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => warn!(
                    provider = self.provider.name(),
                    "Stream ended without a usable message, retrying single-shot"
                ),
                Err(e) => warn!(
                    provider = self.provider.name(),
                    error = %e,
                    "Streaming failed, retrying single-shot"
                ),
            }
        }

        let response = self
            .provider
            .complete(ProviderRequest {
                stream: false,
                ..request
            })
            .await?;

        if response.message.content.trim().is_empty() && response.message.tool_calls.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(response)
    }

    /// Collect a streamed step. `Ok(None)` means the stream gave nothing usable.
    async fn stream_step(
        &self,
        request: ProviderRequest,
    ) -> Result<Option<ProviderResponse>, ProviderError> {
        let mut rx = self
            .provider
            .stream(ProviderRequest {
                stream: true,
                ..request
            })
            .await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;
        let mut terminal = false;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content {
                content.push_str(&delta);
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                terminal = true;
                break;
            }
        }

        if !terminal || (content.trim().is_empty() && tool_calls.is_empty()) {
            return Ok(None);
        }

        Ok(Some(ProviderResponse {
            message: Message::assistant_with_calls(content, tool_calls),
            usage,
            model: self.model.clone(),
        }))
    }
}

/// Give every request an id not used earlier in the thread or the step.
///
/// Some providers reuse ids across turns; tool results must answer exactly one request.
fn assign_unique_ids(calls: &mut [InvocationRequest], prior: &[Message]) {
    let mut seen: HashSet<String> = prior
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();

    for call in calls.iter_mut() {
        if call.id.is_empty() || seen.contains(&call.id) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            debug!(old = %call.id, new = %fresh, "Reassigned invocation id");
            call.id = fresh;
        }
        seen.insert(call.id.clone());
    }
}
