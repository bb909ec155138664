//! Scripted providers and capabilities shared by the agent unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use scholarly_capabilities::LocalCapability;
use scholarly_core::capability::Capability;
use scholarly_core::error::{CapabilityError, ProviderError};
use scholarly_core::message::{InvocationRequest, Message, Role};
use scholarly_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use serde_json::{Value, json};

/// Replays a fixed list of model messages, then echoes the last user message.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<ProviderRequest>>,
    broken_stream: bool,
    looping: Option<String>,
    counter: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            broken_stream: false,
            looping: None,
            counter: AtomicUsize::new(0),
        }
    }

    /// Always asks for `capability`, never answering.
    pub fn looping(capability: &str) -> Self {
        Self {
            looping: Some(capability.to_string()),
            ..Self::new(vec![])
        }
    }

    /// Streams close before a terminal chunk.
    pub fn with_broken_stream(mut self) -> Self {
        self.broken_stream = true;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &ProviderRequest) -> Message {
        if let Some(name) = &self.looping {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            return asks(vec![call(&format!("loop-{n}"), name, json!({}))]);
        }
        if let Some(message) = self.script.lock().unwrap().pop_front() {
            return message;
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Message::assistant(format!("echo: {last_user}"))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let message = self.next(&request);
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted-model".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        if self.broken_stream {
            self.requests.lock().unwrap().push(request);
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some("partial".into()),
                    ..Default::default()
                }))
                .await;
            return Ok(rx);
        }

        let response = self.complete(request).await?;
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

pub(crate) fn call(id: &str, name: &str, arguments: Value) -> InvocationRequest {
    InvocationRequest::new(id, name, arguments)
}

pub(crate) fn asks(calls: Vec<InvocationRequest>) -> Message {
    Message::assistant_with_calls("", calls)
}

pub(crate) fn fixed_capability(name: &str, output: &str) -> Arc<dyn Capability> {
    let output = output.to_string();
    Arc::new(LocalCapability::new(
        name,
        format!("Test capability {name}"),
        json!({ "type": "object", "properties": {} }),
        move |_| {
            let output = output.clone();
            async move { Ok::<_, CapabilityError>(output) }
        },
    ))
}

pub(crate) fn failing_capability(name: &str, reason: &str) -> Arc<dyn Capability> {
    let name_owned = name.to_string();
    let reason = reason.to_string();
    Arc::new(LocalCapability::new(
        name,
        format!("Test capability {name}"),
        json!({ "type": "object", "properties": {} }),
        move |_| {
            let err = CapabilityError::ExecutionFailed {
                name: name_owned.clone(),
                reason: reason.clone(),
            };
            async move { Err::<String, _>(err) }
        },
    ))
}

struct Panicking(String);

#[async_trait]
impl Capability for Panicking {
    fn name(&self) -> &str {
        &self.0
    }

    fn description(&self) -> &str {
        "Test capability that panics"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _arguments: Value) -> Result<String, CapabilityError> {
        panic!("capability bug");
    }
}

pub(crate) fn panicking_capability(name: &str) -> Arc<dyn Capability> {
    Arc::new(Panicking(name.to_string()))
}
