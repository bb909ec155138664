//! In-process capabilities backed by async closures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use scholarly_core::capability::Capability;
use scholarly_core::error::CapabilityError;
use serde_json::Value;

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<String, CapabilityError>> + Send + Sync>;

/// A capability implemented by a closure in this process.
pub struct LocalCapability {
    name: String,
    description: String,
    schema: Value,
    provider: String,
    timeout: Option<Duration>,
    handler: Handler,
}

impl LocalCapability {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, CapabilityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            provider: "local".into(),
            timeout: None,
            handler: Box::new(move |args| handler(args).boxed()),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Capability for LocalCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn invoke(&self, arguments: Value) -> Result<String, CapabilityError> {
        (self.handler)(arguments).await
    }
}
