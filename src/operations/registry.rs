//! Operation registry
//!
//! Maps operation names to handlers. Populated once at startup and read-only
//! afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::config::Settings;

use super::client::ClientFactory;
use super::{bucket, multipart, object};
use super::{Call, DispatchError, DispatchRequest, Dispatcher, Operation, Outcome, Response};

/// Name → handler table
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: BTreeMap<&'static str, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in S3 operations
    pub fn s3(settings: &Settings) -> Self {
        let clients = Arc::new(ClientFactory::new(settings));
        let mut registry = Self::new();
        bucket::register(&mut registry, &clients);
        object::register(&mut registry, &clients);
        multipart::register(&mut registry, &clients);
        registry
    }

    /// Add a handler, replacing any handler with the same name
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        let name = operation.name();
        if self.operations.insert(name, operation).is_some() {
            tracing::debug!(operation = name, "Replaced operation handler");
        }
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, operation: Arc<dyn Operation>) -> Self {
        self.register(operation);
        self
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[async_trait]
impl Dispatcher for OperationRegistry {
    fn knows(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    fn operation_names(&self) -> Vec<String> {
        self.operations.keys().map(|name| name.to_string()).collect()
    }

    async fn dispatch(&self, request: DispatchRequest<'_>) -> Result<Outcome, DispatchError> {
        let handler = self
            .get(request.operation)
            .ok_or_else(|| DispatchError::UnknownOperation(request.operation.to_string()))?;

        if request.dry_run {
            tracing::debug!(operation = request.operation, "Dry run, skipping remote call");
            return Ok(Ok(Response::dry_run(request.operation)));
        }

        let call = Call {
            operation: request.operation,
            params: request.params,
            connection: request.connection,
        };
        handler.call(&call).await
    }
}
