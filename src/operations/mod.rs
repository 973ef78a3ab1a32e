//! Operation dispatch
//!
//! A closed, name-keyed table of operation handlers behind the [`Dispatcher`]
//! interface. Handlers translate their native failures into a normalized
//! [`ServiceError`], so an expected service error is an [`Outcome`] value
//! rather than an `Err`. Only conditions outside that channel (transport
//! failures, bad parameters, unreadable payload files) are [`DispatchError`]s.

pub mod args;
mod bucket;
mod client;
mod multipart;
mod object;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::testing::credentials::Connection;
use crate::testing::params::ResolvedParams;

pub use client::ClientFactory;
pub use registry::OperationRegistry;

/// Normalized result of a remote call: a response or a service error
pub type Outcome = std::result::Result<Response, ServiceError>;

/// Normalized `(code, message)` pair reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Failures outside the normalized outcome channel
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid parameter for {operation}: {reason}")]
    InvalidParameter { operation: String, reason: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation crashed: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Create an invalid parameter error
    pub fn invalid(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Normalized successful response
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    /// Header-style fields, keys lower-cased
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// User metadata
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Response body as (lossy) text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Operation specific summary
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Synthetic response produced without a remote call
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic success for dry runs
    pub fn dry_run(operation: &str) -> Self {
        Self {
            data: serde_json::json!({ "operation": operation }),
            dry_run: true,
            ..Self::default()
        }
    }

    /// Add a header; the name is lower-cased
    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Add a header when the value is present
    pub fn header_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Everything a handler needs for one call
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    pub operation: &'a str,
    pub params: &'a ResolvedParams,
    pub connection: &'a Connection,
}

impl<'a> Call<'a> {
    /// Typed access to the call parameters
    pub fn args(&self) -> args::Args<'a> {
        args::Args::new(self.operation, self.params)
    }
}

/// A single named remote operation
#[async_trait]
pub trait Operation: Send + Sync {
    /// Name used in plan files (e.g., "PutObject")
    fn name(&self) -> &'static str;

    /// Perform the call and normalize its result
    async fn call(&self, call: &Call<'_>) -> Result<Outcome, DispatchError>;
}

/// A dispatch request as issued by the engine
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub operation: &'a str,
    pub params: &'a ResolvedParams,
    pub connection: &'a Connection,
    pub dry_run: bool,
}

/// Uniform interface for invoking named operations
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Whether an operation name is known
    fn knows(&self, operation: &str) -> bool;

    /// All known operation names, sorted
    fn operation_names(&self) -> Vec<String>;

    /// Invoke an operation; dry runs must not reach the remote service
    async fn dispatch(&self, request: DispatchRequest<'_>) -> Result<Outcome, DispatchError>;
}
