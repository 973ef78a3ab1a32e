//! S3 client construction and error normalization

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use futures_util::future::BoxFuture;

use crate::common::config::Settings;
use crate::testing::credentials::Connection;

use super::args::Args;
use super::{Call, DispatchError, Operation, Outcome, Response, ServiceError};

/// Caches one SDK client per effective connection
pub struct ClientFactory {
    connect_timeout: Duration,
    clients: Mutex<HashMap<Connection, Client>>,
}

impl ClientFactory {
    pub fn new(settings: &Settings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.timeouts.connect_secs),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client for a connection, created on first use
    pub fn client(&self, connection: &Connection) -> Client {
        // A poisoned cache still holds valid clients
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        clients
            .entry(connection.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    credential = %connection.credential,
                    endpoint = %connection.endpoint_url,
                    region = %connection.region,
                    "Creating S3 client"
                );
                build_client(connection, self.connect_timeout)
            })
            .clone()
    }
}

fn build_client(connection: &Connection, connect_timeout: Duration) -> Client {
    let credentials = Credentials::new(
        &connection.access_key,
        &connection.secret_key,
        connection.session_token.clone(),
        None,
        "s3tester",
    );

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(connection.region.clone()))
        .endpoint_url(&connection.endpoint_url)
        .credentials_provider(credentials)
        .force_path_style(connection.path_style)
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(connect_timeout)
                .build(),
        )
        .build();

    Client::from_conf(config)
}

/// Handler signature for the built-in operations
pub(super) type Handler =
    for<'a> fn(Client, Args<'a>) -> BoxFuture<'a, Result<Outcome, DispatchError>>;

/// A named S3 operation backed by a handler function
pub(super) struct S3Operation {
    name: &'static str,
    clients: Arc<ClientFactory>,
    handler: Handler,
}

impl S3Operation {
    pub(super) fn new(name: &'static str, clients: &Arc<ClientFactory>, handler: Handler) -> Self {
        Self {
            name,
            clients: Arc::clone(clients),
            handler,
        }
    }
}

#[async_trait]
impl Operation for S3Operation {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, call: &Call<'_>) -> Result<Outcome, DispatchError> {
        let client = self.clients.client(call.connection);
        tracing::debug!(
            operation = self.name,
            credential = %call.connection.credential,
            "Sending request"
        );
        (self.handler)(client, call.args()).await
    }
}

/// Translate an SDK result into a normalized outcome
pub(super) fn normalize<T, E>(
    result: Result<T, SdkError<E, HttpResponse>>,
    respond: impl FnOnce(T) -> Response,
) -> Result<Outcome, DispatchError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(output) => Ok(Ok(respond(output))),
        Err(err) => service_error(err).map(Err),
    }
}

/// Normalize an SDK failure; anything that is not a service answer is a transport error
pub(super) fn service_error<E>(err: SdkError<E, HttpResponse>) -> Result<ServiceError, DispatchError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let err = ctx.err();
            let code = err
                .code()
                .map(str::to_string)
                .unwrap_or_else(|| status_code_name(status));
            let message = err.message().unwrap_or_default().to_string();
            Ok(ServiceError::new(code, message))
        }
        SdkError::TimeoutError(_) => Ok(ServiceError::new(
            "RequestTimeout",
            "request timed out before a response was received",
        )),
        other => Err(DispatchError::Transport(
            DisplayErrorContext(&other).to_string(),
        )),
    }
}

/// Error code for responses without an error body (HEAD requests)
fn status_code_name(status: u16) -> String {
    match status {
        301 => "PermanentRedirect".to_string(),
        400 => "BadRequest".to_string(),
        403 => "Forbidden".to_string(),
        404 => "NotFound".to_string(),
        405 => "MethodNotAllowed".to_string(),
        409 => "Conflict".to_string(),
        412 => "PreconditionFailed".to_string(),
        500 => "InternalError".to_string(),
        503 => "ServiceUnavailable".to_string(),
        other => other.to_string(),
    }
}
