//! Retry governor
//!
//! Wraps dispatch with bounded exponential backoff. Retry decisions depend
//! only on the normalized error code:
//!
//! | class          | retries                         |
//! |----------------|---------------------------------|
//! | retryable      | up to `max_retries`             |
//! | non-retryable  | never                           |
//! | unclassified   | up to `unclassified_retries`    |
//! | fatal          | never (dispatch-level failures) |

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::common::config::RetrySettings;
use crate::operations::{DispatchError, DispatchRequest, Dispatcher, Outcome, ServiceError};

/// Transient codes worth retrying
const RETRYABLE_CODES: &[&str] = &[
    "SlowDown",
    "ServiceUnavailable",
    "RequestTimeout",
    "InternalError",
    "ThrottlingException",
    "Throttling",
    "TooManyRequests",
    "RequestLimitExceeded",
];

/// Authentication, not-found and malformed-request codes
const NON_RETRYABLE_CODES: &[&str] = &[
    "AccessDenied",
    "Forbidden",
    "InvalidAccessKeyId",
    "InvalidSecurity",
    "SignatureDoesNotMatch",
    "TokenRefreshRequired",
    "ExpiredToken",
    "NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchUpload",
    "NoSuchVersion",
    "NoSuchTagSet",
    "NoSuchBucketPolicy",
    "InvalidBucketName",
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "BucketNotEmpty",
    "BadRequest",
    "InvalidArgument",
    "InvalidRequest",
    "InvalidRange",
    "InvalidPart",
    "InvalidPartOrder",
    "EntityTooSmall",
    "EntityTooLarge",
    "MalformedXML",
    "MalformedPolicy",
    "MethodNotAllowed",
    "PreconditionFailed",
    "NotImplemented",
];

/// Retry classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
    Unclassified,
    Fatal,
}

/// Classify a normalized error code
pub fn classify_code(code: &str) -> ErrorClass {
    if RETRYABLE_CODES.contains(&code) {
        ErrorClass::Retryable
    } else if NON_RETRYABLE_CODES.contains(&code) {
        ErrorClass::NonRetryable
    } else {
        ErrorClass::Unclassified
    }
}

/// Classify a dispatch result; `None` for success
pub fn classify(result: &Result<Outcome, DispatchError>) -> Option<ErrorClass> {
    match result {
        Ok(Ok(_)) => None,
        Ok(Err(err)) => Some(classify_code(&err.code)),
        // Connection-level trouble may clear up; everything else is deterministic
        Err(DispatchError::Transport(_)) => Some(ErrorClass::Unclassified),
        Err(_) => Some(ErrorClass::Fatal),
    }
}

/// Backoff and retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub unclassified_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            unclassified_retries: settings.unclassified_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            unclassified_retries: 0,
            ..Self::default()
        }
    }

    /// Retries allowed for an error class
    ///
    /// The unclassified budget never exceeds `max_retries`, so a zero budget
    /// disables retries entirely.
    pub fn budget(&self, class: ErrorClass) -> u32 {
        match class {
            ErrorClass::Retryable => self.max_retries,
            ErrorClass::Unclassified => self.unclassified_retries.min(self.max_retries),
            ErrorClass::NonRetryable | ErrorClass::Fatal => 0,
        }
    }

    /// Delay before retry number `retry` (0-based), before jitter
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(64) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry number `retry`, scaled into [0.5, 1.0) when jitter is on
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self.base_backoff(retry);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..1.0))
        } else {
            delay
        }
    }
}

/// Terminal outcome of a governed dispatch
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<Outcome, DispatchError>,
    /// Number of dispatch attempts made (at least 1)
    pub attempts: u32,
}

/// Applies the retry policy and per-attempt timeout to dispatch calls
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryGovernor {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// Dispatch with retries
    ///
    /// Cancellation never interrupts an attempt in flight; it only stops
    /// further retries, surfacing the last error.
    pub async fn dispatch(
        &self,
        dispatcher: &dyn Dispatcher,
        request: DispatchRequest<'_>,
        cancel: &CancellationToken,
    ) -> Attempted {
        let mut attempts = 0;
        let mut retries = 0;

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.timeout, dispatcher.dispatch(request)).await
            {
                Ok(result) => result,
                Err(_) => Ok(Err(ServiceError::new(
                    "RequestTimeout",
                    format!("no response within {:.1}s", self.timeout.as_secs_f64()),
                ))),
            };

            let Some(class) = classify(&result) else {
                return Attempted { result, attempts };
            };
            if retries >= self.policy.budget(class) || cancel.is_cancelled() {
                return Attempted { result, attempts };
            }

            let delay = self.policy.backoff(retries);
            tracing::debug!(
                operation = request.operation,
                attempt = attempts,
                class = ?class,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Attempted { result, attempts },
                _ = tokio::time::sleep(delay) => {}
            }
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Response;
    use crate::testing::credentials::Connection;
    use crate::testing::params::ResolvedParams;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, repeating the last one
    struct Scripted {
        script: Mutex<Vec<Result<Outcome, DispatchError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Scripted {
        fn new(script: Vec<Result<Outcome, DispatchError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn clone_result(result: &Result<Outcome, DispatchError>) -> Result<Outcome, DispatchError> {
        match result {
            Ok(outcome) => Ok(outcome.clone()),
            Err(DispatchError::Transport(m)) => Err(DispatchError::Transport(m.clone())),
            Err(DispatchError::InvalidParameter { operation, reason }) => {
                Err(DispatchError::invalid(operation.clone(), reason.clone()))
            }
            Err(other) => Err(DispatchError::Internal(other.to_string())),
        }
    }

    #[async_trait]
    impl Dispatcher for Scripted {
        fn knows(&self, _operation: &str) -> bool {
            true
        }

        fn operation_names(&self) -> Vec<String> {
            Vec::new()
        }

        async fn dispatch(&self, _request: DispatchRequest<'_>) -> Result<Outcome, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                clone_result(&script[0])
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            unclassified_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: true,
        }
    }

    fn fail(code: &str) -> Result<Outcome, DispatchError> {
        Ok(Err(ServiceError::new(code, "scripted")))
    }

    async fn run(governor: &RetryGovernor, dispatcher: &Scripted) -> Attempted {
        let params = ResolvedParams::default();
        let connection = Connection::anonymous("http://localhost:9000");
        let request = DispatchRequest {
            operation: "PutObject",
            params: &params,
            connection: &connection,
            dry_run: false,
        };
        governor
            .dispatch(dispatcher, request, &CancellationToken::new())
            .await
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_code("SlowDown"), ErrorClass::Retryable);
        assert_eq!(classify_code("AccessDenied"), ErrorClass::NonRetryable);
        assert_eq!(classify_code("NoSuchKey"), ErrorClass::NonRetryable);
        assert_eq!(classify_code("Weird"), ErrorClass::Unclassified);
        assert_eq!(classify(&Ok(Ok(Response::new()))), None);
        assert_eq!(
            classify(&Err(DispatchError::FileNotFound("x".into()))),
            Some(ErrorClass::Fatal)
        );
        assert_eq!(
            classify(&Err(DispatchError::Transport("reset".into()))),
            Some(ErrorClass::Unclassified)
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_secs(1) && delay < Duration::from_secs(2));
        }
    }

    #[tokio::test]
    async fn test_never_retries_non_retryable() {
        let dispatcher = Scripted::new(vec![fail("AccessDenied")]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 1);
        assert_eq!(dispatcher.calls(), 1);
        assert_eq!(attempted.result.unwrap().unwrap_err().code, "AccessDenied");
    }

    #[tokio::test]
    async fn test_retryable_exhausts_budget_with_last_error() {
        let dispatcher = Scripted::new(vec![
            fail("SlowDown"),
            fail("SlowDown"),
            fail("SlowDown"),
            fail("ServiceUnavailable"),
        ]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 4);
        assert_eq!(
            attempted.result.unwrap().unwrap_err().code,
            "ServiceUnavailable"
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let dispatcher = Scripted::new(vec![fail("InternalError"), Ok(Ok(Response::new()))]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 2);
        assert!(attempted.result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unclassified_has_its_own_budget() {
        let dispatcher = Scripted::new(vec![fail("Mystery")]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let dispatcher = Scripted::new(vec![Err(DispatchError::invalid("PutObject", "no key"))]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 1);
        assert!(matches!(
            attempted.result,
            Err(DispatchError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_becomes_request_timeout() {
        let mut dispatcher = Scripted::new(vec![Ok(Ok(Response::new()))]);
        dispatcher.delay = Duration::from_secs(10);
        let governor = RetryGovernor::new(RetryPolicy::none(), Duration::from_millis(20));

        let attempted = run(&governor, &dispatcher).await;
        assert_eq!(attempted.attempts, 1);
        assert_eq!(attempted.result.unwrap().unwrap_err().code, "RequestTimeout");
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let dispatcher = Scripted::new(vec![fail("SlowDown")]);
        let governor = RetryGovernor::new(fast_policy(), Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let params = ResolvedParams::default();
        let connection = Connection::anonymous("http://localhost:9000");
        let request = DispatchRequest {
            operation: "PutObject",
            params: &params,
            connection: &connection,
            dry_run: false,
        };
        let attempted = governor.dispatch(&dispatcher, request, &cancel).await;
        assert_eq!(attempted.attempts, 1);
    }
}
