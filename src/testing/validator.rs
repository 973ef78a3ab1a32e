//! Result validation
//!
//! Compares a dispatch result with the declared expectation. An unexpected
//! error code is a `fail`; only failures outside the normalized outcome
//! channel are an `error`.

use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::operations::{DispatchError, Outcome, Response};

use super::config::{ExpectedResult, ResponseContains};

/// Verdict for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Error => write!(f, "error"),
        }
    }
}

/// A verdict with the reason it was not a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    pub reason: Option<String>,
}

impl Judgement {
    fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            reason: Some(reason.into()),
        }
    }

    fn error(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            reason: Some(reason.into()),
        }
    }
}

/// Judge a dispatch result against its expectation
pub fn validate(expected: &ExpectedResult, actual: &Result<Outcome, DispatchError>) -> Judgement {
    match actual {
        Err(err) => Judgement::error(err.to_string()),
        Ok(Ok(response)) if response.dry_run => Judgement::pass(),
        Ok(Ok(response)) => {
            if !expected.success {
                return Judgement::fail(format!(
                    "expected error '{}' but the operation succeeded",
                    expected.error_code.as_deref().unwrap_or_default()
                ));
            }
            match &expected.response_contains {
                Some(predicates) => check_response(predicates, response),
                None => Judgement::pass(),
            }
        }
        Ok(Err(err)) => {
            if expected.success {
                return Judgement::fail(format!("expected success, got {}", err));
            }
            match expected.error_code.as_deref() {
                Some(code) if code == err.code => Judgement::pass(),
                Some(code) => Judgement::fail(format!(
                    "expected error code '{}', got '{}'",
                    code, err.code
                )),
                None => Judgement::fail(format!(
                    "no expected error code declared, got '{}'",
                    err.code
                )),
            }
        }
    }
}

fn check_response(predicates: &ResponseContains, response: &Response) -> Judgement {
    if let Some(headers) = &predicates.headers {
        for (name, want) in headers {
            match response.headers.get(&name.to_lowercase()) {
                Some(got) if got == want => {}
                Some(got) => {
                    return Judgement::fail(format!(
                        "header '{}' is '{}', expected '{}'",
                        name, got, want
                    ))
                }
                None => return Judgement::fail(format!("header '{}' is missing", name)),
            }
        }
    }

    if let Some(metadata) = &predicates.metadata {
        for (key, want) in metadata {
            let got = response
                .metadata
                .get(key)
                .or_else(|| response.metadata.get(&key.to_lowercase()));
            match got {
                Some(got) if got == want => {}
                Some(got) => {
                    return Judgement::fail(format!(
                        "metadata '{}' is '{}', expected '{}'",
                        key, got, want
                    ))
                }
                None => return Judgement::fail(format!("metadata '{}' is missing", key)),
            }
        }
    }

    if let Some(pattern) = &predicates.body_pattern {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => return Judgement::fail(format!("invalid body_pattern: {}", e)),
        };
        match &response.body {
            Some(body) if regex.is_match(body) => {}
            Some(_) => {
                return Judgement::fail(format!("body does not match pattern '{}'", pattern))
            }
            None => return Judgement::fail("response has no body"),
        }
    }

    Judgement::pass()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ServiceError;
    use std::collections::BTreeMap;

    fn failure(code: &str) -> Result<Outcome, DispatchError> {
        Ok(Err(ServiceError::new(code, "boom")))
    }

    #[test]
    fn test_expected_error_code_must_match_exactly() {
        let expected = ExpectedResult::failure("AccessDenied");

        assert_eq!(validate(&expected, &failure("AccessDenied")).verdict, Verdict::Pass);
        assert_eq!(validate(&expected, &failure("accessdenied")).verdict, Verdict::Fail);
        assert_eq!(validate(&expected, &failure("NoSuchKey")).verdict, Verdict::Fail);
        assert_eq!(
            validate(&expected, &Ok(Ok(Response::new()))).verdict,
            Verdict::Fail
        );
    }

    #[test]
    fn test_unexpected_failure_is_fail_not_error() {
        let judgement = validate(&ExpectedResult::success(), &failure("NoSuchBucket"));
        assert_eq!(judgement.verdict, Verdict::Fail);
        assert!(judgement.reason.unwrap().contains("NoSuchBucket"));
    }

    #[test]
    fn test_dispatch_error_is_error() {
        let actual = Err(DispatchError::Transport("connection refused".into()));
        assert_eq!(
            validate(&ExpectedResult::success(), &actual).verdict,
            Verdict::Error
        );
        assert_eq!(
            validate(&ExpectedResult::failure("AccessDenied"), &actual).verdict,
            Verdict::Error
        );
    }

    #[test]
    fn test_dry_run_passes() {
        let actual = Ok(Ok(Response::dry_run("GetObject")));
        assert_eq!(
            validate(&ExpectedResult::failure("NoSuchKey"), &actual).verdict,
            Verdict::Pass
        );
    }

    #[test]
    fn test_response_predicates() {
        let response = Response::new()
            .header("Content-Type", "text/plain")
            .with_metadata(BTreeMap::from([("owner".to_string(), "qa".to_string())]))
            .with_body("hello world");
        let actual = Ok(Ok(response));

        let mut expected = ExpectedResult::success();
        expected.response_contains = Some(ResponseContains {
            headers: Some(BTreeMap::from([(
                "CONTENT-TYPE".to_string(),
                "text/plain".to_string(),
            )])),
            body_pattern: Some("hel+o\\s\\w+".into()),
            metadata: Some(BTreeMap::from([("owner".to_string(), "qa".to_string())])),
        });
        assert_eq!(validate(&expected, &actual), Judgement::pass());

        if let Some(predicates) = expected.response_contains.as_mut() {
            predicates.metadata = Some(BTreeMap::from([("owner".to_string(), "ops".to_string())]));
        }
        let judgement = validate(&expected, &actual);
        assert_eq!(judgement.verdict, Verdict::Fail);
        assert!(judgement.reason.unwrap().contains("owner"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let expected = ExpectedResult::failure("Denied");
        let actual = failure("Other");
        assert_eq!(validate(&expected, &actual), validate(&expected, &actual));
    }
}
