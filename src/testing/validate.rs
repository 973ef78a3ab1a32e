//! Semantic plan validation
//!
//! Collects every problem in a plan before anything is dispatched.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::common::{Error, Result};
use crate::operations::Dispatcher;

use super::config::{Phase, TestPlan};
use super::params::ParameterResolver;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"))
}

/// An absolute `http`/`https` URL with a host
fn is_http_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// Every semantic problem in the plan
///
/// In strict mode, `file://` references must also exist.
pub fn validate_plan(plan: &TestPlan, dispatcher: &dyn Dispatcher, strict: bool) -> Vec<String> {
    let mut problems = Vec::new();
    let config = &plan.config;

    if !is_http_url(&config.endpoint_url) {
        problems.push(format!(
            "endpoint_url '{}' must be an http:// or https:// URL",
            config.endpoint_url
        ));
    }

    if config.credentials.is_empty() {
        problems.push("at least one credential set is required".to_string());
    }
    let mut credentials = HashSet::new();
    for cred in &config.credentials {
        if !credentials.insert(cred.name.as_str()) {
            problems.push(format!("duplicate credential name '{}'", cred.name));
        }
        if !name_pattern().is_match(&cred.name) {
            problems.push(format!(
                "credential name '{}' may only contain letters, digits, '_' and '-'",
                cred.name
            ));
        }
        if let Some(url) = &cred.endpoint_url {
            if !is_http_url(url) {
                problems.push(format!(
                    "credential '{}': endpoint_url '{}' must be an http:// or https:// URL",
                    cred.name, url
                ));
            }
        }
    }

    if plan.test_cases.groups.is_empty() {
        problems.push("at least one test group is required".to_string());
    }
    if plan.test_cases.workers == Some(0) {
        problems.push("test_cases.workers must be at least 1".to_string());
    }

    let resolver = ParameterResolver::new(&plan.base_dir);
    let mut groups = HashSet::new();
    for group in &plan.test_cases.groups {
        if !groups.insert(group.name.as_str()) {
            problems.push(format!("duplicate group name '{}'", group.name));
        }
        if !credentials.contains(group.credential.as_str()) {
            problems.push(format!(
                "group '{}': unknown credential '{}'",
                group.name, group.credential
            ));
        }
        if group.test.is_empty() {
            problems.push(format!("group '{}': test must not be empty", group.name));
        }

        for phase in Phase::ALL {
            for (i, op) in group.phase(phase).iter().enumerate() {
                let at = format!(
                    "group '{}' {}[{}] ({})",
                    group.name,
                    phase.key(),
                    i + 1,
                    op.operation
                );

                if !dispatcher.knows(&op.operation) {
                    problems.push(format!("{}: unknown operation", at));
                }
                if let Some(cred) = &op.credential {
                    if !credentials.contains(cred.as_str()) {
                        problems.push(format!("{}: unknown credential override '{}'", at, cred));
                    }
                }
                for problem in op.expected_result.problems() {
                    problems.push(format!("{}: {}", at, problem));
                }
                if strict {
                    for file in resolver.missing_files(&op.parameters) {
                        problems.push(format!(
                            "{}: file not found '{}' ({})",
                            at,
                            file.raw,
                            file.path.display()
                        ));
                    }
                }
            }
        }
    }

    problems
}

/// Fail with [`Error::InvalidPlan`] listing every problem
pub fn check(plan: &TestPlan, dispatcher: &dyn Dispatcher, strict: bool) -> Result<()> {
    let problems = validate_plan(plan, dispatcher, strict);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidPlan(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{DispatchError, DispatchRequest, Outcome};
    use async_trait::async_trait;
    use std::path::Path;

    struct Known(&'static [&'static str]);

    #[async_trait]
    impl Dispatcher for Known {
        fn knows(&self, operation: &str) -> bool {
            self.0.contains(&operation)
        }

        fn operation_names(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }

        async fn dispatch(
            &self,
            _request: DispatchRequest<'_>,
        ) -> std::result::Result<Outcome, DispatchError> {
            unreachable!("validation never dispatches")
        }
    }

    const OPS: Known = Known(&["CreateBucket", "PutObject", "DeleteBucket"]);

    fn plan(yaml: &str, base: &Path) -> TestPlan {
        let mut plan: TestPlan = serde_yaml::from_str(yaml).unwrap();
        plan.base_dir = base.to_path_buf();
        plan
    }

    const VALID: &str = r#"
config:
  endpoint_url: http://localhost:9000
  credentials:
    - name: admin
      access_key: a
      secret_key: s
    - name: user-1
      access_key: b
      secret_key: t
test_cases:
  groups:
    - name: basic
      credential: admin
      before_test:
        - operation: CreateBucket
          parameters: { bucket: b }
      test:
        - operation: PutObject
          credential: user-1
          parameters: { bucket: b, key: k, body: "file://data.txt" }
      after_test:
        - operation: DeleteBucket
          parameters: { bucket: b }
"#;

    #[test]
    fn test_valid_plan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "x").unwrap();
        let plan = plan(VALID, dir.path());
        assert!(validate_plan(&plan, &OPS, true).is_empty());
        assert!(check(&plan, &OPS, false).is_ok());
    }

    #[test]
    fn test_missing_file_only_reported_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(VALID, dir.path());
        assert!(validate_plan(&plan, &OPS, false).is_empty());

        let problems = validate_plan(&plan, &OPS, true);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("file not found 'file://data.txt'"));
    }

    #[test]
    fn test_reports_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            r#"
config:
  endpoint_url: localhost:9000
  credentials:
    - name: admin
      access_key: a
      secret_key: s
    - name: admin
      access_key: a
      secret_key: s
    - name: "bad name"
      access_key: a
      secret_key: s
test_cases:
  groups:
    - name: g
      credential: ghost
      test: []
    - name: g
      credential: admin
      test:
        - operation: Teleport
        - operation: PutObject
          credential: nobody
          expected_result:
            success: false
"#,
            dir.path(),
        );

        let problems = validate_plan(&plan, &OPS, false);
        let has = |needle: &str| problems.iter().any(|p| p.contains(needle));
        assert!(has("endpoint_url 'localhost:9000'"));
        assert!(has("duplicate credential name 'admin'"));
        assert!(has("credential name 'bad name'"));
        assert!(has("duplicate group name 'g'"));
        assert!(has("unknown credential 'ghost'"));
        assert!(has("test must not be empty"));
        assert!(has("test[1] (Teleport): unknown operation"));
        assert!(has("unknown credential override 'nobody'"));
        assert!(has("error_code is required"));
        assert_eq!(problems.len(), 9);

        let err = check(&plan, &OPS, false).unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(list) if list.len() == 9));
    }

    #[test]
    fn test_malformed_endpoints_rejected() {
        for endpoint in [
            "http://local host:99999/%%",
            "http://",
            "ftp://localhost:9000",
            "http://localhost:99999",
        ] {
            assert!(!is_http_url(endpoint), "{endpoint} accepted");
        }
        assert!(is_http_url("https://s3.example.com"));
        assert!(is_http_url("http://127.0.0.1:9000/"));
    }

    #[test]
    fn test_malformed_endpoint_fails_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "x").unwrap();
        let yaml = VALID.replace("http://localhost:9000", "http://local host:99999/%%");
        let plan = plan(&yaml, dir.path());

        let problems = validate_plan(&plan, &OPS, false);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("endpoint_url"));
        assert!(check(&plan, &OPS, false).unwrap_err().is_configuration());
    }
}
