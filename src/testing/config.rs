//! Test plan configuration types
//!
//! Defines the declarative structures deserialized from a YAML test plan.
//! Once loaded a plan is read-only; runtime state lives in the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A complete test plan loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct TestPlan {
    /// Connection settings and credential sets
    pub config: GlobalConfig,
    /// The groups to execute
    pub test_cases: TestCases,
    /// Files merged into this plan before parsing
    #[serde(default)]
    pub include: Vec<PathBuf>,
    /// Directory that relative file references resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// File the plan was loaded from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Connection settings shared by every group
#[derive(Deserialize, Debug, Clone)]
pub struct GlobalConfig {
    /// S3-compatible service endpoint URL
    pub endpoint_url: String,
    /// Region identifier
    #[serde(default = "default_region")]
    pub region: String,
    /// Use path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,
    /// Named credential sets
    pub credentials: Vec<CredentialSet>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Named credentials for the storage service
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    /// Unique identifier referenced by groups and operations
    pub name: String,
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,
    /// Endpoint override for this credential
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Region override for this credential
    #[serde(default)]
    pub region: Option<String>,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("name", &self.name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .finish()
    }
}

/// Group execution settings
#[derive(Deserialize, Debug, Clone)]
pub struct TestCases {
    /// Run groups concurrently by default
    #[serde(default)]
    pub parallel: bool,
    /// Worker pool size for operations within one phase
    #[serde(default)]
    pub workers: Option<usize>,
    /// The groups, in declaration order
    pub groups: Vec<TestGroup>,
}

/// A named bundle of phases sharing a credential
#[derive(Deserialize, Debug, Clone)]
pub struct TestGroup {
    /// Unique group name
    pub name: String,
    /// Credential set used unless an operation overrides it
    pub credential: String,
    /// Setup operations (fail-fast)
    #[serde(default)]
    pub before_test: Vec<OperationSpec>,
    /// Test operations (best-effort)
    #[serde(default)]
    pub test: Vec<OperationSpec>,
    /// Teardown operations (best-effort)
    #[serde(default)]
    pub after_test: Vec<OperationSpec>,
}

impl TestGroup {
    /// Operations declared for a phase
    pub fn phase(&self, phase: Phase) -> &[OperationSpec] {
        match phase {
            Phase::Before => &self.before_test,
            Phase::Test => &self.test,
            Phase::After => &self.after_test,
        }
    }

    /// Total number of declared operations
    pub fn operation_count(&self) -> usize {
        self.before_test.len() + self.test.len() + self.after_test.len()
    }
}

/// One of the three ordered operation lists of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    Test,
    After,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Before, Phase::Test, Phase::After];

    /// Name used in plan files
    pub fn key(&self) -> &'static str {
        match self {
            Phase::Before => "before_test",
            Phase::Test => "test",
            Phase::After => "after_test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::Test => write!(f, "test"),
            Phase::After => write!(f, "after"),
        }
    }
}

/// A single operation declaration
#[derive(Deserialize, Debug, Clone)]
pub struct OperationSpec {
    /// Operation name, resolved against the operation registry
    pub operation: String,
    /// Credential override for this operation only
    #[serde(default)]
    pub credential: Option<String>,
    /// Raw parameters; `file://` strings are resolved at dispatch time
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Declared outcome
    #[serde(default)]
    pub expected_result: ExpectedResult,
}

/// Expected operation outcome
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExpectedResult {
    /// Whether the operation should succeed
    #[serde(default = "default_success")]
    pub success: bool,
    /// Expected normalized error code (required when `success` is false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Response content predicates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_contains: Option<ResponseContains>,
}

fn default_success() -> bool {
    true
}

impl Default for ExpectedResult {
    fn default() -> Self {
        Self {
            success: true,
            error_code: None,
            response_contains: None,
        }
    }
}

impl ExpectedResult {
    /// Expect a successful call
    pub fn success() -> Self {
        Self::default()
    }

    /// Expect a failure with the given error code
    pub fn failure(code: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
            response_contains: None,
        }
    }

    /// Problems with this expectation, if any
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let has_code = self.error_code.as_deref().is_some_and(|c| !c.trim().is_empty());

        if !self.success && !has_code {
            problems.push("error_code is required when success is false".to_string());
        }
        if self.success && self.error_code.is_some() {
            problems.push("error_code must not be set when success is true".to_string());
        }
        if let Some(pattern) = self
            .response_contains
            .as_ref()
            .and_then(|r| r.body_pattern.as_deref())
        {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("invalid body_pattern '{}': {}", pattern, e));
            }
        }
        problems
    }
}

/// Response content predicates
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ResponseContains {
    /// Header values that must match exactly (header names are case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Regex searched in the response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_pattern: Option<String>,
    /// User metadata values that must match exactly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TestPlan {
    /// Find a group by name
    pub fn group(&self, name: &str) -> Option<&TestGroup> {
        self.test_cases.groups.iter().find(|g| g.name == name)
    }

    /// Total number of declared operations across all groups
    pub fn operation_count(&self) -> usize {
        self.test_cases.groups.iter().map(|g| g.operation_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
config:
  endpoint_url: http://localhost:9000
  credentials:
    - name: admin
      access_key: AKIA
      secret_key: secret
test_cases:
  groups:
    - name: basic
      credential: admin
      test:
        - operation: ListBuckets
        - operation: HeadBucket
          parameters:
            bucket: missing
          expected_result:
            success: false
            error_code: NotFound
"#;

    #[test]
    fn test_parse_plan_defaults() {
        let plan: TestPlan = serde_yaml::from_str(PLAN).unwrap();
        assert_eq!(plan.config.region, "us-east-1");
        assert!(!plan.config.path_style);
        assert!(!plan.test_cases.parallel);

        let group = plan.group("basic").unwrap();
        assert!(group.before_test.is_empty());
        assert_eq!(group.test.len(), 2);
        assert!(group.test[0].expected_result.success);
        assert_eq!(
            group.test[1].expected_result,
            ExpectedResult::failure("NotFound")
        );
        assert_eq!(plan.operation_count(), 2);
    }

    #[test]
    fn test_expectation_problems() {
        let missing_code = ExpectedResult {
            success: false,
            error_code: Some("  ".into()),
            response_contains: None,
        };
        assert_eq!(missing_code.problems().len(), 1);

        let stray_code = ExpectedResult {
            success: true,
            error_code: Some("AccessDenied".into()),
            response_contains: None,
        };
        assert_eq!(stray_code.problems().len(), 1);

        let bad_regex = ExpectedResult {
            response_contains: Some(ResponseContains {
                body_pattern: Some("(unclosed".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(bad_regex.problems()[0].contains("body_pattern"));

        assert!(ExpectedResult::failure("AccessDenied").problems().is_empty());
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let cred = CredentialSet {
            name: "admin".into(),
            access_key: "AKIA".into(),
            secret_key: "super-secret".into(),
            session_token: Some("token".into()),
            endpoint_url: None,
            region: None,
        };
        let text = format!("{:?}", cred);
        assert!(!text.contains("super-secret"));
        assert!(!text.contains("\"token\""));
    }
}
