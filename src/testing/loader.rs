//! Test plan loading
//!
//! Reads a YAML plan, substitutes `${VAR}` / `${VAR:-default}` from the
//! environment, merges `include` files (the including file wins) and records
//! the directory relative file references resolve against.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_yaml::Value;

use crate::common::{Error, Result};

use super::config::TestPlan;

/// Load a test plan from a YAML file, following includes
pub fn load_plan(path: &Path) -> Result<TestPlan> {
    let path = path
        .canonicalize()
        .map_err(|e| Error::config_read(path, e))?;

    let mut stack = Vec::new();
    let value = load_value(&path, &mut stack)?;

    let mut plan: TestPlan =
        serde_yaml::from_value(value).map_err(|e| Error::config_parse(&path, e))?;
    plan.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    plan.source = Some(path);

    tracing::debug!(
        groups = plan.test_cases.groups.len(),
        operations = plan.operation_count(),
        "Loaded test plan"
    );
    Ok(plan)
}

fn load_value(path: &Path, stack: &mut Vec<PathBuf>) -> Result<Value> {
    if stack.iter().any(|p| p == path) {
        return Err(Error::IncludeCycle(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| Error::config_read(path, e))?;
    let content = substitute_env(&content, |name| std::env::var(name).ok());
    let current: Value =
        serde_yaml::from_str(&content).map_err(|e| Error::config_parse(path, e))?;

    let includes = include_paths(&current, path)?;
    if includes.is_empty() {
        return Ok(current);
    }

    stack.push(path.to_path_buf());
    let mut merged = Value::Mapping(Default::default());
    for include in includes {
        let include = include
            .canonicalize()
            .map_err(|e| Error::config_read(&include, e))?;
        tracing::debug!(include = %include.display(), "Merging included plan");
        let mut included = load_value(&include, stack)?;
        if let Value::Mapping(map) = &mut included {
            map.remove("include");
        }
        deep_merge(&mut merged, included);
    }
    stack.pop();

    deep_merge(&mut merged, current);
    Ok(merged)
}

fn include_paths(value: &Value, path: &Path) -> Result<Vec<PathBuf>> {
    let base = path.parent().unwrap_or(Path::new("."));
    match value.get("include") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(base.join(s)),
                other => Err(Error::config_parse(
                    path,
                    format!("include entries must be paths, got {:?}", other),
                )),
            })
            .collect(),
        Some(_) => Err(Error::config_parse(path, "include must be a list of paths")),
    }
}

/// Merge `overlay` into `base`; mappings merge recursively, anything else replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Replace `${VAR}` and `${VAR:-default}`; unset variables without a default stay verbatim
pub fn substitute_env<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

    pattern
        .replace_all(content, |caps: &Captures| {
            let expr = &caps[1];
            match expr.split_once(":-") {
                Some((name, default)) => {
                    lookup(name.trim()).unwrap_or_else(|| default.trim().to_string())
                }
                None => lookup(expr.trim()).unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "ACCESS" => Some("AKIA123".into()),
            _ => None,
        }
    }

    #[test]
    fn test_substitute_env() {
        assert_eq!(substitute_env("key: ${ACCESS}", lookup), "key: AKIA123");
        assert_eq!(
            substitute_env("key: ${MISSING:-fallback}", lookup),
            "key: fallback"
        );
        assert_eq!(substitute_env("key: ${MISSING}", lookup), "key: ${MISSING}");
        assert_eq!(
            substitute_env("key: ${ACCESS:-unused}", lookup),
            "key: AKIA123"
        );
    }

    #[test]
    fn test_deep_merge_prefers_overlay() {
        let mut base: Value = serde_yaml::from_str("a: {x: 1, y: 2}\nb: [1]").unwrap();
        let overlay: Value = serde_yaml::from_str("a: {y: 3}\nb: [2, 3]").unwrap();
        deep_merge(&mut base, overlay);

        let expected: Value = serde_yaml::from_str("a: {x: 1, y: 3}\nb: [2, 3]").unwrap();
        assert_eq!(base, expected);
    }

    #[test]
    fn test_load_plan_with_include() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("common.yaml"),
            r#"
config:
  endpoint_url: http://localhost:9000
  region: eu-west-1
  credentials:
    - name: admin
      access_key: a
      secret_key: s
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("plan.yaml"),
            r#"
include: [common.yaml]
config:
  region: us-west-2
test_cases:
  groups:
    - name: g
      credential: admin
      test:
        - operation: ListBuckets
"#,
        )
        .unwrap();

        let plan = load_plan(&dir.path().join("plan.yaml")).unwrap();
        assert_eq!(plan.config.endpoint_url, "http://localhost:9000");
        assert_eq!(plan.config.region, "us-west-2");
        assert_eq!(plan.config.credentials.len(), 1);
        assert_eq!(plan.base_dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "include: [b.yaml]\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "include: [a.yaml]\n").unwrap();

        let err = load_plan(&dir.path().join("a.yaml")).unwrap_err();
        assert!(matches!(err, Error::IncludeCycle(_)));
    }

    #[test]
    fn test_missing_file_is_config_read_error() {
        let err = load_plan(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
        assert!(err.is_configuration());
    }
}
