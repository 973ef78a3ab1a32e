//! Parameter resolution
//!
//! String parameters starting with `file://` name a local payload file,
//! resolved against the plan's base directory. Only the path and an
//! existence flag are recorded here; content is read when an operation
//! actually needs it.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::operations::DispatchError;

/// Marker prefix for local file references
pub const FILE_MARKER: &str = "file://";

/// A resolved local file reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    /// The declared value, including the marker
    pub raw: String,
    /// Absolute path of the file
    pub path: PathBuf,
    /// Whether the file existed at resolution time
    pub exists: bool,
}

impl FileRef {
    /// Parse a marked value; `None` if the value is not a file reference
    pub fn parse(value: &str, base_dir: &Path) -> Option<Self> {
        let rest = value.strip_prefix(FILE_MARKER)?;
        let path = Path::new(rest);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        let path = std::path::absolute(&path).unwrap_or(path);
        let exists = path.is_file();

        Some(Self {
            raw: value.to_string(),
            path,
            exists,
        })
    }

    /// Read the file content
    pub async fn read(&self) -> Result<Vec<u8>, DispatchError> {
        tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DispatchError::FileNotFound(self.path.clone()),
            _ => DispatchError::Internal(format!(
                "failed to read '{}': {}",
                self.path.display(),
                e
            )),
        })
    }
}

/// A parameter value after resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Literal(Value),
    File(FileRef),
}

/// Resolved copy of an operation's parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedParams {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// File references among the parameters
    pub fn files(&self) -> impl Iterator<Item = &FileRef> {
        self.values.values().filter_map(|v| match v {
            ParamValue::File(file) => Some(file),
            ParamValue::Literal(_) => None,
        })
    }
}

impl FromIterator<(String, ParamValue)> for ResolvedParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Expands raw parameter maps relative to a base directory
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    base_dir: PathBuf,
}

impl ParameterResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Produce a resolved copy; the declaration itself is left untouched
    pub fn resolve(&self, raw: &BTreeMap<String, Value>) -> ResolvedParams {
        raw.iter()
            .map(|(name, value)| {
                let resolved = match value {
                    Value::String(s) => match FileRef::parse(s, &self.base_dir) {
                        Some(file) => ParamValue::File(file),
                        None => ParamValue::Literal(value.clone()),
                    },
                    other => ParamValue::Literal(other.clone()),
                };
                (name.clone(), resolved)
            })
            .collect()
    }

    /// File references that do not exist (strict validation)
    pub fn missing_files(&self, raw: &BTreeMap<String, Value>) -> Vec<FileRef> {
        self.resolve(raw)
            .files()
            .filter(|file| !file.exists)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_resolve_marks_files_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload.txt"), "hello").unwrap();

        let resolver = ParameterResolver::new(dir.path());
        let params = resolver.resolve(&raw(json!({
            "bucket": "b",
            "max_keys": 10,
            "body": "file://payload.txt",
            "missing": "file://nowhere.bin",
        })));

        assert_eq!(params.get("bucket"), Some(&ParamValue::Literal(json!("b"))));
        assert_eq!(params.get("max_keys"), Some(&ParamValue::Literal(json!(10))));

        match params.get("body") {
            Some(ParamValue::File(file)) => {
                assert!(file.exists);
                assert!(file.path.is_absolute());
                assert!(file.path.ends_with("payload.txt"));
            }
            other => panic!("expected file reference, got {:?}", other),
        }
        assert_eq!(params.files().count(), 2);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ParameterResolver::new(dir.path());
        let missing = resolver.missing_files(&raw(json!({ "body": "file://gone.txt" })));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].raw, "file://gone.txt");
    }

    #[tokio::test]
    async fn test_read_missing_file_fails_at_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileRef::parse("file://later.txt", dir.path()).unwrap();
        assert!(!file.exists);
        assert!(matches!(
            file.read().await,
            Err(DispatchError::FileNotFound(_))
        ));

        std::fs::write(dir.path().join("later.txt"), "now").unwrap();
        assert_eq!(file.read().await.unwrap(), b"now");
    }

    #[test]
    fn test_absolute_reference_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("abs.txt");
        let value = format!("{}{}", FILE_MARKER, target.display());
        let file = FileRef::parse(&value, Path::new("/elsewhere")).unwrap();
        assert_eq!(file.path, target);
    }
}
