//! Typed access to resolved operation parameters

use std::collections::BTreeMap;

use serde_json::Value;

use crate::testing::params::{ParamValue, ResolvedParams};

use super::DispatchError;

/// A completed multipart part reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    pub part_number: i32,
    pub etag: String,
}

/// Parameter accessors that report problems as [`DispatchError::InvalidParameter`]
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    operation: &'a str,
    params: &'a ResolvedParams,
}

impl<'a> Args<'a> {
    pub fn new(operation: &'a str, params: &'a ResolvedParams) -> Self {
        Self { operation, params }
    }

    pub fn operation(&self) -> &'a str {
        self.operation
    }

    fn invalid(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::invalid(self.operation, reason)
    }

    fn literal(&self, name: &str) -> Result<Option<&'a Value>, DispatchError> {
        match self.params.get(name) {
            None | Some(ParamValue::Literal(Value::Null)) => Ok(None),
            Some(ParamValue::Literal(value)) => Ok(Some(value)),
            Some(ParamValue::File(_)) => {
                Err(self.invalid(format!("'{}' does not accept a file reference", name)))
            }
        }
    }

    /// Required string parameter
    pub fn string(&self, name: &str) -> Result<String, DispatchError> {
        self.opt_string(name)?
            .ok_or_else(|| self.invalid(format!("missing required parameter '{}'", name)))
    }

    /// Optional string; numbers and booleans are converted to text
    pub fn opt_string(&self, name: &str) -> Result<Option<String>, DispatchError> {
        match self.literal(name)? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(self.invalid(format!("'{}' must be a string", name))),
        }
    }

    /// Optional integer
    pub fn opt_i32(&self, name: &str) -> Result<Option<i32>, DispatchError> {
        match self.literal(name)? {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{}' is out of range", name))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(format!("'{}' must be an integer", name))),
            Some(_) => Err(self.invalid(format!("'{}' must be an integer", name))),
        }
    }

    /// Required integer
    pub fn i32(&self, name: &str) -> Result<i32, DispatchError> {
        self.opt_i32(name)?
            .ok_or_else(|| self.invalid(format!("missing required parameter '{}'", name)))
    }

    /// String map (metadata, tags); scalar values are converted to text
    pub fn string_map(&self, name: &str) -> Result<BTreeMap<String, String>, DispatchError> {
        match self.literal(name)? {
            None => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    Value::Number(_) | Value::Bool(_) => Ok((k.clone(), v.to_string())),
                    _ => Err(self.invalid(format!("'{}.{}' must be a scalar", name, k))),
                })
                .collect(),
            Some(_) => Err(self.invalid(format!("'{}' must be a mapping", name))),
        }
    }

    /// Payload bytes: file content, or the literal's text
    ///
    /// Non-string literals (e.g., an inline policy mapping) are serialized as JSON.
    pub async fn opt_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, DispatchError> {
        match self.params.get(name) {
            None | Some(ParamValue::Literal(Value::Null)) => Ok(None),
            Some(ParamValue::File(file)) => file.read().await.map(Some),
            Some(ParamValue::Literal(Value::String(s))) => Ok(Some(s.clone().into_bytes())),
            Some(ParamValue::Literal(value)) => serde_json::to_vec(value)
                .map(Some)
                .map_err(|e| self.invalid(format!("'{}': {}", name, e))),
        }
    }

    /// Payload as UTF-8 text
    pub async fn opt_text(&self, name: &str) -> Result<Option<String>, DispatchError> {
        match self.opt_bytes(name).await? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| self.invalid(format!("'{}' is not valid UTF-8", name))),
        }
    }

    /// Required payload text
    pub async fn text(&self, name: &str) -> Result<String, DispatchError> {
        self.opt_text(name)
            .await?
            .ok_or_else(|| self.invalid(format!("missing required parameter '{}'", name)))
    }

    /// Completed part list: `[{part_number, etag}]`
    pub fn parts(&self, name: &str) -> Result<Vec<PartRef>, DispatchError> {
        let items = match self.literal(name)? {
            None => return Err(self.invalid(format!("missing required parameter '{}'", name))),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(self.invalid(format!("'{}' must be a list", name))),
        };

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let part_number = item
                    .get("part_number")
                    .or_else(|| item.get("PartNumber"))
                    .and_then(Value::as_i64)
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| self.invalid(format!("{}[{}] needs a part_number", name, i)))?;
                let etag = item
                    .get("etag")
                    .or_else(|| item.get("ETag"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.invalid(format!("{}[{}] needs an etag", name, i)))?;
                Ok(PartRef {
                    part_number,
                    etag: etag.to_string(),
                })
            })
            .collect()
    }
}
