//! Push notification payloads

use serde_json::{Map, Value};
use std::fmt;

use crate::error::PayloadError;

/// A push notification body. Always a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    fields: Map<String, Value>,
}

/// Fields of a push needed to run a deploy, extracted once all are present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub git_ref: String,
    pub branch: String,
    pub repo_name: String,
    pub origin: String,
}

impl Payload {
    /// Parse a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(PayloadError::NotAnObject),
        }
    }

    /// Returns the top-level value at `key`, if any
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The full ref, e.g. `refs/heads/master`
    pub fn git_ref(&self) -> Result<&str, PayloadError> {
        self.get("ref")
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingRef)
    }

    /// Last path segment of the ref
    pub fn branch(&self) -> Result<&str, PayloadError> {
        let git_ref = self.git_ref()?;
        Ok(git_ref.rsplit('/').next().unwrap_or(git_ref))
    }

    /// Clone URL, read from `repository.clone_url` or a top-level `clone_url`
    pub fn origin(&self) -> Result<&str, PayloadError> {
        self.get("repository")
            .and_then(|r| r.get("clone_url"))
            .or_else(|| self.get("clone_url"))
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingField("clone_url"))
    }

    pub fn repo_name(&self) -> Result<&str, PayloadError> {
        self.get("repository")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingField("repository.name"))
    }

    /// True when the push targets `expected_branch` and names a repository.
    /// This decides whether a build gets queued.
    pub fn validate(&self, expected_branch: &str) -> bool {
        match self.branch() {
            Ok(branch) => branch == expected_branch && self.has_repository(),
            Err(_) => false,
        }
    }

    pub fn push_event(&self) -> Result<PushEvent, PayloadError> {
        Ok(PushEvent {
            git_ref: self.git_ref()?.to_string(),
            branch: self.branch()?.to_string(),
            repo_name: self.repo_name()?.to_string(),
            origin: self.origin()?.to_string(),
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn has_repository(&self) -> bool {
        match self.get("repository") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }
}

/// Compact JSON
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.fields) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}
