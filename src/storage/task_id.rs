use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_TASK_ID_LEN: usize = 128;

/// Opaque task identifier used as the filename stem in every storage root.
///
/// Carries no PHI. Only ASCII alphanumerics, `-` and `_` are accepted so an id
/// can never address a path outside its root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

/// Rejected task identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid task id '{value}': {reason}")]
pub struct InvalidTaskId {
    pub value: String,
    pub reason: &'static str,
}

impl TaskId {
    /// Generate a fresh identifier from a random UUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidTaskId> {
        let value = value.into();

        if value.is_empty() {
            return Err(InvalidTaskId {
                value,
                reason: "identifier is empty",
            });
        }

        if value.len() > MAX_TASK_ID_LEN {
            return Err(InvalidTaskId {
                value,
                reason: "identifier is too long",
            });
        }

        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidTaskId {
                value,
                reason: "only ASCII letters, digits, '-' and '_' are allowed",
            });
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short correlation code derived from the first identifier segment
    pub fn shortcode(&self) -> String {
        self.0
            .split('-')
            .next()
            .unwrap_or(&self.0)
            .to_ascii_uppercase()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for TaskId {
    type Err = InvalidTaskId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = InvalidTaskId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}
