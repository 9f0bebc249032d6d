//! TaskType - handler を選ぶための名前
//!
//! 命名規約: `{namespace}.{domain}.{action}.v{major}`（例: `demo.math.add.v1`）。
//! 規約は強制しません（空文字だけ拒否）。

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_string() {
        let t = TaskType::new("demo.math.add.v1");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"demo.math.add.v1\"");
    }

    #[test]
    fn blank_is_empty() {
        assert!(TaskType::new("  ").is_empty());
        assert!(!TaskType::from("x").is_empty());
    }
}
