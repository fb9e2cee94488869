//! Builders and processor families.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::BuilderId;

/// A compatibility class grouping interchangeable CPU architectures.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct ProcessorFamily(String);

impl ProcessorFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessorFamily {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A worker machine that runs one build at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    /// Unique identifier.
    pub id: BuilderId,
    /// Builder name.
    pub name: String,
    /// RPC endpoint.
    pub url: Url,
    pub family: ProcessorFamily,
    /// Runs builds inside a resettable virtual machine.
    #[serde(default)]
    pub virtualized: bool,
    /// Host of the virtual machine, for operators.
    #[serde(default)]
    pub vm_host: Option<String>,
    /// Health flag.
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// Why the builder was last marked unhealthy.
    #[serde(default)]
    pub failure_note: Option<String>,
    /// Excluded from automatic scheduling.
    #[serde(default)]
    pub manual: bool,
    /// Relative speed index, informational.
    #[serde(default)]
    pub speed_index: u32,
    /// Consecutive failures since the last successful dispatch.
    #[serde(default)]
    pub failure_count: u32,
}

fn default_ok() -> bool {
    true
}

impl Builder {
    /// Mark the builder unhealthy.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.ok = false;
        self.failure_note = Some(reason.into());
        self.failure_count += 1;
    }

    /// Clear the health fault.
    pub fn recover(&mut self) {
        self.ok = true;
        self.failure_note = None;
    }

    /// Whether the scheduler may hand this builder work.
    pub fn is_schedulable(&self) -> bool {
        self.ok && !self.manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> Builder {
        serde_json::from_str(
            r#"{"id": 1, "name": "bob", "url": "http://bob:8221/", "family": "x86"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let b = builder();
        assert!(b.ok);
        assert!(!b.virtualized);
        assert!(b.is_schedulable());
        assert_eq!(b.family, ProcessorFamily::new("x86"));
    }

    #[test]
    fn test_fail_and_recover() {
        let mut b = builder();
        b.fail("connection refused");
        assert!(!b.ok);
        assert_eq!(b.failure_count, 1);
        assert_eq!(b.failure_note.as_deref(), Some("connection refused"));
        assert!(!b.is_schedulable());

        b.recover();
        assert!(b.ok);
        assert!(b.failure_note.is_none());
        assert_eq!(b.failure_count, 1);
    }

    #[test]
    fn test_manual_builder_not_schedulable() {
        let mut b = builder();
        b.manual = true;
        assert!(!b.is_schedulable());
    }
}
