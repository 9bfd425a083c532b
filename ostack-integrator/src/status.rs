//! Workload status reporting.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Status of the integrator as a whole. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum Status {
    Active(String),
    Maintenance(String),
    Blocked(String),
}

impl Status {
    pub fn active(message: impl Into<String>) -> Self {
        Status::Active(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Status::Maintenance(message.into())
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Status::Blocked(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Active(m) | Status::Maintenance(m) | Status::Blocked(m) => m,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Status::Blocked(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Status::Active(_) => "active",
            Status::Maintenance(_) => "maintenance",
            Status::Blocked(_) => "blocked",
        };
        write!(f, "{}: {}", state, self.message())
    }
}

/// Receives status updates.
pub trait StatusSink: Send + Sync {
    fn set(&self, status: Status);
}

/// Keeps the latest status and logs every transition.
#[derive(Default)]
pub struct StatusReporter {
    current: Mutex<Option<Status>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Status> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    /// Write the current status as JSON to `path`.
    pub async fn persist(&self, path: &Path) -> std::io::Result<()> {
        let Some(status) = self.current() else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&status)?;
        tokio::fs::write(path, text).await
    }
}

impl StatusSink for StatusReporter {
    fn set(&self, status: Status) {
        match &status {
            Status::Blocked(message) => warn!(target: "status", "blocked: {}", message),
            other => info!(target: "status", "{}", other),
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let reporter = StatusReporter::new();
        assert_eq!(reporter.current(), None);

        reporter.set(Status::maintenance("Granting integration requests"));
        reporter.set(Status::active("Ready"));
        assert_eq!(reporter.current(), Some(Status::active("Ready")));
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_value(Status::blocked("quota exceeded")).unwrap();
        assert_eq!(json["state"], "blocked");
        assert_eq!(json["message"], "quota exceeded");
    }

    #[tokio::test]
    async fn test_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new();

        reporter.persist(&path).await.unwrap();
        assert!(!path.exists());

        reporter.set(Status::active("Ready"));
        reporter.persist(&path).await.unwrap();
        let status: Status =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(status, Status::active("Ready"));
    }
}
