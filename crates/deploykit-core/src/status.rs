//! Stack and stack-instance status models.

use serde::{Deserialize, Serialize};

/// CloudFormation stack status, parsed from the control plane's strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    RollbackInProgress,
    RollbackComplete,
    RollbackFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    ReviewInProgress,
    /// Status string this version does not know about. Treated as present
    /// and non-terminal so the poller keeps watching rather than guessing.
    Other(String),
}

impl StackStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "CREATE_IN_PROGRESS" => StackStatus::CreateInProgress,
            "CREATE_COMPLETE" => StackStatus::CreateComplete,
            "CREATE_FAILED" => StackStatus::CreateFailed,
            "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => {
                StackStatus::UpdateInProgress
            }
            "UPDATE_COMPLETE" => StackStatus::UpdateComplete,
            "UPDATE_FAILED" => StackStatus::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" | "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                StackStatus::UpdateRollbackInProgress
            }
            "UPDATE_ROLLBACK_COMPLETE" => StackStatus::UpdateRollbackComplete,
            "UPDATE_ROLLBACK_FAILED" => StackStatus::UpdateRollbackFailed,
            "ROLLBACK_IN_PROGRESS" => StackStatus::RollbackInProgress,
            "ROLLBACK_COMPLETE" => StackStatus::RollbackComplete,
            "ROLLBACK_FAILED" => StackStatus::RollbackFailed,
            "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
            "DELETE_COMPLETE" => StackStatus::DeleteComplete,
            "DELETE_FAILED" => StackStatus::DeleteFailed,
            "REVIEW_IN_PROGRESS" => StackStatus::ReviewInProgress,
            other => StackStatus::Other(other.to_string()),
        }
    }

    /// `DELETE_COMPLETE` is the one status treated as absence; every other
    /// status, failure states included, means the stack is present.
    pub fn is_absent(&self) -> bool {
        matches!(self, StackStatus::DeleteComplete)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateRollbackInProgress
                | StackStatus::RollbackInProgress
                | StackStatus::DeleteInProgress
                | StackStatus::Other(_)
        )
    }

    /// Healthy terminal states an update can be issued against.
    pub fn is_current(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete
                | StackStatus::UpdateComplete
                | StackStatus::UpdateRollbackComplete
        )
    }

    /// States that require a repair (delete-then-recreate or
    /// continue-rollback) before an idempotent create/update can proceed.
    pub fn needs_repair(&self) -> bool {
        matches!(
            self,
            StackStatus::RollbackComplete
                | StackStatus::RollbackFailed
                | StackStatus::CreateFailed
                | StackStatus::DeleteFailed
                | StackStatus::UpdateRollbackFailed
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::UpdateFailed => "UPDATE_FAILED",
            StackStatus::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            StackStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            StackStatus::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::RollbackFailed => "ROLLBACK_FAILED",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::ReviewInProgress => "REVIEW_IN_PROGRESS",
            StackStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one stack-set instance in one (account, region).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Current,
    Outdated,
    Inoperable,
}

impl InstanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CURRENT" => Some(InstanceStatus::Current),
            "OUTDATED" => Some(InstanceStatus::Outdated),
            "INOPERABLE" => Some(InstanceStatus::Inoperable),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Current => write!(f, "CURRENT"),
            InstanceStatus::Outdated => write!(f, "OUTDATED"),
            InstanceStatus::Inoperable => write!(f, "INOPERABLE"),
        }
    }
}

/// One stack-set instance as reported by list-stack-instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackInstance {
    pub account: String,
    pub region: String,
    pub status: InstanceStatus,
}

/// Result of probing a resource: present or not, and in what state.
///
/// "Not found" is a valid outcome encoded in `present`, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub present: bool,
    pub status: Option<StackStatus>,
}

impl Probe {
    pub fn absent() -> Self {
        Self { present: false, status: None }
    }

    pub fn present(status: StackStatus) -> Self {
        Self { present: true, status: Some(status) }
    }

    /// Present without a meaningful status (buckets, parameters, and the
    /// other kinds that either exist or do not).
    pub fn present_plain() -> Self {
        Self { present: true, status: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_complete_is_absent() {
        assert!(StackStatus::parse("DELETE_COMPLETE").is_absent());
        assert!(!StackStatus::parse("DELETE_FAILED").is_absent());
        assert!(!StackStatus::parse("ROLLBACK_COMPLETE").is_absent());
    }

    #[test]
    fn failure_states_are_present_and_need_repair() {
        for s in ["ROLLBACK_COMPLETE", "DELETE_FAILED", "CREATE_FAILED"] {
            let status = StackStatus::parse(s);
            assert!(!status.is_absent(), "{s} must read as present");
            assert!(status.needs_repair(), "{s} must need repair");
        }
        assert!(!StackStatus::parse("CREATE_COMPLETE").needs_repair());
    }

    #[test]
    fn unknown_status_is_non_terminal() {
        let status = StackStatus::parse("IMPORT_IN_PROGRESS");
        assert!(matches!(status, StackStatus::Other(_)));
        assert!(!status.is_terminal());
        assert_eq!(status.as_str(), "IMPORT_IN_PROGRESS");
    }

    #[test]
    fn in_progress_states_are_not_terminal() {
        assert!(!StackStatus::parse("CREATE_IN_PROGRESS").is_terminal());
        assert!(!StackStatus::parse("DELETE_IN_PROGRESS").is_terminal());
        assert!(StackStatus::parse("CREATE_COMPLETE").is_terminal());
        assert!(StackStatus::parse("DELETE_FAILED").is_terminal());
    }

    #[test]
    fn instance_status_round_trip() {
        assert_eq!(InstanceStatus::parse("CURRENT"), Some(InstanceStatus::Current));
        assert_eq!(InstanceStatus::parse("OUTDATED"), Some(InstanceStatus::Outdated));
        assert_eq!(InstanceStatus::parse("bogus"), None);
    }
}
