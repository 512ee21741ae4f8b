//! Run domain types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::payload::Payload;

/// Patchflow run record
///
/// Structure shared between the store backends (decode) and the runner (executes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub organization_id: i64,
    pub visibility: Visibility,
    pub status: RunStatus,
    pub inputs: Payload,
    pub outputs: Option<Payload>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub patchflow: Option<Patchflow>,
}

impl Run {
    /// Whether the runner should pick this run up for the given organization
    pub fn is_eligible(&self, organization_id: i64) -> bool {
        self.status == RunStatus::Pending
            && self.visibility == Visibility::Private
            && self.organization_id == organization_id
    }

    /// Name of the patchflow the external executable should run
    pub fn patchflow_name(&self) -> Option<&str> {
        self.patchflow.as_ref().and_then(Patchflow::identifier)
    }
}

/// Patchflow definition a run was created from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patchflow {
    pub name: Option<String>,
    /// Opaque graph definition; only its `name` field is read
    pub graph: JsonValue,
}

impl Patchflow {
    /// The graph's `name`, falling back to the patchflow's own name
    pub fn identifier(&self) -> Option<&str> {
        let graph_name = self.graph.get("name").and_then(JsonValue::as_str);
        graph_name
            .into_iter()
            .chain(self.name.as_deref())
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

/// Run visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    /// Reads visibility from a run's `meta` object
    ///
    /// A run is private only when `meta.is_private` is `true` (or the string
    /// `"true"`, which is how the flag is compared in SQL).
    pub fn from_meta(meta: Option<&JsonValue>) -> Self {
        let flag = meta.and_then(|m| m.get("is_private"));
        match flag {
            Some(JsonValue::Bool(true)) => Visibility::Private,
            Some(JsonValue::String(s)) if s == "true" => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

/// Run status
///
/// Statuses written by other producers are kept verbatim in `Other` so the
/// runner never rewrites a value it does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Other(s) => s,
        }
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            other => RunStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        RunStatus::from(s.as_str())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(status: RunStatus, visibility: Visibility, organization_id: i64) -> Run {
        let now = chrono::Utc::now();
        Run {
            id: 1,
            organization_id,
            visibility,
            status,
            inputs: Payload::new(),
            outputs: None,
            error: None,
            created_at: now,
            updated_at: now,
            patchflow: None,
        }
    }

    #[test]
    fn test_status_round_trips_known_values() {
        for s in ["pending", "running", "completed", "failed"] {
            assert_eq!(RunStatus::from(s).as_str(), s);
        }
        assert_eq!(RunStatus::from("pending"), RunStatus::Pending);
    }

    #[test]
    fn test_status_keeps_unknown_values() {
        let status = RunStatus::from("pr_created");
        assert_eq!(status, RunStatus::Other("pr_created".to_string()));
        assert_eq!(status.to_string(), "pr_created");
    }

    #[test]
    fn test_status_serde_is_plain_string() {
        assert_eq!(serde_json::to_value(RunStatus::Failed).unwrap(), json!("failed"));
        let status: RunStatus = serde_json::from_value(json!("running")).unwrap();
        assert_eq!(status, RunStatus::Running);
    }

    #[test]
    fn test_visibility_from_meta() {
        let private = json!({"is_private": true});
        let private_str = json!({"is_private": "true"});
        let public = json!({"is_private": false});
        let missing = json!({});

        assert_eq!(Visibility::from_meta(Some(&private)), Visibility::Private);
        assert_eq!(Visibility::from_meta(Some(&private_str)), Visibility::Private);
        assert_eq!(Visibility::from_meta(Some(&public)), Visibility::Public);
        assert_eq!(Visibility::from_meta(Some(&missing)), Visibility::Public);
        assert_eq!(Visibility::from_meta(None), Visibility::Public);
    }

    #[test]
    fn test_is_eligible() {
        assert!(run(RunStatus::Pending, Visibility::Private, 7).is_eligible(7));
        assert!(!run(RunStatus::Pending, Visibility::Private, 8).is_eligible(7));
        assert!(!run(RunStatus::Pending, Visibility::Public, 7).is_eligible(7));
        assert!(!run(RunStatus::Running, Visibility::Private, 7).is_eligible(7));
    }

    #[test]
    fn test_patchflow_identifier_prefers_graph_name() {
        let patchflow = Patchflow {
            name: Some("Custom Flow".to_string()),
            graph: json!({"name": "AutoFix", "nodes": []}),
        };
        assert_eq!(patchflow.identifier(), Some("AutoFix"));

        let fallback = Patchflow {
            name: Some("Custom Flow".to_string()),
            graph: json!({}),
        };
        assert_eq!(fallback.identifier(), Some("Custom Flow"));

        let blank_graph = Patchflow {
            name: Some("Custom Flow".to_string()),
            graph: json!({"name": "  "}),
        };
        assert_eq!(blank_graph.identifier(), Some("Custom Flow"));

        let blank = Patchflow {
            name: None,
            graph: JsonValue::Null,
        };
        assert_eq!(blank.identifier(), None);
    }
}
