use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One entry in a resource's `status.conditions` list. Shared across
/// [`crate::Account`], [`crate::AccountClaim`] and [`crate::AccountPool`]
/// so callers can scan all three with the same helper.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Condition {
    /// Short, camel-case identifier of the condition, e.g. `"Creating"`
    /// or `"Verified"`.
    #[serde(rename = "type")]
    pub type_: String,

    /// `"True"`, `"False"` or `"Unknown"`, following the core Kubernetes
    /// condition convention.
    pub status: String,

    /// Short machine-readable reason for the condition's last transition.
    pub reason: Option<String>,

    /// Human-readable message indicating details about the condition.
    pub message: Option<String>,

    /// Timestamp of the most recent time this condition was checked,
    /// regardless of whether its value changed.
    #[serde(rename = "lastProbeTime")]
    pub last_probe_time: Option<String>,

    /// Timestamp of the most recent time this condition's value changed.
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Builds a condition whose probe and transition times are both now.
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Condition {
            type_: type_.into(),
            status: status.into(),
            reason: None,
            message: None,
            last_probe_time: Some(now.clone()),
            last_transition_time: Some(now),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Upserts `condition` into `conditions` by `type_`, refreshing
/// `last_probe_time` always and `last_transition_time` only when the
/// status actually changed. Keeps condition lists idempotent across
/// repeated reconciles of an unchanged resource, apart from the
/// monotonically advancing probe timestamp.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    let now = chrono::Utc::now().to_rfc3339();
    condition.last_probe_time = Some(now.clone());
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.status == condition.status => {
            existing.last_probe_time = condition.last_probe_time;
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        Some(existing) => {
            condition.last_transition_time = Some(now);
            *existing = condition;
        }
        None => {
            conditions.push(condition);
        }
    }
}

/// Returns the named condition, if present.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
