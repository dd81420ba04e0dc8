use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The stable billing/organizational identifier attached to an
/// [`crate::Account`]. Invariant across reuses: once `id` is non-empty it
/// must never change or become empty again.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct LegalEntity {
    /// Stable identifier assigned by the billing system.
    pub id: String,

    /// Human-readable name, informational only.
    pub name: String,
}

impl LegalEntity {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}
