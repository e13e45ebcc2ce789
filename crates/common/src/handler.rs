use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// The closed set of handlers a turn can be routed to.
///
/// Routing output is validated against this enum, so a hallucinated or
/// misspelled handler name can never reach dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerId {
    Ansible,
    Openshift,
    Terraform,
    General,
}

impl HandlerId {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerId::Ansible => "ansible",
            HandlerId::Openshift => "openshift",
            HandlerId::Terraform => "terraform",
            HandlerId::General => "general",
        }
    }

    pub fn all() -> [HandlerId; 4] {
        [
            HandlerId::Ansible,
            HandlerId::Openshift,
            HandlerId::Terraform,
            HandlerId::General,
        ]
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ansible" => Ok(HandlerId::Ansible),
            "openshift" => Ok(HandlerId::Openshift),
            "terraform" => Ok(HandlerId::Terraform),
            "general" => Ok(HandlerId::General),
            other => Err(RelayError::Routing(format!("unknown handler: {other}"))),
        }
    }
}

/// Static definition of a handler: its system instructions, the vocabulary
/// that routes turns to it, and the capabilities it is allowed to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerDefinition {
    pub id: HandlerId,
    /// System instructions. May contain `{user_id}` and `{time}`
    /// placeholders filled in at turn time.
    pub instructions: String,
    /// Lowercase keywords and phrases that route a turn here.
    pub triggers: Vec<String>,
    /// Qualified capability names bound to this handler. An entry of the
    /// form `provider::*` binds every capability that provider exposes.
    pub bound_capabilities: BTreeSet<String>,
}

impl HandlerDefinition {
    /// Fill in the instruction placeholders for the current turn.
    pub fn render_instructions(&self, user_id: &str, time: &str) -> String {
        self.instructions
            .replace("{user_id}", user_id)
            .replace("{time}", time)
    }
}
