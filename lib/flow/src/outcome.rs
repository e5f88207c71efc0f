//! Outcome records: the structured result of running one node.

use boardflow_remote::CommandOutput;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// The result of executing one node.
///
/// Kind-specific fields (pin, recipient, iterations, ...) live in `details`
/// and are flattened into the record when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_met: Option<bool>,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

impl OutcomeRecord {
    /// A successful outcome with no further fields.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A failed outcome carrying an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// An outcome from a remote command; succeeds on exit code 0.
    #[must_use]
    pub fn from_command(output: CommandOutput) -> Self {
        let success = output.succeeded();
        let error = (!success).then(|| {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                format!("Command exited with code {}", output.exit_code)
            } else {
                stderr.to_string()
            }
        });

        Self {
            success,
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
            exit_code: Some(output.exit_code),
            error,
            ..Default::default()
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the evaluated condition.
    #[must_use]
    pub fn with_condition(mut self, met: bool) -> Self {
        self.condition_met = Some(met);
        self
    }

    /// Adds a kind-specific field.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Returns a kind-specific field.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&JsonValue> {
        self.details.get(key)
    }
}
