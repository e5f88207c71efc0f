//! Condition evaluation for branch nodes.

use crate::error::NodeError;
use crate::gpio;
use crate::node::Condition;
use crate::outcome::OutcomeRecord;
use boardflow_remote::RemoteSession;

/// Wraps a string in single quotes for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Evaluates a condition on the remote host.
///
/// A normal evaluation is `success: true` with `conditionMet` set. The
/// outcome is `success: false` only when the remote command itself fails.
///
/// # Errors
///
/// Returns `NodeError` for invalid parameters or transport failures.
pub async fn evaluate(
    session: &dyn RemoteSession,
    condition: &Condition,
) -> Result<OutcomeRecord, NodeError> {
    match condition {
        Condition::Command {
            command,
            operator,
            expected,
        } => {
            if command.trim().is_empty() {
                return Err(NodeError::validation("Condition command cannot be empty"));
            }
            let output = session.run(command).await.map_err(NodeError::Execution)?;
            let met = operator.evaluate(output.stdout.trim(), expected);
            let outcome = OutcomeRecord::from_command(output);
            if !outcome.success {
                return Ok(outcome);
            }
            Ok(with_verdict(outcome, met))
        }
        Condition::FileExists { path } => {
            if path.is_empty() {
                return Err(NodeError::validation("Path cannot be empty"));
            }
            let output = session
                .run(&format!("test -e {}", shell_quote(path)))
                .await
                .map_err(NodeError::Execution)?;
            let met = match output.exit_code {
                0 => true,
                1 => false,
                _ => return Ok(OutcomeRecord::from_command(output)),
            };
            let outcome = OutcomeRecord {
                success: true,
                exit_code: Some(output.exit_code),
                ..Default::default()
            };
            Ok(with_verdict(outcome, met).with_detail("path", path.as_str()))
        }
        Condition::Gpio { pin, expected } => {
            let command = gpio::read_command(*pin)?;
            let output = session.run(&command).await.map_err(NodeError::Execution)?;
            if !output.succeeded() {
                return Ok(OutcomeRecord::from_command(output).with_detail("pin", *pin));
            }
            let Some(level) = gpio::parse_level(&output.stdout) else {
                return Ok(OutcomeRecord::failed(format!(
                    "Unexpected pin value: {}",
                    output.stdout.trim()
                ))
                .with_detail("pin", *pin));
            };
            let outcome = OutcomeRecord::from_command(output)
                .with_detail("pin", *pin)
                .with_detail("state", level);
            Ok(with_verdict(outcome, level == *expected))
        }
    }
}

fn with_verdict(outcome: OutcomeRecord, met: bool) -> OutcomeRecord {
    let message = if met {
        "Condition met"
    } else {
        "Condition not met"
    };
    outcome.with_condition(met).with_message(message)
}
