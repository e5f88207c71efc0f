//! Node action handlers.
//!
//! Each handler turns one node's parameters into an `OutcomeRecord`.
//! Expected failures never escape: they become `success: false` outcomes.
//! The only error a handler returns is an authorization failure, which
//! aborts the run.

use crate::condition;
use crate::context::ExecutionContext;
use crate::error::{FlowError, NodeError, StoreError};
use crate::gpio;
use crate::node::{
    BranchParams, ConnectParams, ConnectTarget, MessageParams, OutputMode, OutputParams,
    RunCommandParams,
};
use crate::outcome::OutcomeRecord;
use crate::store::{DeviceRegistry, DeviceStatus};
use boardflow_core::DeviceId;
use boardflow_remote::{RemoteSession, SessionConnector};
use chrono::Utc;
use tracing::{debug, info, warn};

fn settle(result: Result<OutcomeRecord, NodeError>) -> OutcomeRecord {
    result.unwrap_or_else(|e| OutcomeRecord::failed(e.to_string()))
}

fn require_session(ctx: &ExecutionContext) -> Result<&dyn RemoteSession, NodeError> {
    ctx.session().ok_or(NodeError::NoActiveSession)
}

pub fn start() -> OutcomeRecord {
    OutcomeRecord::succeeded().with_message("Flow started")
}

pub fn end() -> OutcomeRecord {
    OutcomeRecord::succeeded().with_message("Flow ended")
}

/// Opens a session, closing the current one first.
///
/// # Errors
///
/// Returns `FlowError::Authorization` if the device belongs to another owner.
pub async fn connect(
    ctx: &mut ExecutionContext,
    params: &ConnectParams,
    connector: &dyn SessionConnector,
    devices: &dyn DeviceRegistry,
) -> Result<OutcomeRecord, FlowError> {
    ctx.close_session().await;

    let target = match params.target() {
        Ok(target) => target,
        Err(e) => return Ok(OutcomeRecord::failed(e.to_string())),
    };

    let (descriptor, device_id) = match target {
        ConnectTarget::Inline(descriptor) => (descriptor, None),
        ConnectTarget::Device(device_id) => {
            match devices.resolve_device(device_id, ctx.owner_id).await {
                Ok(descriptor) => (descriptor, Some(device_id)),
                Err(StoreError::AccessDenied { resource }) => {
                    return Err(FlowError::Authorization { resource });
                }
                Err(StoreError::NotFound { .. }) => {
                    let err = NodeError::DeviceNotFound { device_id };
                    return Ok(OutcomeRecord::failed(err.to_string())
                        .with_detail("deviceId", device_id.to_string()));
                }
                Err(StoreError::Backend { details }) => {
                    let err = NodeError::DeviceLookupFailed { reason: details };
                    return Ok(OutcomeRecord::failed(err.to_string())
                        .with_detail("deviceId", device_id.to_string()));
                }
            }
        }
    };

    let opened = connector.open(&descriptor).await;
    if let Some(device_id) = device_id {
        let status = if opened.is_ok() {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        };
        mark_device(devices, device_id, status).await;
    }

    let outcome = match opened {
        Ok(session) => {
            info!(host = %descriptor.host, port = descriptor.port, "connected to remote host");
            ctx.set_session(session);
            OutcomeRecord::succeeded().with_message(format!("Connected to {}", descriptor.host))
        }
        Err(e) => {
            warn!(host = %descriptor.host, error = %e, "failed to connect to remote host");
            OutcomeRecord::failed(NodeError::Connection(e).to_string())
        }
    };

    let outcome = outcome.with_detail("host", descriptor.host.as_str());
    Ok(match device_id {
        Some(device_id) => outcome.with_detail("deviceId", device_id.to_string()),
        None => outcome,
    })
}

async fn mark_device(devices: &dyn DeviceRegistry, device_id: DeviceId, status: DeviceStatus) {
    if let Err(e) = devices
        .mark_device_status(device_id, status, Utc::now())
        .await
    {
        warn!(%device_id, status = status.as_str(), error = %e, "failed to update device status");
    }
}

pub async fn run_command(ctx: &ExecutionContext, params: &RunCommandParams) -> OutcomeRecord {
    settle(
        async {
            let session = require_session(ctx)?;
            if params.command.trim().is_empty() {
                return Err(NodeError::validation("Command cannot be empty"));
            }
            debug!(host = session.host(), "running command");
            let output = session
                .run(&params.command)
                .await
                .map_err(NodeError::Execution)?;
            Ok(OutcomeRecord::from_command(output))
        }
        .await,
    )
}

pub async fn set_output(ctx: &ExecutionContext, params: &OutputParams) -> OutcomeRecord {
    settle(
        async {
            let session = require_session(ctx)?;
            let (pin, command) = gpio::write_command(params)?;
            let output = session.run(&command).await.map_err(NodeError::Execution)?;

            let outcome = OutcomeRecord::from_command(output)
                .with_detail("pin", pin)
                .with_detail("mode", params.mode.as_str());
            Ok(match params.mode {
                OutputMode::Digital => {
                    let level = if params.state { "HIGH" } else { "LOW" };
                    outcome
                        .with_message(format!("Pin {pin} set {level}"))
                        .with_detail("state", params.state)
                }
                OutputMode::Pwm => {
                    let duty = params.duty_cycle.unwrap_or_default();
                    outcome
                        .with_message(format!("Pin {pin} PWM duty cycle set to {duty}"))
                        .with_detail("dutyCycle", duty)
                }
            })
        }
        .await,
    )
}

pub async fn branch(ctx: &ExecutionContext, params: &BranchParams) -> OutcomeRecord {
    settle(
        async {
            let session = require_session(ctx)?;
            condition::evaluate(session, &params.condition).await
        }
        .await,
    )
}

pub fn send_message(params: &MessageParams) -> OutcomeRecord {
    if params.recipient.trim().is_empty() {
        return OutcomeRecord::failed(NodeError::validation("Recipient is required").to_string());
    }
    OutcomeRecord::succeeded()
        .with_message(params.message.clone())
        .with_detail("recipient", params.recipient.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryDeviceRegistry, ScriptedConnector};
    use crate::node::Condition;
    use boardflow_core::UserId;
    use boardflow_remote::{CommandOutput, ConnectionDescriptor, Credential};

    fn inline(host: &str) -> ConnectParams {
        ConnectParams {
            host: Some(host.to_string()),
            username: Some("pi".to_string()),
            password: Some("raspberry".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_command_without_session_never_calls_remote() {
        let ctx = ExecutionContext::new(None, UserId::new());
        let outcome = run_command(
            &ctx,
            &RunCommandParams {
                command: "echo hi".to_string(),
            },
        )
        .await;

        assert!(!outcome.success);
        assert!(
            outcome
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("No active session"))
        );
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());
        connect(&mut ctx, &inline("pi.local"), &connector, &devices)
            .await
            .expect("connect");

        let outcome = run_command(&ctx, &RunCommandParams::default()).await;
        assert_eq!(outcome.error.as_deref(), Some("Command cannot be empty"));
        assert!(connector.commands().is_empty());
    }

    #[tokio::test]
    async fn command_is_sent_as_written() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());
        connect(&mut ctx, &inline("pi.local"), &connector, &devices)
            .await
            .expect("connect");

        let outcome = run_command(
            &ctx,
            &RunCommandParams {
                command: "cat <<EOF\n  indented\nEOF\n".to_string(),
            },
        )
        .await;

        assert!(outcome.success);
        assert_eq!(connector.commands(), ["cat <<EOF\n  indented\nEOF\n"]);
    }

    #[tokio::test]
    async fn connect_supersedes_the_previous_session() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());

        connect(&mut ctx, &inline("a.local"), &connector, &devices)
            .await
            .expect("connect");
        connect(&mut ctx, &inline("b.local"), &connector, &devices)
            .await
            .expect("connect");

        assert_eq!(connector.opens(), 2);
        assert_eq!(connector.closes(), 1);
        assert_eq!(ctx.session().map(|s| s.host()), Some("b.local"));
    }

    #[tokio::test]
    async fn failed_connect_marks_device_offline() {
        let owner = UserId::new();
        let connector = ScriptedConnector::new().unreachable("10.0.0.9");
        let devices = InMemoryDeviceRegistry::new();
        let device_id = devices.register(
            owner,
            ConnectionDescriptor::new("10.0.0.9", "pi", Credential::password("raspberry")),
        );
        let mut ctx = ExecutionContext::new(None, owner);

        let outcome = connect(
            &mut ctx,
            &ConnectParams {
                device_id: Some(device_id.to_string()),
                ..Default::default()
            },
            &connector,
            &devices,
        )
        .await
        .expect("connect");

        assert!(!outcome.success);
        assert!(!ctx.has_session());
        assert_eq!(devices.status(device_id), Some(DeviceStatus::Offline));
    }

    #[tokio::test]
    async fn foreign_device_is_an_authorization_failure() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let device_id = devices.register(
            UserId::new(),
            ConnectionDescriptor::new("pi.local", "pi", Credential::password("raspberry")),
        );
        let mut ctx = ExecutionContext::new(None, UserId::new());

        let err = connect(
            &mut ctx,
            &ConnectParams {
                device_id: Some(device_id.to_string()),
                ..Default::default()
            },
            &connector,
            &devices,
        )
        .await
        .expect_err("authorization");

        assert!(matches!(err, FlowError::Authorization { .. }));
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test]
    async fn unknown_device_is_a_node_failure() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());

        let outcome = connect(
            &mut ctx,
            &ConnectParams {
                device_id: Some(DeviceId::new().to_string()),
                ..Default::default()
            },
            &connector,
            &devices,
        )
        .await
        .expect("connect");

        assert!(!outcome.success);
        assert!(
            outcome
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("Device not found"))
        );
    }

    #[tokio::test]
    async fn set_output_reports_pin_and_state() {
        let connector = ScriptedConnector::new();
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());
        connect(&mut ctx, &inline("pi.local"), &connector, &devices)
            .await
            .expect("connect");

        let outcome = set_output(
            &ctx,
            &OutputParams {
                pin: Some(17),
                state: true,
                ..Default::default()
            },
        )
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.detail("pin"), Some(&serde_json::json!(17)));
        assert_eq!(outcome.detail("state"), Some(&serde_json::json!(true)));
        assert_eq!(
            connector.commands(),
            ["gpio -g mode 17 out && gpio -g write 17 1"]
        );
    }

    #[tokio::test]
    async fn branch_requires_a_session() {
        let ctx = ExecutionContext::new(None, UserId::new());
        let outcome = branch(
            &ctx,
            &BranchParams {
                condition: Condition::FileExists {
                    path: "/tmp".to_string(),
                },
            },
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.condition_met, None);
    }

    #[tokio::test]
    async fn branch_evaluates_on_the_current_session() {
        let connector = ScriptedConnector::new().respond(
            "test -e '/tmp'",
            CommandOutput::new(0, "", ""),
        );
        let devices = InMemoryDeviceRegistry::new();
        let mut ctx = ExecutionContext::new(None, UserId::new());
        connect(&mut ctx, &inline("pi.local"), &connector, &devices)
            .await
            .expect("connect");

        let outcome = branch(
            &ctx,
            &BranchParams {
                condition: Condition::FileExists {
                    path: "/tmp".to_string(),
                },
            },
        )
        .await;
        assert_eq!(outcome.condition_met, Some(true));
    }

    #[test]
    fn send_message_needs_no_session() {
        let outcome = send_message(&MessageParams {
            recipient: "+15550100".to_string(),
            message: "Door opened".to_string(),
        });
        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("Door opened"));
        assert_eq!(outcome.detail("recipient"), Some(&serde_json::json!("+15550100")));

        assert!(!send_message(&MessageParams::default()).success);
    }
}
