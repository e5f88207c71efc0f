//! Commands for the WiringPi `gpio` utility, using BCM pin numbers.

use crate::error::NodeError;
use crate::node::{MAX_DUTY_CYCLE, MAX_PIN, OutputMode, OutputParams};

fn check_pin(pin: Option<u8>) -> Result<u8, NodeError> {
    let pin = pin.ok_or_else(|| NodeError::validation("Pin number is required"))?;
    if pin > MAX_PIN {
        return Err(NodeError::validation(format!(
            "Pin {pin} is out of range (0-{MAX_PIN})"
        )));
    }
    Ok(pin)
}

/// Builds the command that configures a pin as output and drives it.
///
/// # Errors
///
/// Returns `NodeError::Validation` for a missing or out-of-range pin or duty cycle.
pub fn write_command(params: &OutputParams) -> Result<(u8, String), NodeError> {
    let pin = check_pin(params.pin)?;
    let command = match params.mode {
        OutputMode::Digital => {
            let level = u8::from(params.state);
            format!("gpio -g mode {pin} out && gpio -g write {pin} {level}")
        }
        OutputMode::Pwm => {
            let duty = params
                .duty_cycle
                .ok_or_else(|| NodeError::validation("Duty cycle is required for PWM"))?;
            if duty > MAX_DUTY_CYCLE {
                return Err(NodeError::validation(format!(
                    "Duty cycle {duty} is out of range (0-{MAX_DUTY_CYCLE})"
                )));
            }
            format!("gpio -g mode {pin} pwm && gpio -g pwm {pin} {duty}")
        }
    };
    Ok((pin, command))
}

/// Builds the command that reads a pin's level.
///
/// # Errors
///
/// Returns `NodeError::Validation` for an out-of-range pin.
pub fn read_command(pin: u8) -> Result<String, NodeError> {
    let pin = check_pin(Some(pin))?;
    Ok(format!("gpio -g read {pin}"))
}

/// Parses the output of `gpio read`.
#[must_use]
pub fn parse_level(stdout: &str) -> Option<bool> {
    match stdout.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}
