// MIT License - Copyright (c) 2023 ad2driver contributors

//! Host-to-device command encoding.
//!
//! [`encode`] turns a [`CommandRequest`] into the exact bytes the device
//! expects on the wire. It is pure and never consults device state; the
//! protocol has no request ids, so any panel reaction arrives later as an
//! ordinary decoded message.

use crate::error::{Ad2Error, Result};

/// Arming mode for [`CommandRequest::Arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    Away,
    Stay,
}

/// Panic button, mapped to the keypad function keys F1..F3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicKind {
    Fire,
    Police,
    Medical,
}

/// Action applied to an emulated zone via the `L` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    Restore = 0,
    Fault = 1,
    Trouble = 2,
}

/// A host-issued command. Closed set; every variant has exact wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    Arm { mode: ArmMode, code: String },
    Disarm { code: String },
    Panic { kind: PanicKind },
    ProgramOutput { id: u32, action: OutputAction },
    ConfigWrite { key: String, value: String },
    ConfigRead,
    RequestVersion,
    Reboot,
}

impl CommandRequest {
    /// Short name for logging. Never includes keypad code digits.
    pub fn label(&self) -> &'static str {
        match self {
            CommandRequest::Arm { .. } => "arm",
            CommandRequest::Disarm { .. } => "disarm",
            CommandRequest::Panic { .. } => "panic",
            CommandRequest::ProgramOutput { .. } => "program-output",
            CommandRequest::ConfigWrite { .. } => "config-write",
            CommandRequest::ConfigRead => "config-read",
            CommandRequest::RequestVersion => "version-request",
            CommandRequest::Reboot => "reboot",
        }
    }
}

/// Settings the device firmware accepts in a `C` command.
const CONFIG_KEYS: [&str; 9] = [
    "ADDRESS",
    "CONFIGBITS",
    "MASK",
    "EXP",
    "REL",
    "LRR",
    "DEDUPLICATE",
    "MODE",
    "COM",
];

/// Serialize a command to wire bytes.
///
/// Keypad sequences (arm, disarm, panic) carry no terminator; device
/// commands (`L`, `C`, `V`) end with `\r`; reboot is the bare `=` byte.
pub fn encode(request: &CommandRequest) -> Result<Vec<u8>> {
    match request {
        CommandRequest::Arm { mode, code } => {
            validate_code(code)?;
            let digit = match mode {
                ArmMode::Away => '2',
                ArmMode::Stay => '3',
            };
            Ok(format!("{code}{digit}").into_bytes())
        }
        CommandRequest::Disarm { code } => {
            validate_code(code)?;
            Ok(format!("{code}1").into_bytes())
        }
        CommandRequest::Panic { kind } => {
            let key = match kind {
                PanicKind::Fire => 0x01,
                PanicKind::Police => 0x02,
                PanicKind::Medical => 0x03,
            };
            // The function keys are sent three times, as a held keypress.
            Ok(vec![key; 3])
        }
        CommandRequest::ProgramOutput { id, action } => {
            if !(1..=99).contains(id) {
                return Err(Ad2Error::invalid_command(format!(
                    "output id must be 1..=99, got {id}"
                )));
            }
            Ok(format!("L{id:02}{}\r", *action as u8).into_bytes())
        }
        CommandRequest::ConfigWrite { key, value } => {
            let key = key.to_ascii_uppercase();
            if !CONFIG_KEYS.contains(&key.as_str()) {
                return Err(Ad2Error::invalid_command(format!(
                    "unknown config key '{key}'"
                )));
            }
            if value.is_empty() {
                return Err(Ad2Error::invalid_command("config value is empty"));
            }
            if value
                .chars()
                .any(|c| c == '&' || c == '=' || c.is_ascii_control())
            {
                return Err(Ad2Error::invalid_command(
                    "config value must not contain '&', '=' or control characters",
                ));
            }
            Ok(format!("C{key}={value}\r").into_bytes())
        }
        CommandRequest::ConfigRead => Ok(b"C\r".to_vec()),
        CommandRequest::RequestVersion => Ok(b"V\r".to_vec()),
        CommandRequest::Reboot => Ok(b"=".to_vec()),
    }
}

fn validate_code(code: &str) -> Result<()> {
    if code.len() == 4 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Ad2Error::invalid_command("code must be exactly 4 digits"))
    }
}
