// MIT License - Copyright (c) 2023 ad2driver contributors

use crate::error::{Ad2Error, Result};

/// Reporting table a coded LRR event came from, identified by the prefix
/// ahead of the underscore (`CID_3441`, `DSC_1123`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrrSource {
    ContactId,
    Dsc,
    Ademco,
    Device,
    Unknown,
}

impl LrrSource {
    fn from_prefix(s: &str) -> Self {
        match s {
            "CID" => Self::ContactId,
            "DSC" => Self::Dsc,
            "ADEMCO" => Self::Ademco,
            "AD2" => Self::Device,
            _ => Self::Unknown,
        }
    }
}

/// ContactID event qualifier digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrrQualifier {
    /// 1 - new event, or opening for open/close classes
    Event,
    /// 3 - restoral, or closing for open/close classes
    Restore,
    /// 6 - previously reported condition still present
    Previous,
}

/// Semantic class of an LRR event, from the ContactID code table in the
/// device protocol reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrrCategory {
    Medical,
    Fire,
    Panic,
    Duress,
    Silent,
    Burglary,
    GeneralAlarm,
    NonBurglary,
    AcLoss,
    BatteryLow,
    SystemTrouble,
    ZoneTrouble,
    OpenClose,
    OpenCloseStay,
    Bypass,
    Test,
    Other,
}

/// Map a 3-digit ContactID event code to its class.
pub fn cid_category(code: u16) -> LrrCategory {
    match code {
        100..=102 => LrrCategory::Medical,
        110..=118 => LrrCategory::Fire,
        120 | 123..=126 => LrrCategory::Panic,
        121 => LrrCategory::Duress,
        122 => LrrCategory::Silent,
        130..=139 => LrrCategory::Burglary,
        140..=149 => LrrCategory::GeneralAlarm,
        150..=169 => LrrCategory::NonBurglary,
        301 => LrrCategory::AcLoss,
        302 => LrrCategory::BatteryLow,
        300 | 303..=353 => LrrCategory::SystemTrouble,
        370..=382 => LrrCategory::ZoneTrouble,
        400 | 401 | 403 | 406..=409 => LrrCategory::OpenClose,
        441 | 442 => LrrCategory::OpenCloseStay,
        570..=576 => LrrCategory::Bypass,
        601..=616 => LrrCategory::Test,
        _ => LrrCategory::Other,
    }
}

/// Map a v1 firmware keyword event to its class.
fn keyword_category(keyword: &str) -> LrrCategory {
    match keyword {
        "ALARM_FIRE" => LrrCategory::Fire,
        "ALARM_PANIC" => LrrCategory::Panic,
        "ALARM_SILENT" => LrrCategory::Silent,
        "ALARM_AUX" => LrrCategory::Medical,
        "ALARM_AUDIBLE" | "ALARM_ENTRY" | "ALARM_PERIMETER" | "ALARM_EXIT_ERROR" => {
            LrrCategory::Burglary
        }
        "AC_LOSS" | "AC_RESTORE" => LrrCategory::AcLoss,
        "LOWBAT" | "LOWBAT_RESTORE" => LrrCategory::BatteryLow,
        "RFLOWBAT" | "RFLOWBAT_RESTORE" => LrrCategory::Other,
        "BYPASS" | "BYPASS_RESTORE" => LrrCategory::Bypass,
        "TROUBLE" | "TROUBLE_RESTORE" => LrrCategory::ZoneTrouble,
        "TEST_CALL" | "TEST_RESTORE" => LrrCategory::Test,
        "ARM_AWAY" | "OPEN" | "CANCEL" => LrrCategory::OpenClose,
        "ARM_STAY" => LrrCategory::OpenCloseStay,
        _ => LrrCategory::Other,
    }
}

/// The event field of an LRR line, either the v2 coded form or a v1
/// firmware keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LrrEvent {
    Coded {
        source: LrrSource,
        qualifier: LrrQualifier,
        code: u16,
    },
    Keyword(String),
}

/// Arming action an open/close LRR event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmAction {
    Away,
    Stay,
    Disarm,
}

/// A decoded long-range-radio report.
///
/// Wire form v1: `!LRR:<data>,<partition>,<KEYWORD>`
/// Wire form v2: `!LRR:<data>,<partition>,<SRC>_<Q><CCC>[,<report>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrrMessage {
    /// Zone or user number, exactly as reported.
    pub data: String,
    pub partition: u32,
    pub event: LrrEvent,
    /// Raw report code from the optional fourth field.
    pub report_code: Option<String>,
}

impl LrrMessage {
    pub const MARKER: &'static str = "!LRR:";

    pub fn parse(raw: &str) -> Result<Self> {
        let body = raw
            .strip_prefix(Self::MARKER)
            .ok_or_else(|| Ad2Error::malformed(raw, "missing LRR marker"))?;
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(Ad2Error::malformed(
                raw,
                format!("expected 3 or 4 LRR fields, got {}", parts.len()),
            ));
        }

        let partition: u32 = parts[1]
            .trim()
            .parse()
            .map_err(|_| Ad2Error::malformed(raw, "partition is not numeric"))?;
        let event = parse_event(raw, parts[2])?;

        Ok(LrrMessage {
            data: parts[0].to_string(),
            partition,
            event,
            report_code: parts.get(3).map(|s| s.to_string()),
        })
    }

    pub fn category(&self) -> LrrCategory {
        match &self.event {
            LrrEvent::Coded { code, .. } => cid_category(*code),
            LrrEvent::Keyword(k) => keyword_category(k),
        }
    }

    /// Whether this event restores a previously reported condition.
    /// Open/close classes use [`Self::arm_action`] instead; their
    /// qualifier encodes direction, not restoral.
    pub fn is_restore(&self) -> bool {
        match &self.event {
            LrrEvent::Coded { qualifier, .. } => *qualifier == LrrQualifier::Restore,
            LrrEvent::Keyword(k) => k.ends_with("_RESTORE"),
        }
    }

    /// For open/close categories, the arming action reported.
    pub fn arm_action(&self) -> Option<ArmAction> {
        let category = self.category();
        match &self.event {
            LrrEvent::Keyword(k) => match k.as_str() {
                "ARM_AWAY" => Some(ArmAction::Away),
                "ARM_STAY" => Some(ArmAction::Stay),
                "OPEN" | "CANCEL" => Some(ArmAction::Disarm),
                _ => None,
            },
            LrrEvent::Coded { qualifier, .. } => match (category, qualifier) {
                // ContactID: qualifier 1 is an opening (disarm), 3 a closing.
                (LrrCategory::OpenClose, LrrQualifier::Event) => Some(ArmAction::Disarm),
                (LrrCategory::OpenClose, LrrQualifier::Restore) => Some(ArmAction::Away),
                (LrrCategory::OpenCloseStay, LrrQualifier::Event) => Some(ArmAction::Disarm),
                (LrrCategory::OpenCloseStay, LrrQualifier::Restore) => Some(ArmAction::Stay),
                _ => None,
            },
        }
    }
}

fn parse_event(raw: &str, field: &str) -> Result<LrrEvent> {
    if let Some((prefix, tail)) = field.rsplit_once('_') {
        if tail.len() == 4 && tail.chars().all(|c| c.is_ascii_digit()) {
            let qualifier = match &tail[..1] {
                "1" => LrrQualifier::Event,
                "3" => LrrQualifier::Restore,
                "6" => LrrQualifier::Previous,
                q => {
                    return Err(Ad2Error::malformed(
                        raw,
                        format!("invalid event qualifier '{q}'"),
                    ))
                }
            };
            let code: u16 = tail[1..]
                .parse()
                .map_err(|_| Ad2Error::malformed(raw, "invalid event code"))?;
            return Ok(LrrEvent::Coded {
                source: LrrSource::from_prefix(prefix),
                qualifier,
                code,
            });
        }
    }
    if field.is_empty() {
        return Err(Ad2Error::malformed(raw, "empty event field"));
    }
    Ok(LrrEvent::Keyword(field.to_string()))
}
