// MIT License - Copyright (c) 2023 ad2driver contributors

//! Message classification and decoding.
//!
//! Every line the device emits starts with a marker (`!LRR:`, `!EXP:`,
//! `!CONFIG>`, ...) except keypad status lines, which start with the
//! bracketed bitfield directly. [`decode`] inspects the marker and hands
//! the line to the matching parser. Lines with no recognized marker come
//! back as [`Message::Unknown`] rather than an error.

pub mod lrr;
pub mod status;

pub use lrr::{ArmAction, LrrCategory, LrrEvent, LrrMessage, LrrQualifier, LrrSource};
pub use status::{PanelMode, PanelStatus, StatusFlags};

use serde::Serialize;

use crate::error::{Ad2Error, Result};
use crate::reader::RawLine;

/// Slot a message occupies in the per-category "last message" table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Panel,
    Lrr,
    Aui,
    Relay,
    Rf,
    Config,
    Version,
    System,
    Unknown,
}

/// Relay report origin. Zone expanders and relay boards share one wire
/// layout and differ only in marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    ZoneExpander,
    Relay,
}

/// A relay or expander channel report.
///
/// Wire form: `!EXP:<address>,<channel>,<value>` or `!REL:<address>,<channel>,<value>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub kind: RelayKind,
    pub address: u32,
    pub channel: u32,
    pub active: bool,
}

impl RelayMessage {
    fn parse(raw: &str, kind: RelayKind, body: &str) -> Result<Self> {
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() != 3 {
            return Err(Ad2Error::malformed(
                raw,
                format!("expected 3 relay fields, got {}", parts.len()),
            ));
        }
        let field = |i: usize, name: &str| -> Result<u32> {
            parts[i]
                .trim()
                .parse()
                .map_err(|_| Ad2Error::malformed(raw, format!("{name} is not numeric")))
        };
        Ok(RelayMessage {
            kind,
            address: field(0, "address")?,
            channel: field(1, "channel")?,
            active: field(2, "value")? != 0,
        })
    }
}

/// An auxiliary keypad display line.
///
/// Wire form: `!AUI:<id>,<type>,<line>[,<text>[,<text2>]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuiMessage {
    pub id: u32,
    pub kind: u32,
    pub line: u32,
    pub text: Option<String>,
    pub text2: Option<String>,
}

impl AuiMessage {
    pub const MARKER: &'static str = "!AUI:";

    fn parse(raw: &str, body: &str) -> Result<Self> {
        let mut parts = body.splitn(5, ',');
        let mut header = |name: &str| -> Result<u32> {
            parts
                .next()
                .ok_or_else(|| Ad2Error::malformed(raw, format!("missing {name} field")))?
                .trim()
                .parse()
                .map_err(|_| Ad2Error::malformed(raw, format!("{name} is not numeric")))
        };
        let id = header("id")?;
        let kind = header("type")?;
        let line = header("line")?;
        Ok(AuiMessage {
            id,
            kind,
            line,
            text: parts.next().map(|s| s.to_string()),
            text2: parts.next().map(|s| s.to_string()),
        })
    }
}

/// A wireless sensor supervision report.
///
/// Wire form: `!RFX:<serial>,<loop bits>,<battery>,<supervision>,<value>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfMessage {
    /// Sensor serial, kept verbatim (leading zeros are significant).
    pub serial: String,
    /// One entry per sensor loop, faulted when `true`.
    pub loops: Vec<bool>,
    pub battery_low: bool,
    pub supervision: bool,
    /// Raw status byte, two hex digits on the wire.
    pub value: u8,
}

impl RfMessage {
    pub const MARKER: &'static str = "!RFX:";

    fn parse(raw: &str, body: &str) -> Result<Self> {
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() != 5 {
            return Err(Ad2Error::malformed(
                raw,
                format!("expected 5 RF fields, got {}", parts.len()),
            ));
        }
        let serial = parts[0].trim();
        if serial.is_empty() || !serial.chars().all(|c| c.is_ascii_digit()) {
            return Err(Ad2Error::malformed(raw, "serial is not numeric"));
        }
        let mut loops = Vec::with_capacity(parts[1].len());
        for c in parts[1].trim().chars() {
            match c {
                '0' => loops.push(false),
                '1' => loops.push(true),
                _ => return Err(Ad2Error::malformed(raw, "loop bits must be 0 or 1")),
            }
        }
        let truthy = |i: usize, name: &str| -> Result<bool> {
            let n: u32 = parts[i]
                .trim()
                .parse()
                .map_err(|_| Ad2Error::malformed(raw, format!("{name} is not numeric")))?;
            Ok(n != 0)
        };
        let value = u8::from_str_radix(parts[4].trim(), 16)
            .map_err(|_| Ad2Error::malformed(raw, "value is not hex"))?;
        Ok(RfMessage {
            serial: serial.to_string(),
            loops,
            battery_low: truthy(2, "battery")?,
            supervision: truthy(3, "supervision")?,
            value,
        })
    }
}

/// Decoded device configuration, from a `!CONFIG>` report.
///
/// Fields stay `None`/default when the firmware omits the key; keys this
/// build does not model are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    /// Keypad address the device emulates.
    pub address: Option<u32>,
    /// CONFIGBITS register, hex on the wire.
    pub config_bits: Option<u32>,
    /// Keypad address mask, hex on the wire.
    pub address_mask: Option<u32>,
    /// Zone expander emulation, one slot per virtual expander.
    pub emulate_zone: [bool; 5],
    /// Relay board emulation, one slot per virtual board.
    pub emulate_relay: [bool; 4],
    pub emulate_lrr: bool,
    pub deduplicate: bool,
    pub mode: Option<PanelMode>,
    pub emulate_com: bool,
    pub extra: Vec<(String, String)>,
}

impl DeviceConfig {
    pub const MARKER: &'static str = "!CONFIG>";

    fn parse(raw: &str, body: &str) -> Result<Self> {
        let mut config = DeviceConfig::default();
        for setting in body.split('&') {
            if setting.is_empty() {
                continue;
            }
            let (key, value) = setting
                .split_once('=')
                .ok_or_else(|| Ad2Error::malformed(raw, "setting without '='"))?;
            match key.to_ascii_uppercase().as_str() {
                "ADDRESS" => {
                    config.address = Some(value.parse().map_err(|_| {
                        Ad2Error::malformed(raw, "ADDRESS is not numeric")
                    })?);
                }
                "CONFIGBITS" => {
                    config.config_bits = Some(u32::from_str_radix(value, 16).map_err(|_| {
                        Ad2Error::malformed(raw, "CONFIGBITS is not hex")
                    })?);
                }
                "MASK" => {
                    config.address_mask = Some(u32::from_str_radix(value, 16).map_err(|_| {
                        Ad2Error::malformed(raw, "MASK is not hex")
                    })?);
                }
                "EXP" => {
                    let mut slots = [false; 5];
                    parse_yn_list(raw, value, &mut slots)?;
                    config.emulate_zone = slots;
                }
                "REL" => {
                    let mut slots = [false; 4];
                    parse_yn_list(raw, value, &mut slots)?;
                    config.emulate_relay = slots;
                }
                "LRR" => config.emulate_lrr = parse_yn(raw, value)?,
                "DEDUPLICATE" => config.deduplicate = parse_yn(raw, value)?,
                "COM" => config.emulate_com = parse_yn(raw, value)?,
                "MODE" => {
                    let c = value.chars().next().unwrap_or(' ');
                    config.mode = Some(PanelMode::from_char(c).ok_or_else(|| {
                        Ad2Error::malformed(raw, format!("unknown MODE '{value}'"))
                    })?);
                }
                _ => config.extra.push((key.to_string(), value.to_string())),
            }
        }
        Ok(config)
    }
}

fn parse_yn(raw: &str, value: &str) -> Result<bool> {
    match value {
        "Y" | "y" => Ok(true),
        "N" | "n" => Ok(false),
        _ => Err(Ad2Error::malformed(raw, format!("expected Y or N, got '{value}'"))),
    }
}

fn parse_yn_list(raw: &str, value: &str, out: &mut [bool]) -> Result<()> {
    if value.len() != out.len() {
        return Err(Ad2Error::malformed(
            raw,
            format!("expected {} Y/N slots, got '{value}'", out.len()),
        ));
    }
    for (slot, c) in out.iter_mut().zip(value.chars()) {
        *slot = match c {
            'Y' | 'y' => true,
            'N' | 'n' => false,
            _ => return Err(Ad2Error::malformed(raw, "slots must be Y or N")),
        };
    }
    Ok(())
}

/// Firmware identification, the reply to a version request.
///
/// Wire form: `!VER:<serial>,<firmware>[,<cap>;<cap>;...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub serial: String,
    pub firmware: String,
    pub capabilities: Vec<String>,
}

impl VersionInfo {
    pub const MARKER: &'static str = "!VER:";

    fn parse(raw: &str, body: &str) -> Result<Self> {
        let mut parts = body.splitn(3, ',');
        let serial = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Ad2Error::malformed(raw, "missing serial"))?;
        let firmware = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Ad2Error::malformed(raw, "missing firmware version"))?;
        let capabilities = parts
            .next()
            .map(|caps| {
                caps.split(';')
                    .filter(|c| !c.is_empty())
                    .map(|c| c.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(VersionInfo {
            serial: serial.to_string(),
            firmware: firmware.to_string(),
            capabilities,
        })
    }
}

/// Every message the device can emit, one variant per dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Panel(PanelStatus),
    Lrr(LrrMessage),
    Aui(AuiMessage),
    Relay(RelayMessage),
    Rf(RfMessage),
    Config(DeviceConfig),
    Version(VersionInfo),
    /// `!Ready` after a device reset.
    Boot,
    /// `!Sending...done` with fewer than five retry dots.
    SendConfirmed,
    /// `!Sending.....done`, the panel never acknowledged the command.
    RejectedCommand,
    Unknown {
        raw: String,
    },
}

impl Message {
    pub fn category(&self) -> MessageCategory {
        match self {
            Message::Panel(_) => MessageCategory::Panel,
            Message::Lrr(_) => MessageCategory::Lrr,
            Message::Aui(_) => MessageCategory::Aui,
            Message::Relay(_) => MessageCategory::Relay,
            Message::Rf(_) => MessageCategory::Rf,
            Message::Config(_) => MessageCategory::Config,
            Message::Version(_) => MessageCategory::Version,
            Message::Boot | Message::SendConfirmed | Message::RejectedCommand => {
                MessageCategory::System
            }
            Message::Unknown { .. } => MessageCategory::Unknown,
        }
    }
}

/// Retry dots at or beyond this count mean the panel never acknowledged.
const REJECTED_DOT_COUNT: usize = 5;

/// Classify and decode one protocol line.
///
/// Unrecognized markers are not an error; they decode to
/// [`Message::Unknown`] so callers can log and move on. A recognized
/// marker with a bad layout fails with [`Ad2Error::MalformedMessage`].
pub fn decode(line: &RawLine) -> Result<Message> {
    let raw = line.as_str();

    if PanelStatus::matches(raw) {
        return PanelStatus::parse(raw).map(Message::Panel);
    }
    if raw.starts_with(LrrMessage::MARKER) {
        return LrrMessage::parse(raw).map(Message::Lrr);
    }
    if let Some(body) = raw.strip_prefix("!EXP:") {
        return RelayMessage::parse(raw, RelayKind::ZoneExpander, body).map(Message::Relay);
    }
    if let Some(body) = raw.strip_prefix("!REL:") {
        return RelayMessage::parse(raw, RelayKind::Relay, body).map(Message::Relay);
    }
    if let Some(body) = raw.strip_prefix(AuiMessage::MARKER) {
        return AuiMessage::parse(raw, body).map(Message::Aui);
    }
    if let Some(body) = raw.strip_prefix(RfMessage::MARKER) {
        return RfMessage::parse(raw, body).map(Message::Rf);
    }
    if let Some(body) = raw.strip_prefix(DeviceConfig::MARKER) {
        return DeviceConfig::parse(raw, body).map(Message::Config);
    }
    if let Some(body) = raw.strip_prefix(VersionInfo::MARKER) {
        return VersionInfo::parse(raw, body).map(Message::Version);
    }
    if raw == "!Ready" {
        return Ok(Message::Boot);
    }
    if let Some(middle) = raw
        .strip_prefix("!Sending")
        .and_then(|rest| rest.strip_suffix("done"))
    {
        if middle.chars().all(|c| c == '.') {
            return Ok(if middle.len() >= REJECTED_DOT_COUNT {
                Message::RejectedCommand
            } else {
                Message::SendConfirmed
            });
        }
    }
    // !CID: summaries duplicate the LRR detail that follows them, and
    // keypads we do not model emit their own markers. Carry them through.
    Ok(Message::Unknown {
        raw: raw.to_string(),
    })
}
