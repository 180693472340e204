// MIT License - Copyright (c) 2023 ad2driver contributors

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{Ad2Error, Result};

bitflags! {
    /// Panel status flags parsed from the 20-character bitfield.
    ///
    /// Positions 0..=4 and 6..=15 are `0`/`1` flags. Position 5 is the
    /// beep count, 16 the system-specific hex digit, 17 the panel type
    /// letter, 18..=19 unused. Positions come from the device protocol
    /// reference and must not be re-derived.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        /// Position 0 - ready to arm
        const READY           = 0x0001;
        /// Position 1 - armed away
        const ARMED_AWAY      = 0x0002;
        /// Position 2 - armed home/stay
        const ARMED_HOME      = 0x0004;
        /// Position 3 - keypad backlight on
        const BACKLIGHT       = 0x0008;
        /// Position 4 - programming mode
        const PROGRAMMING     = 0x0010;
        /// Position 6 - a zone is bypassed
        const BYPASS          = 0x0020;
        /// Position 7 - AC power present
        const AC_POWER        = 0x0040;
        /// Position 8 - chime enabled
        const CHIME           = 0x0080;
        /// Position 9 - an alarm occurred and is latched in memory
        const ALARM_OCCURRED  = 0x0100;
        /// Position 10 - alarm currently sounding
        const ALARM_SOUNDING  = 0x0200;
        /// Position 11 - system battery low
        const BATTERY_LOW     = 0x0400;
        /// Position 12 - entry delay disabled (instant mode)
        const ENTRY_DELAY_OFF = 0x0800;
        /// Position 13 - fire alarm
        const FIRE_ALARM      = 0x1000;
        /// Position 14 - check zone (trouble condition)
        const CHECK_ZONE      = 0x2000;
        /// Position 15 - perimeter only
        const PERIMETER_ONLY  = 0x4000;
    }
}

/// Bitfield positions in order, matching the wire layout.
const STATUS_FLAG_BITS: [(usize, StatusFlags); 15] = [
    (0, StatusFlags::READY),
    (1, StatusFlags::ARMED_AWAY),
    (2, StatusFlags::ARMED_HOME),
    (3, StatusFlags::BACKLIGHT),
    (4, StatusFlags::PROGRAMMING),
    (6, StatusFlags::BYPASS),
    (7, StatusFlags::AC_POWER),
    (8, StatusFlags::CHIME),
    (9, StatusFlags::ALARM_OCCURRED),
    (10, StatusFlags::ALARM_SOUNDING),
    (11, StatusFlags::BATTERY_LOW),
    (12, StatusFlags::ENTRY_DELAY_OFF),
    (13, StatusFlags::FIRE_ALARM),
    (14, StatusFlags::CHECK_ZONE),
    (15, StatusFlags::PERIMETER_ONLY),
];

const BITFIELD_LEN: usize = 20;
const BEEPS_POS: usize = 5;
const SYSTEM_POS: usize = 16;
const MODE_POS: usize = 17;

/// Panel family reported in the bitfield and in the device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PanelMode {
    Ademco,
    Dsc,
}

impl PanelMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Self::Ademco),
            'D' => Some(Self::Dsc),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Ademco => 'A',
            Self::Dsc => 'D',
        }
    }
}

/// A decoded keypad status line.
///
/// Wire form: `[<bitfield>],<numeric>,[<panel data>],"<alpha>"`, optionally
/// prefixed with `!KPM:` on newer firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelStatus {
    pub flags: StatusFlags,
    /// Beep count requested by the panel (0..=7).
    pub beeps: u8,
    /// The raw 3-character numeric section.
    pub numeric: String,
    /// The numeric section as a zone number, when it parses as one
    /// (decimal first, hex fallback for high zones).
    pub zone: Option<u32>,
    /// Keypad address mask from the panel data section.
    pub mask: u32,
    /// Alpha display text, unquoted, padding preserved.
    pub text: String,
    /// Keypad cursor position, present in programming mode.
    pub cursor: Option<u8>,
    /// System-specific hex digit, `-` on older firmware.
    pub system_bits: Option<u8>,
    /// Panel family letter, `-` on older firmware.
    pub panel_mode: Option<PanelMode>,
}

impl PanelStatus {
    /// Whether the given line looks like a keypad status line.
    pub fn matches(line: &str) -> bool {
        line.starts_with('[') || line.starts_with("!KPM:[")
    }

    /// Decode a keypad status line. Layout violations fail with
    /// [`Ad2Error::MalformedMessage`].
    pub fn parse(raw: &str) -> Result<Self> {
        let line = raw.strip_prefix("!KPM:").unwrap_or(raw);

        let rest = line
            .strip_prefix('[')
            .ok_or_else(|| Ad2Error::malformed(raw, "missing bitfield section"))?;
        let (bitfield, rest) = rest
            .split_once(']')
            .ok_or_else(|| Ad2Error::malformed(raw, "unterminated bitfield section"))?;
        let rest = rest
            .strip_prefix(',')
            .ok_or_else(|| Ad2Error::malformed(raw, "missing numeric section"))?;
        let (numeric, rest) = rest
            .split_once(',')
            .ok_or_else(|| Ad2Error::malformed(raw, "missing panel data section"))?;
        let rest = rest
            .strip_prefix('[')
            .ok_or_else(|| Ad2Error::malformed(raw, "missing panel data section"))?;
        let (panel_data, rest) = rest
            .split_once(']')
            .ok_or_else(|| Ad2Error::malformed(raw, "unterminated panel data section"))?;
        let rest = rest
            .strip_prefix(',')
            .ok_or_else(|| Ad2Error::malformed(raw, "missing alpha section"))?;
        let text = rest
            .strip_prefix('"')
            .and_then(|t| t.rsplit_once('"').map(|(content, _)| content))
            .ok_or_else(|| Ad2Error::malformed(raw, "alpha section not quoted"))?;

        if bitfield.len() != BITFIELD_LEN {
            return Err(Ad2Error::malformed(
                raw,
                format!("bitfield is {} chars, expected {}", bitfield.len(), BITFIELD_LEN),
            ));
        }
        if numeric.len() != 3 {
            return Err(Ad2Error::malformed(
                raw,
                format!("numeric section is {} chars, expected 3", numeric.len()),
            ));
        }

        let bits: Vec<char> = bitfield.chars().collect();
        let mut flags = StatusFlags::empty();
        for (pos, flag) in &STATUS_FLAG_BITS {
            match bits[*pos] {
                '1' => flags |= *flag,
                '0' => {}
                other => {
                    return Err(Ad2Error::malformed(
                        raw,
                        format!("bitfield position {pos} is '{other}', expected 0 or 1"),
                    ))
                }
            }
        }
        let beeps = bits[BEEPS_POS]
            .to_digit(10)
            .map(|d| d as u8)
            .ok_or_else(|| Ad2Error::malformed(raw, "beep count is not a digit"))?;
        let system_bits = match bits[SYSTEM_POS] {
            '-' => None,
            c => Some(c.to_digit(16).map(|d| d as u8).ok_or_else(|| {
                Ad2Error::malformed(raw, "system-specific position is not a hex digit")
            })?),
        };
        let panel_mode = PanelMode::from_char(bits[MODE_POS]);

        if panel_data.len() < 11 {
            return Err(Ad2Error::malformed(raw, "panel data section too short"));
        }
        let mask = u32::from_str_radix(&panel_data[3..11], 16)
            .map_err(|_| Ad2Error::malformed(raw, "address mask is not hex"))?;

        let cursor = if flags.contains(StatusFlags::PROGRAMMING) && panel_data.len() >= 23 {
            u8::from_str_radix(&panel_data[21..23], 16).ok()
        } else {
            None
        };

        Ok(PanelStatus {
            flags,
            beeps,
            numeric: numeric.to_string(),
            zone: parse_numeric(numeric),
            mask,
            text: text.to_string(),
            cursor,
            system_bits,
            panel_mode,
        })
    }

    pub fn ready(&self) -> bool {
        self.flags.contains(StatusFlags::READY)
    }

    pub fn armed_away(&self) -> bool {
        self.flags.contains(StatusFlags::ARMED_AWAY)
    }

    pub fn armed_home(&self) -> bool {
        self.flags.contains(StatusFlags::ARMED_HOME)
    }

    pub fn alarm_active(&self) -> bool {
        self.flags
            .intersects(StatusFlags::ALARM_SOUNDING | StatusFlags::ALARM_OCCURRED | StatusFlags::FIRE_ALARM)
    }

    pub fn fire(&self) -> bool {
        self.flags.contains(StatusFlags::FIRE_ALARM)
    }

    /// Whether the alpha text reports a zone fault or check condition.
    pub fn reports_fault(&self) -> bool {
        let upper = self.text.to_ascii_uppercase();
        upper.contains("FAULT") || (self.flags.contains(StatusFlags::CHECK_ZONE) && upper.contains("CHECK"))
    }

    /// Whether the alpha text reports a zone bypass.
    pub fn reports_bypass(&self) -> bool {
        self.flags.contains(StatusFlags::BYPASS) && self.text.to_ascii_uppercase().contains("BYPAS")
    }
}

/// Parse the numeric section as a zone number. Panels emit decimal for
/// zones up to 99 and hex beyond; other codes (DSC icons) do not parse.
fn parse_numeric(numeric: &str) -> Option<u32> {
    let trimmed = numeric.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<u32>()
        .ok()
        .or_else(|| u32::from_str_radix(trimmed, 16).ok())
}
