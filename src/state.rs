// MIT License - Copyright (c) 2023 ad2driver contributors

//! Rolling device state and message reconciliation.
//!
//! [`DeviceState`] is the single authoritative snapshot for one connected
//! device. [`DeviceState::apply`] folds each decoded message in, strictly
//! in arrival order, and reports what changed as a [`StateDelta`]. All
//! transition detection is edge-based: a flag that is already `true` stays
//! silent no matter how many lines repeat it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{
    ArmAction, DeviceConfig, LrrCategory, LrrMessage, Message, MessageCategory, PanelStatus,
    RelayMessage, StatusFlags, VersionInfo,
};

/// How a partition is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmedMode {
    Disarmed,
    Away,
    Stay,
}

/// Why a partition alarm is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCause {
    Burglary,
    Fire,
    Panic,
    Duress,
    Silent,
    Medical,
    Other,
}

/// One monitored sensor input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneState {
    pub id: u32,
    pub faulted: bool,
    pub bypassed: bool,
    /// When the fault or bypass flag last changed.
    pub last_changed: Option<DateTime<Utc>>,
}

impl ZoneState {
    fn new(id: u32) -> Self {
        ZoneState {
            id,
            faulted: false,
            bypassed: false,
            last_changed: None,
        }
    }
}

/// One logical grouping of zones with its own arm state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    pub id: u32,
    pub mode: ArmedMode,
    pub alarm: Option<AlarmCause>,
    pub chime: bool,
    pub ready: bool,
}

impl PartitionState {
    fn new(id: u32) -> Self {
        PartitionState {
            id,
            mode: ArmedMode::Disarmed,
            alarm: None,
            chime: false,
            ready: false,
        }
    }
}

/// Field changes produced by applying one message. Transient; consumed
/// by event emission and dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub booted: bool,
    pub faulted_zones: Vec<u32>,
    pub restored_zones: Vec<u32>,
    /// (zone id, now bypassed)
    pub bypass_changes: Vec<(u32, bool)>,
    /// (partition id, old mode, new mode)
    pub arm_changes: Vec<(u32, ArmedMode, ArmedMode)>,
    pub alarms_triggered: Vec<(u32, AlarmCause)>,
    /// (partition id, the cause that was active)
    pub alarms_cleared: Vec<(u32, AlarmCause)>,
    pub chime_changes: Vec<(u32, bool)>,
    pub ready_changes: Vec<(u32, bool)>,
    pub ac_power: Option<bool>,
    pub battery_low: Option<bool>,
    /// (address, channel, now active)
    pub relay_changes: Vec<(u32, u32, bool)>,
    pub config_received: bool,
    pub command_rejected: bool,
    /// Which last-message slot changed, when one did.
    pub message_slot: Option<MessageCategory>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        *self == StateDelta::default()
    }
}

/// The authoritative state snapshot for one connected device.
///
/// AC power defaults to present and battery-low to clear, so the first
/// status line from a healthy panel reports no power transitions.
#[derive(Debug, Clone)]
pub struct DeviceState {
    default_partition: u32,
    pub zones: BTreeMap<u32, ZoneState>,
    pub partitions: BTreeMap<u32, PartitionState>,
    pub ac_power: bool,
    pub battery_low: bool,
    pub device_ready: bool,
    pub last_boot: Option<DateTime<Utc>>,
    pub device_config: Option<DeviceConfig>,
    pub version: Option<VersionInfo>,
    /// Relay and expander channel positions, keyed (address, channel).
    pub relays: BTreeMap<(u32, u32), bool>,
    last_by_category: BTreeMap<MessageCategory, Message>,
    /// Most recent unrecognized line, kept for diagnostics only.
    pub last_unknown: Option<String>,
}

impl DeviceState {
    /// Keypad status lines carry no partition number; they are attributed
    /// to `default_partition`.
    pub fn new(default_partition: u32) -> Self {
        DeviceState {
            default_partition,
            zones: BTreeMap::new(),
            partitions: BTreeMap::new(),
            ac_power: true,
            battery_low: false,
            device_ready: false,
            last_boot: None,
            device_config: None,
            version: None,
            relays: BTreeMap::new(),
            last_by_category: BTreeMap::new(),
            last_unknown: None,
        }
    }

    pub fn default_partition(&self) -> u32 {
        self.default_partition
    }

    /// The most recent message stored for a category, if any has arrived.
    pub fn last_message(&self, category: MessageCategory) -> Option<&Message> {
        self.last_by_category.get(&category)
    }

    /// Fold one decoded message into the state and report what changed.
    ///
    /// Must be called in exact arrival order; reordering changes the
    /// edge-detection result.
    pub fn apply(&mut self, msg: &Message, at: DateTime<Utc>) -> StateDelta {
        let mut delta = StateDelta::default();

        match msg {
            Message::Panel(status) => self.apply_panel(status, at, &mut delta),
            Message::Lrr(lrr) => self.apply_lrr(lrr, at, &mut delta),
            Message::Relay(relay) => self.apply_relay(relay, &mut delta),
            Message::Config(config) => {
                if self.device_config.as_ref() != Some(config) {
                    self.device_config = Some(config.clone());
                    delta.config_received = true;
                }
            }
            Message::Version(version) => {
                self.version = Some(version.clone());
            }
            Message::Boot => {
                self.device_ready = true;
                self.last_boot = Some(at);
                // A reboot is always reportable, even when the previous
                // message was also a boot marker.
                delta.booted = true;
            }
            Message::RejectedCommand => {
                delta.command_rejected = true;
            }
            Message::SendConfirmed => {}
            Message::Aui(_) | Message::Rf(_) => {}
            Message::Unknown { raw } => {
                self.last_unknown = Some(raw.clone());
                // Not slot-tracked: unknown lines never produce events.
                return delta;
            }
        }

        let category = msg.category();
        if self.last_by_category.get(&category) != Some(msg) {
            self.last_by_category.insert(category, msg.clone());
            delta.message_slot = Some(category);
        }
        delta
    }

    fn partition_entry(&mut self, id: u32) -> &mut PartitionState {
        self.partitions
            .entry(id)
            .or_insert_with(|| PartitionState::new(id))
    }

    fn zone_entry(&mut self, id: u32) -> &mut ZoneState {
        self.zones.entry(id).or_insert_with(|| ZoneState::new(id))
    }

    fn apply_panel(&mut self, status: &PanelStatus, at: DateTime<Utc>, delta: &mut StateDelta) {
        let ac = status.flags.contains(StatusFlags::AC_POWER);
        if ac != self.ac_power {
            self.ac_power = ac;
            delta.ac_power = Some(ac);
        }
        let battery = status.flags.contains(StatusFlags::BATTERY_LOW);
        if battery != self.battery_low {
            self.battery_low = battery;
            delta.battery_low = Some(battery);
        }

        let pid = self.default_partition;
        let partition = self
            .partitions
            .entry(pid)
            .or_insert_with(|| PartitionState::new(pid));

        let mode = if status.armed_away() {
            ArmedMode::Away
        } else if status.armed_home() {
            ArmedMode::Stay
        } else {
            ArmedMode::Disarmed
        };
        if mode != partition.mode {
            delta.arm_changes.push((pid, partition.mode, mode));
            partition.mode = mode;
        }

        let alarm = if status.alarm_active() {
            Some(if status.fire() {
                AlarmCause::Fire
            } else {
                AlarmCause::Burglary
            })
        } else {
            None
        };
        if alarm != partition.alarm {
            match alarm {
                Some(cause) => delta.alarms_triggered.push((pid, cause)),
                None => {
                    if let Some(old) = partition.alarm {
                        delta.alarms_cleared.push((pid, old));
                    }
                }
            }
            partition.alarm = alarm;
        }

        let ready = status.ready();
        if ready != partition.ready {
            partition.ready = ready;
            delta.ready_changes.push((pid, ready));
        }
        let chime = status.flags.contains(StatusFlags::CHIME);
        if chime != partition.chime {
            partition.chime = chime;
            delta.chime_changes.push((pid, chime));
        }

        if status.reports_bypass() {
            if let Some(zone_id) = status.zone {
                let zone = self.zone_entry(zone_id);
                if !zone.bypassed {
                    zone.bypassed = true;
                    zone.last_changed = Some(at);
                    delta.bypass_changes.push((zone_id, true));
                }
            }
        } else if !status.flags.contains(StatusFlags::BYPASS) {
            // The panel dropped the bypass flag entirely; no zone is
            // bypassed anymore.
            for (id, zone) in self.zones.iter_mut() {
                if zone.bypassed {
                    zone.bypassed = false;
                    zone.last_changed = Some(at);
                    delta.bypass_changes.push((*id, false));
                }
            }
        }

        if !status.ready() && status.reports_fault() {
            if let Some(zone_id) = status.zone {
                let zone = self.zone_entry(zone_id);
                if !zone.faulted {
                    zone.faulted = true;
                    zone.last_changed = Some(at);
                    delta.faulted_zones.push(zone_id);
                }
            }
        }

        if status.ready() {
            for (id, zone) in self.zones.iter_mut() {
                if zone.faulted && !zone.bypassed {
                    zone.faulted = false;
                    zone.last_changed = Some(at);
                    delta.restored_zones.push(*id);
                }
            }
        }
    }

    fn apply_lrr(&mut self, lrr: &LrrMessage, at: DateTime<Utc>, delta: &mut StateDelta) {
        let pid = lrr.partition;
        match lrr.category() {
            category @ (LrrCategory::Fire
            | LrrCategory::Panic
            | LrrCategory::Duress
            | LrrCategory::Silent
            | LrrCategory::Medical
            | LrrCategory::Burglary
            | LrrCategory::GeneralAlarm
            | LrrCategory::NonBurglary) => {
                let cause = match category {
                    LrrCategory::Fire => AlarmCause::Fire,
                    LrrCategory::Panic => AlarmCause::Panic,
                    LrrCategory::Duress => AlarmCause::Duress,
                    LrrCategory::Silent => AlarmCause::Silent,
                    LrrCategory::Medical => AlarmCause::Medical,
                    LrrCategory::Burglary | LrrCategory::GeneralAlarm => AlarmCause::Burglary,
                    _ => AlarmCause::Other,
                };
                let partition = self.partition_entry(pid);
                if lrr.is_restore() {
                    if let Some(old) = partition.alarm.take() {
                        delta.alarms_cleared.push((pid, old));
                    }
                } else if partition.alarm != Some(cause) {
                    partition.alarm = Some(cause);
                    delta.alarms_triggered.push((pid, cause));
                }
            }
            LrrCategory::OpenClose | LrrCategory::OpenCloseStay => {
                if let Some(action) = lrr.arm_action() {
                    let mode = match action {
                        ArmAction::Away => ArmedMode::Away,
                        ArmAction::Stay => ArmedMode::Stay,
                        ArmAction::Disarm => ArmedMode::Disarmed,
                    };
                    let partition = self.partition_entry(pid);
                    if partition.mode != mode {
                        delta.arm_changes.push((pid, partition.mode, mode));
                        partition.mode = mode;
                    }
                }
            }
            LrrCategory::AcLoss => {
                let present = lrr.is_restore();
                if present != self.ac_power {
                    self.ac_power = present;
                    delta.ac_power = Some(present);
                }
            }
            LrrCategory::BatteryLow => {
                let low = !lrr.is_restore();
                if low != self.battery_low {
                    self.battery_low = low;
                    delta.battery_low = Some(low);
                }
            }
            LrrCategory::Bypass => {
                // The data field carries the zone for bypass reports.
                if let Ok(zone_id) = lrr.data.trim().parse::<u32>() {
                    let bypassed = !lrr.is_restore();
                    let zone = self.zone_entry(zone_id);
                    if zone.bypassed != bypassed {
                        zone.bypassed = bypassed;
                        zone.last_changed = Some(at);
                        delta.bypass_changes.push((zone_id, bypassed));
                    }
                }
            }
            LrrCategory::SystemTrouble
            | LrrCategory::ZoneTrouble
            | LrrCategory::Test
            | LrrCategory::Other => {}
        }
    }

    fn apply_relay(&mut self, relay: &RelayMessage, delta: &mut StateDelta) {
        let key = (relay.address, relay.channel);
        let previous = self.relays.insert(key, relay.active);
        if previous != Some(relay.active) {
            delta
                .relay_changes
                .push((relay.address, relay.channel, relay.active));
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;
    use crate::reader::RawLine;

    const PDATA: &str = "[f70000000008001c08020000000000]";

    fn msg(line: &str) -> Message {
        decode(&RawLine::from(line)).unwrap()
    }

    fn panel(bitfield: &str, numeric: &str, text: &str) -> Message {
        msg(&format!("[{bitfield}],{numeric},{PDATA},\"{text}\""))
    }

    fn at() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_first_fault_and_arm_edges() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(
            &panel("0100000100000000----", "003", "ARMED ***AWAY***FAULT 03"),
            at(),
        );
        assert_eq!(delta.faulted_zones, vec![3]);
        assert_eq!(
            delta.arm_changes,
            vec![(1, ArmedMode::Disarmed, ArmedMode::Away)]
        );
        assert_eq!(delta.ac_power, None, "AC present is the default");
        assert_eq!(delta.battery_low, None);
        assert!(delta.ready_changes.is_empty());
        assert_eq!(delta.message_slot, Some(MessageCategory::Panel));
        assert!(state.zones[&3].faulted);
        assert!(state.zones[&3].last_changed.is_some());
    }

    #[test]
    fn test_repeated_status_line_is_empty() {
        let mut state = DeviceState::new(1);
        let line = panel("0100000100000000----", "003", "ARMED ***AWAY***FAULT 03");
        state.apply(&line, at());
        let second = state.apply(&line, at());
        assert!(second.is_empty());
    }

    #[test]
    fn test_restore_on_ready() {
        let mut state = DeviceState::new(1);
        state.apply(
            &panel("0100000100000000----", "003", "ARMED ***AWAY***FAULT 03"),
            at(),
        );
        let delta = state.apply(
            &panel("1100000100000000----", "003", "ARMED ***AWAY***"),
            at(),
        );
        assert_eq!(delta.restored_zones, vec![3]);
        assert_eq!(delta.ready_changes, vec![(1, true)]);
        assert!(delta.faulted_zones.is_empty());
        assert!(delta.arm_changes.is_empty());
        assert!(!state.zones[&3].faulted);
    }

    #[test]
    fn test_fault_restore_pairing_is_exact() {
        let mut state = DeviceState::new(1);
        let fault = panel("0000000100000000----", "005", "FAULT 05");
        let ready = panel("1000000100000000----", "008", "****DISARMED****  Ready to Arm  ");

        let d1 = state.apply(&fault, at());
        assert_eq!(d1.faulted_zones, vec![5]);
        let d2 = state.apply(&fault, at());
        assert!(d2.faulted_zones.is_empty());

        let d3 = state.apply(&ready, at());
        assert_eq!(d3.restored_zones, vec![5]);
        let d4 = state.apply(&ready, at());
        assert!(d4.restored_zones.is_empty());
    }

    #[test]
    fn test_multiple_faults_restore_in_ascending_order() {
        let mut state = DeviceState::new(1);
        state.apply(&panel("0000000100000000----", "012", "FAULT 12"), at());
        state.apply(&panel("0000000100000000----", "004", "FAULT 04"), at());
        let delta = state.apply(
            &panel("1000000100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        assert_eq!(delta.restored_zones, vec![4, 12]);
    }

    #[test]
    fn test_bypass_set_and_cleared() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&panel("0000001100000000----", "009", "BYPAS 09"), at());
        assert_eq!(delta.bypass_changes, vec![(9, true)]);

        // Bypassed zones survive a ready line.
        let delta = state.apply(
            &panel("1000001100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        assert!(delta.bypass_changes.is_empty());
        assert!(state.zones[&9].bypassed);

        // Dropping the bypass bit clears every bypassed zone.
        let delta = state.apply(
            &panel("1000000100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        assert_eq!(delta.bypass_changes, vec![(9, false)]);
    }

    #[test]
    fn test_bypassed_zone_not_restored() {
        let mut state = DeviceState::new(1);
        state.apply(&panel("0000001100000000----", "009", "BYPAS 09"), at());
        state.zone_entry(9).faulted = true;
        let delta = state.apply(
            &panel("1000001100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        assert!(delta.restored_zones.is_empty());
        assert!(state.zones[&9].faulted);
    }

    #[test]
    fn test_panel_alarm_fire_over_burglary() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&panel("0000000100000100----", "095", "FIRE"), at());
        assert_eq!(delta.alarms_triggered, vec![(1, AlarmCause::Fire)]);

        let delta = state.apply(
            &panel("1000000100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        assert_eq!(delta.alarms_cleared, vec![(1, AlarmCause::Fire)]);
        assert_eq!(state.partitions[&1].alarm, None);
    }

    #[test]
    fn test_lrr_panic_regardless_of_panel_flags() {
        let mut state = DeviceState::new(1);
        state.apply(
            &panel("1000000100000000----", "008", "****DISARMED****  Ready to Arm  "),
            at(),
        );
        let delta = state.apply(&msg("!LRR:000,1,CID_1120"), at());
        assert_eq!(delta.alarms_triggered, vec![(1, AlarmCause::Panic)]);

        // Same report again: the alarm is already latched.
        let delta = state.apply(&msg("!LRR:000,1,CID_1120"), at());
        assert!(delta.alarms_triggered.is_empty());
        assert!(delta.message_slot.is_none());
    }

    #[test]
    fn test_lrr_alarm_restore_clears() {
        let mut state = DeviceState::new(1);
        state.apply(&msg("!LRR:000,1,CID_1131"), at());
        assert_eq!(state.partitions[&1].alarm, Some(AlarmCause::Burglary));
        let delta = state.apply(&msg("!LRR:000,1,CID_3131"), at());
        assert_eq!(delta.alarms_cleared, vec![(1, AlarmCause::Burglary)]);
    }

    #[test]
    fn test_lrr_open_close() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&msg("!LRR:002,1,CID_3441"), at());
        assert_eq!(
            delta.arm_changes,
            vec![(1, ArmedMode::Disarmed, ArmedMode::Stay)]
        );
        let delta = state.apply(&msg("!LRR:002,1,CID_1401"), at());
        assert_eq!(delta.arm_changes, vec![(1, ArmedMode::Stay, ArmedMode::Disarmed)]);
    }

    #[test]
    fn test_lrr_creates_partition_on_demand() {
        let mut state = DeviceState::new(1);
        state.apply(&msg("!LRR:012,3,ARM_AWAY"), at());
        assert_eq!(state.partitions[&3].mode, ArmedMode::Away);
        assert!(!state.partitions.contains_key(&2));
    }

    #[test]
    fn test_lrr_power_and_battery() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&msg("!LRR:000,1,CID_1301"), at());
        assert_eq!(delta.ac_power, Some(false));
        let delta = state.apply(&msg("!LRR:000,1,CID_3301"), at());
        assert_eq!(delta.ac_power, Some(true));

        let delta = state.apply(&msg("!LRR:000,1,LOWBAT"), at());
        assert_eq!(delta.battery_low, Some(true));
        let delta = state.apply(&msg("!LRR:000,1,LOWBAT_RESTORE"), at());
        assert_eq!(delta.battery_low, Some(false));
    }

    #[test]
    fn test_lrr_bypass_uses_data_field() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&msg("!LRR:009,1,CID_1570"), at());
        assert_eq!(delta.bypass_changes, vec![(9, true)]);
        let delta = state.apply(&msg("!LRR:009,1,CID_3570"), at());
        assert_eq!(delta.bypass_changes, vec![(9, false)]);
    }

    #[test]
    fn test_relay_edges() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&msg("!EXP:07,01,01"), at());
        assert_eq!(delta.relay_changes, vec![(7, 1, true)]);
        let delta = state.apply(&msg("!EXP:07,01,01"), at());
        assert!(delta.relay_changes.is_empty());
        let delta = state.apply(&msg("!EXP:07,01,00"), at());
        assert_eq!(delta.relay_changes, vec![(7, 1, false)]);
    }

    #[test]
    fn test_boot_always_reports() {
        let mut state = DeviceState::new(1);
        let first = state.apply(&Message::Boot, at());
        assert!(first.booted);
        assert_eq!(first.message_slot, Some(MessageCategory::System));

        let second = state.apply(&Message::Boot, at());
        assert!(second.booted, "a reboot is reportable every time");
        assert!(second.message_slot.is_none());
        assert!(state.device_ready);
        assert!(state.last_boot.is_some());
    }

    #[test]
    fn test_rejected_command_flag() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&Message::RejectedCommand, at());
        assert!(delta.command_rejected);
    }

    #[test]
    fn test_config_change_detection() {
        let mut state = DeviceState::new(1);
        let config = msg("!CONFIG>ADDRESS=18&LRR=Y");
        let delta = state.apply(&config, at());
        assert!(delta.config_received);
        let delta = state.apply(&config, at());
        assert!(delta.is_empty());
        let delta = state.apply(&msg("!CONFIG>ADDRESS=20&LRR=Y"), at());
        assert!(delta.config_received);
    }

    #[test]
    fn test_unknown_records_without_delta() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(
            &Message::Unknown {
                raw: "!CID:1234000001040".to_string(),
            },
            at(),
        );
        assert!(delta.is_empty());
        assert_eq!(state.last_unknown.as_deref(), Some("!CID:1234000001040"));
        assert!(state.last_message(MessageCategory::Unknown).is_none());
    }

    #[test]
    fn test_aui_touches_only_message_slot() {
        let mut state = DeviceState::new(1);
        let delta = state.apply(&msg("!AUI:1,2,0,ARMED STAY"), at());
        assert_eq!(delta.message_slot, Some(MessageCategory::Aui));
        let mut bare = delta.clone();
        bare.message_slot = None;
        assert!(bare.is_empty());
    }

    #[test]
    fn test_version_stored() {
        let mut state = DeviceState::new(1);
        state.apply(&msg("!VER:ffffffff,V2.2a.8.8,TX;RX"), at());
        let version = state.version.as_ref().unwrap();
        assert_eq!(version.firmware, "V2.2a.8.8");
    }
}
