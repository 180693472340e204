// MIT License - Copyright (c) 2023 ad2driver contributors

//! Typed events, listener dispatch, and the diagnostics channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::message::MessageCategory;
use crate::state::{AlarmCause, ArmedMode, StateDelta};

/// All events the driver can emit.
///
/// Each variant carries the affected entity id and the new value; arm
/// changes also carry the previous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// The device reset and reported ready
    DeviceBooted,
    /// A zone transitioned to faulted
    ZoneFaulted { zone: u32 },
    /// A faulted zone transitioned back to clear
    ZoneRestored { zone: u32 },
    /// A zone was bypassed or un-bypassed
    ZoneBypassChanged { zone: u32, bypassed: bool },
    /// A partition changed arm mode
    ArmModeChanged {
        partition: u32,
        old: ArmedMode,
        new: ArmedMode,
    },
    /// An alarm started on a partition
    AlarmTriggered { partition: u32, cause: AlarmCause },
    /// A partition alarm ended
    AlarmCleared { partition: u32, cause: AlarmCause },
    /// Chime enabled or disabled
    ChimeChanged { partition: u32, chime: bool },
    /// Ready-to-arm flag changed
    ReadyChanged { partition: u32, ready: bool },
    /// Mains power lost or restored
    AcPowerChanged { present: bool },
    /// System battery crossed the low threshold, either direction
    BatteryLowChanged { low: bool },
    /// A relay or expander channel moved
    RelayChanged {
        address: u32,
        channel: u32,
        active: bool,
    },
    /// A configuration report arrived that differs from the stored one
    ConfigReceived,
    /// The panel never acknowledged a sent command
    CommandRejected,
    /// The last-message slot for a category changed
    MessageReceived { category: MessageCategory },
}

/// An immutable, timestamped event. Not retained after delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

/// Expand a delta into events, in a fixed kind order. Within a kind,
/// entries keep the ascending-id order the reconciler built them in.
/// `MessageReceived` is always last.
pub fn events_from_delta(delta: &StateDelta, at: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::new();
    let mut push = |kind: EventKind| events.push(Event { at, kind });

    if delta.booted {
        push(EventKind::DeviceBooted);
    }
    for &zone in &delta.faulted_zones {
        push(EventKind::ZoneFaulted { zone });
    }
    for &zone in &delta.restored_zones {
        push(EventKind::ZoneRestored { zone });
    }
    for &(zone, bypassed) in &delta.bypass_changes {
        push(EventKind::ZoneBypassChanged { zone, bypassed });
    }
    for &(partition, old, new) in &delta.arm_changes {
        push(EventKind::ArmModeChanged {
            partition,
            old,
            new,
        });
    }
    for &(partition, cause) in &delta.alarms_triggered {
        push(EventKind::AlarmTriggered { partition, cause });
    }
    for &(partition, cause) in &delta.alarms_cleared {
        push(EventKind::AlarmCleared { partition, cause });
    }
    for &(partition, chime) in &delta.chime_changes {
        push(EventKind::ChimeChanged { partition, chime });
    }
    for &(partition, ready) in &delta.ready_changes {
        push(EventKind::ReadyChanged { partition, ready });
    }
    if let Some(present) = delta.ac_power {
        push(EventKind::AcPowerChanged { present });
    }
    if let Some(low) = delta.battery_low {
        push(EventKind::BatteryLowChanged { low });
    }
    for &(address, channel, active) in &delta.relay_changes {
        push(EventKind::RelayChanged {
            address,
            channel,
            active,
        });
    }
    if delta.config_received {
        push(EventKind::ConfigReceived);
    }
    if delta.command_rejected {
        push(EventKind::CommandRejected);
    }
    if let Some(category) = delta.message_slot {
        push(EventKind::MessageReceived { category });
    }
    events
}

/// Out-of-band conditions surfaced beside the event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A line with a recognized marker failed decoding; the stream
    /// continues with the next line.
    MalformedLine { raw: String, reason: String },
    /// The carry-over buffer overflowed; the connection should reset.
    FrameOverflow { max: usize, actual: usize },
    /// A listener returned an error for an event; delivery continued.
    ListenerFailure { listener: ListenerId, error: String },
    /// An unrecognized line passed through as an unknown message.
    UnknownLine { raw: String },
}

/// Type alias for the diagnostics broadcast sender.
pub type DiagnosticSender = tokio::sync::broadcast::Sender<Diagnostic>;

/// Type alias for the diagnostics broadcast receiver.
pub type DiagnosticReceiver = tokio::sync::broadcast::Receiver<Diagnostic>;

/// Create a new diagnostics channel with the given capacity. Lagging
/// subscribers lose the oldest entries, never block the driver.
pub fn diagnostic_channel(capacity: usize) -> (DiagnosticSender, DiagnosticReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

/// Errors a listener may return; they are reported, never propagated.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for every delivered event.
pub type Listener = dyn Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync;

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ListenerId(u64);

/// Delivers events to registered listeners in registration order.
///
/// The listener set is snapshotted once per dispatch, so registering or
/// unregistering during a dispatch (from a callback or another thread)
/// only affects later dispatches.
pub struct Dispatcher {
    listeners: Mutex<Vec<(ListenerId, Arc<Listener>)>>,
    next_id: AtomicU64,
    diagnostics: DiagnosticSender,
}

impl Dispatcher {
    pub fn new(diagnostics: DiagnosticSender) -> Self {
        Dispatcher {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            diagnostics,
        }
    }

    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Deliver each event to every listener registered at the start of
    /// this call. A failing listener is reported and skipped for that
    /// event; later listeners and events still run.
    pub fn dispatch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<(ListenerId, Arc<Listener>)> =
            self.listeners.lock().unwrap().clone();
        for event in events {
            for (id, listener) in &snapshot {
                if let Err(error) = listener(event) {
                    warn!(listener = id.0, %error, "listener failed, delivery continues");
                    let _ = self.diagnostics.send(Diagnostic::ListenerFailure {
                        listener: *id,
                        error: error.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_empty_delta_no_events() {
        let delta = StateDelta::default();
        assert!(events_from_delta(&delta, Utc::now()).is_empty());
    }

    #[test]
    fn test_event_order_is_fixed() {
        let delta = StateDelta {
            booted: true,
            faulted_zones: vec![3, 7],
            restored_zones: vec![2],
            bypass_changes: vec![(9, true)],
            arm_changes: vec![(1, ArmedMode::Disarmed, ArmedMode::Away)],
            alarms_triggered: vec![(1, AlarmCause::Panic)],
            alarms_cleared: vec![(2, AlarmCause::Fire)],
            chime_changes: vec![(1, true)],
            ready_changes: vec![(1, false)],
            ac_power: Some(false),
            battery_low: Some(true),
            relay_changes: vec![(12, 1, true)],
            config_received: true,
            command_rejected: true,
            message_slot: Some(MessageCategory::Panel),
        };
        let got = kinds(&events_from_delta(&delta, Utc::now()));
        assert_eq!(
            got,
            vec![
                EventKind::DeviceBooted,
                EventKind::ZoneFaulted { zone: 3 },
                EventKind::ZoneFaulted { zone: 7 },
                EventKind::ZoneRestored { zone: 2 },
                EventKind::ZoneBypassChanged {
                    zone: 9,
                    bypassed: true
                },
                EventKind::ArmModeChanged {
                    partition: 1,
                    old: ArmedMode::Disarmed,
                    new: ArmedMode::Away
                },
                EventKind::AlarmTriggered {
                    partition: 1,
                    cause: AlarmCause::Panic
                },
                EventKind::AlarmCleared {
                    partition: 2,
                    cause: AlarmCause::Fire
                },
                EventKind::ChimeChanged {
                    partition: 1,
                    chime: true
                },
                EventKind::ReadyChanged {
                    partition: 1,
                    ready: false
                },
                EventKind::AcPowerChanged { present: false },
                EventKind::BatteryLowChanged { low: true },
                EventKind::RelayChanged {
                    address: 12,
                    channel: 1,
                    active: true
                },
                EventKind::ConfigReceived,
                EventKind::CommandRejected,
                EventKind::MessageReceived {
                    category: MessageCategory::Panel
                },
            ]
        );
    }

    #[test]
    fn test_message_received_is_last() {
        let delta = StateDelta {
            faulted_zones: vec![1],
            message_slot: Some(MessageCategory::Panel),
            ..StateDelta::default()
        };
        let got = kinds(&events_from_delta(&delta, Utc::now()));
        assert_eq!(
            got.last(),
            Some(&EventKind::MessageReceived {
                category: MessageCategory::Panel
            })
        );
    }

    fn sample_events(n: u32) -> Vec<Event> {
        (0..n)
            .map(|zone| Event {
                at: Utc::now(),
                kind: EventKind::ZoneFaulted { zone },
            })
            .collect()
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let (tx, _rx) = diagnostic_channel(8);
        let dispatcher = Dispatcher::new(tx);
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            dispatcher.register(move |event| {
                let zone = match event.kind {
                    EventKind::ZoneFaulted { zone } => zone,
                    _ => u32::MAX,
                };
                log.lock().unwrap().push((tag, zone));
                Ok(())
            });
        }

        dispatcher.dispatch(&sample_events(2));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", 0), ("second", 0), ("first", 1), ("second", 1)]
        );
    }

    #[test]
    fn test_listener_failure_is_isolated() {
        let (tx, mut rx) = diagnostic_channel(8);
        let dispatcher = Dispatcher::new(tx);
        let delivered = Arc::new(Mutex::new(0u32));

        dispatcher.register(|_| Err("listener broke".into()));
        {
            let delivered = Arc::clone(&delivered);
            dispatcher.register(move |_| {
                *delivered.lock().unwrap() += 1;
                Ok(())
            });
        }

        dispatcher.dispatch(&sample_events(3));
        assert_eq!(*delivered.lock().unwrap(), 3);

        match rx.try_recv().unwrap() {
            Diagnostic::ListenerFailure { error, .. } => {
                assert!(error.contains("listener broke"));
            }
            other => panic!("expected listener failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unregister() {
        let (tx, _rx) = diagnostic_channel(8);
        let dispatcher = Dispatcher::new(tx);
        let count = Arc::new(Mutex::new(0u32));

        let id = {
            let count = Arc::clone(&count);
            dispatcher.register(move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            })
        };
        dispatcher.dispatch(&sample_events(1));
        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        dispatcher.dispatch(&sample_events(1));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_registration_during_dispatch_affects_next_dispatch_only() {
        let (tx, _rx) = diagnostic_channel(8);
        let dispatcher = Arc::new(Dispatcher::new(tx));
        let late_calls = Arc::new(Mutex::new(0u32));

        {
            let dispatcher = Arc::clone(&dispatcher);
            let late_calls = Arc::clone(&late_calls);
            let hooked = Arc::new(Mutex::new(false));
            dispatcher.clone().register(move |_| {
                let mut hooked = hooked.lock().unwrap();
                if !*hooked {
                    *hooked = true;
                    let late_calls = Arc::clone(&late_calls);
                    dispatcher.register(move |_| {
                        *late_calls.lock().unwrap() += 1;
                        Ok(())
                    });
                }
                Ok(())
            });
        }

        dispatcher.dispatch(&sample_events(2));
        // The listener added mid-dispatch saw none of the in-flight events.
        assert_eq!(*late_calls.lock().unwrap(), 0);

        dispatcher.dispatch(&sample_events(1));
        assert_eq!(*late_calls.lock().unwrap(), 1);
    }
}
