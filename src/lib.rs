// MIT License - Copyright (c) 2023 ad2driver contributors
//
//! # ad2driver
//!
//! Protocol decoder and state-tracking engine for AD2-family alarm panel
//! interface devices (the line-oriented ASCII protocol spoken over
//! serial or TCP).
//!
//! The crate owns no transport. It turns the byte stream you read from
//! the device into typed messages, folds them into a rolling device
//! state with strict edge detection, and delivers typed events to
//! registered listeners. In the other direction it encodes arm, disarm,
//! panic, output, and configuration commands into exact wire bytes for
//! you to send.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ad2driver::{Ad2Driver, CommandRequest, DriverConfig, EventKind};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut driver = Ad2Driver::new(DriverConfig::default());
//!
//!     driver.register(|event| {
//!         if let EventKind::ZoneFaulted { zone } = event.kind {
//!             println!("zone {zone} faulted");
//!         }
//!         Ok(())
//!     });
//!
//!     // Pump bytes from the serial port or socket.
//!     driver.feed(b"!Ready\r\n")?;
//!
//!     // Encode a command for the same connection.
//!     let bytes = driver.submit(&CommandRequest::RequestVersion)?;
//!     assert_eq!(bytes, b"V\r");
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod message;
pub mod reader;
pub mod state;

// Re-exports for convenience
pub use command::{encode, ArmMode, CommandRequest, OutputAction, PanicKind};
pub use config::{DriverConfig, DriverConfigBuilder};
pub use driver::Ad2Driver;
pub use error::{Ad2Error, Result};
pub use event::{
    diagnostic_channel, events_from_delta, BoxError, Diagnostic, DiagnosticReceiver,
    DiagnosticSender, Dispatcher, Event, EventKind, ListenerId,
};
pub use message::{
    decode, AuiMessage, DeviceConfig, LrrCategory, LrrEvent, LrrMessage, Message, MessageCategory,
    PanelMode, PanelStatus, RelayKind, RelayMessage, RfMessage, StatusFlags, VersionInfo,
};
pub use reader::{LineReader, RawLine};
pub use state::{AlarmCause, ArmedMode, DeviceState, PartitionState, StateDelta, ZoneState};
