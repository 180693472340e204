// MIT License - Copyright (c) 2023 ad2driver contributors

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use crate::command::{self, CommandRequest};
use crate::config::DriverConfig;
use crate::error::{Ad2Error, Result};
use crate::event::{
    diagnostic_channel, events_from_delta, BoxError, Diagnostic, DiagnosticReceiver,
    DiagnosticSender, Dispatcher, Event, ListenerId,
};
use crate::message::{self, Message};
use crate::reader::{LineReader, RawLine};
use crate::state::DeviceState;

/// The main public API: the full receive pipeline for one device
/// connection, plus command encoding for the send direction.
///
/// The driver owns no transport. Feed it the bytes you read from the
/// serial port or TCP socket; hand the bytes it encodes to the same
/// connection.
///
/// # Example
///
/// ```no_run
/// use ad2driver::{Ad2Driver, CommandRequest, DriverConfig};
///
/// fn main() -> anyhow::Result<()> {
///     let mut driver = Ad2Driver::new(DriverConfig::default());
///
///     driver.register(|event| {
///         println!("{:?}", event.kind);
///         Ok(())
///     });
///
///     // Bytes from the transport, in arrival order.
///     driver.feed(b"!Ready\r\n")?;
///
///     // Encode a command for the transport to send.
///     let bytes = driver.submit(&CommandRequest::RequestVersion)?;
///     assert_eq!(bytes, b"V\r");
///     Ok(())
/// }
/// ```
pub struct Ad2Driver {
    config: DriverConfig,
    reader: LineReader,
    state: DeviceState,
    dispatcher: Dispatcher,
    diagnostics: DiagnosticSender,
}

impl Ad2Driver {
    pub fn new(config: DriverConfig) -> Self {
        let (diagnostics, _) = diagnostic_channel(config.diagnostic_capacity);
        Ad2Driver {
            reader: LineReader::new(config.max_line_length),
            state: DeviceState::new(config.default_partition),
            dispatcher: Dispatcher::new(diagnostics.clone()),
            diagnostics,
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The current state snapshot. Listeners never get this reference;
    /// they see only delivered events.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Register an event listener. Listeners run on the thread that
    /// calls [`Ad2Driver::feed`], in registration order.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.dispatcher.register(listener)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.dispatcher.unregister(id)
    }

    /// Subscribe to out-of-band diagnostics (malformed lines, listener
    /// failures, buffer overflow).
    pub fn subscribe_diagnostics(&self) -> DiagnosticReceiver {
        self.diagnostics.subscribe()
    }

    /// Feed raw bytes from the transport, in arrival order.
    ///
    /// Every complete line is decoded, reconciled, and dispatched before
    /// the next one, so edge detection sees messages exactly as the
    /// device emitted them. Malformed lines are reported as diagnostics
    /// and skipped. The only error returned is
    /// [`Ad2Error::FrameTooLong`]; after it the internal buffer has been
    /// discarded and the caller should reset the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        let lines = match self.reader.feed(bytes) {
            Ok(lines) => lines,
            Err(err) => {
                if let Ad2Error::FrameTooLong { max, actual } = err {
                    error!(max, actual, "line buffer overflow, connection should reset");
                    let _ = self
                        .diagnostics
                        .send(Diagnostic::FrameOverflow { max, actual });
                    return Err(Ad2Error::FrameTooLong { max, actual });
                }
                return Err(err);
            }
        };
        for line in lines {
            self.process_line(line);
        }
        Ok(())
    }

    fn process_line(&mut self, line: RawLine) {
        trace!(line = line.as_str(), "processing line");
        let msg = match message::decode(&line) {
            Ok(msg) => msg,
            Err(Ad2Error::MalformedMessage { raw, reason }) => {
                warn!(%raw, %reason, "discarding malformed line");
                let _ = self
                    .diagnostics
                    .send(Diagnostic::MalformedLine { raw, reason });
                return;
            }
            Err(err) => {
                // Decoding has no other failure mode today.
                warn!(%err, "discarding undecodable line");
                return;
            }
        };
        if let Message::Unknown { raw } = &msg {
            debug!(%raw, "unrecognized line carried through");
            let _ = self
                .diagnostics
                .send(Diagnostic::UnknownLine { raw: raw.clone() });
        }

        let at = Utc::now();
        let delta = self.state.apply(&msg, at);
        if delta.is_empty() {
            trace!(category = ?msg.category(), "no state change");
            return;
        }
        let events = events_from_delta(&delta, at);
        debug!(
            category = ?msg.category(),
            events = events.len(),
            "dispatching"
        );
        self.dispatcher.dispatch(&events);
    }

    /// Encode a command for the transport to send. Pure; nothing is
    /// transmitted and no state is touched.
    pub fn submit(&self, request: &CommandRequest) -> Result<Vec<u8>> {
        let bytes = command::encode(request)?;
        debug!(command = request.label(), len = bytes.len(), "encoded command");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::{Arc, Mutex};

    fn collecting_driver() -> (Ad2Driver, Arc<Mutex<Vec<EventKind>>>) {
        let driver = Ad2Driver::new(DriverConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        driver.register(move |event| {
            sink.lock().unwrap().push(event.kind);
            Ok(())
        });
        (driver, seen)
    }

    #[test]
    fn test_feed_decodes_and_dispatches() {
        let (mut driver, seen) = collecting_driver();
        driver.feed(b"!Ready\r\n").unwrap();
        assert_eq!(seen.lock().unwrap().first(), Some(&EventKind::DeviceBooted));
        assert!(driver.state().device_ready);
    }

    #[test]
    fn test_partial_lines_buffer_across_feeds() {
        let (mut driver, seen) = collecting_driver();
        driver.feed(b"!Rea").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        driver.feed(b"dy\r\n").unwrap();
        assert_eq!(seen.lock().unwrap().first(), Some(&EventKind::DeviceBooted));
    }

    #[test]
    fn test_malformed_line_reported_and_skipped() {
        let (mut driver, seen) = collecting_driver();
        let mut diagnostics = driver.subscribe_diagnostics();

        driver.feed(b"!EXP:07,xx,01\r\n!Ready\r\n").unwrap();

        match diagnostics.try_recv().unwrap() {
            Diagnostic::MalformedLine { raw, .. } => assert_eq!(raw, "!EXP:07,xx,01"),
            other => panic!("expected malformed diagnostic, got {other:?}"),
        }
        // The bad line produced no events; the next line still worked.
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::DeviceBooted, EventKind::MessageReceived {
                category: crate::message::MessageCategory::System
            }]
        );
    }

    #[test]
    fn test_overflow_surfaces_diagnostic_and_error() {
        let config = DriverConfig::builder().max_line_length(16).build();
        let mut driver = Ad2Driver::new(config);
        let mut diagnostics = driver.subscribe_diagnostics();

        let err = driver.feed(&[b'x'; 64]).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            diagnostics.try_recv().unwrap(),
            Diagnostic::FrameOverflow { .. }
        ));
    }

    #[test]
    fn test_submit_is_pure() {
        let (driver, seen) = collecting_driver();
        let bytes = driver
            .submit(&CommandRequest::Disarm {
                code: "1234".to_string(),
            })
            .unwrap();
        assert_eq!(bytes, b"12341");
        assert!(seen.lock().unwrap().is_empty());
    }
}
