//! Diagnostics sink.
//!
//! Sessions report noteworthy events as (category, severity, machine id,
//! formatted text) tuples. The sink is entirely side-channel: no protocol
//! behavior depends on it. The default sink forwards to `tracing`; hosts
//! with their own logging plumb in a [`DiagSink`] of their own.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagCategory {
    ProducerCreate,
    ProducerOpen,
    ProducerReset,
    ProducerTick,
    ProducerFrame,
    ConsumerConnect,
    ConsumerTick,
    ConsumerFrame,
}

/// Machine-readable event ids. Text rendering may change; ids are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagId {
    ProducerStarted,
    ConnectionReady,
    RecoverFromOpenFailure,
    ConnectionReset,
    TokenClaimed,
    HandshakeComplete,
    HandshakeTimedOut,
    ConsumerRequestedStop,
    ConsumerTimedOut,
    ProducerFault,
    SlotCreateAttempt,
    SlotCreateSuccess,
    SlotCreateHookFailed,
    ConsumerConnected,
    ProducerRequestedStop,
    ProducerTimedOut,
    ConsumerFault,
    SlotOpenAttempt,
    SlotOpenSuccess,
    SlotOpenHookFailed,
}

impl DiagId {
    pub fn meta(self) -> (DiagCategory, DiagSeverity, &'static str) {
        use DiagCategory::*;
        use DiagSeverity::*;
        match self {
            DiagId::ProducerStarted => (ProducerCreate, Info, "PRODUCER_STARTED"),
            DiagId::ConnectionReady => (ProducerOpen, Info, "CONNECTION_READY"),
            DiagId::RecoverFromOpenFailure => (ProducerTick, Info, "RECOVER_FROM_OPEN_FAILURE"),
            DiagId::ConnectionReset => (ProducerReset, Info, "CONNECTION_RESET"),
            DiagId::TokenClaimed => (ProducerTick, Info, "TOKEN_CLAIMED"),
            DiagId::HandshakeComplete => (ProducerTick, Info, "HANDSHAKE_COMPLETE"),
            DiagId::HandshakeTimedOut => (ProducerTick, Warning, "HANDSHAKE_TIMED_OUT"),
            DiagId::ConsumerRequestedStop => (ProducerTick, Info, "CONSUMER_REQUESTED_STOP"),
            DiagId::ConsumerTimedOut => (ProducerTick, Warning, "CONSUMER_TIMED_OUT"),
            DiagId::ProducerFault => (ProducerTick, Error, "PRODUCER_FAULT"),
            DiagId::SlotCreateAttempt => (ProducerFrame, Info, "SLOT_CREATE_ATTEMPT"),
            DiagId::SlotCreateSuccess => (ProducerFrame, Info, "SLOT_CREATE_SUCCESS"),
            DiagId::SlotCreateHookFailed => (ProducerFrame, Error, "SLOT_CREATE_HOOK_FAILED"),
            DiagId::ConsumerConnected => (ConsumerConnect, Info, "CONSUMER_CONNECTED"),
            DiagId::ProducerRequestedStop => (ConsumerTick, Info, "PRODUCER_REQUESTED_STOP"),
            DiagId::ProducerTimedOut => (ConsumerTick, Warning, "PRODUCER_TIMED_OUT"),
            DiagId::ConsumerFault => (ConsumerTick, Error, "CONSUMER_FAULT"),
            DiagId::SlotOpenAttempt => (ConsumerFrame, Info, "SLOT_OPEN_ATTEMPT"),
            DiagId::SlotOpenSuccess => (ConsumerFrame, Info, "SLOT_OPEN_SUCCESS"),
            DiagId::SlotOpenHookFailed => (ConsumerFrame, Error, "SLOT_OPEN_HOOK_FAILED"),
        }
    }

    pub fn name(self) -> &'static str {
        self.meta().2
    }
}

pub struct DiagRecord<'a> {
    pub category: DiagCategory,
    pub severity: DiagSeverity,
    pub id: DiagId,
    pub text: &'a str,
}

pub trait DiagSink: Send + Sync {
    fn message(&self, record: &DiagRecord<'_>);
}

/// Forwards records to `tracing` under the `framelink` target.
pub struct TracingSink;

impl DiagSink for TracingSink {
    fn message(&self, record: &DiagRecord<'_>) {
        match record.severity {
            DiagSeverity::Error => {
                tracing::error!(target: "framelink", id = record.id.name(), "{}", record.text)
            }
            DiagSeverity::Warning => {
                tracing::warn!(target: "framelink", id = record.id.name(), "{}", record.text)
            }
            DiagSeverity::Info => {
                tracing::info!(target: "framelink", id = record.id.name(), "{}", record.text)
            }
        }
    }
}

/// Swallows everything.
pub struct NullSink;

impl DiagSink for NullSink {
    fn message(&self, _record: &DiagRecord<'_>) {}
}

/// Shared handle to a session's sink.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagSink>,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagSink>) -> Self {
        Self { sink }
    }

    /// The `tracing`-backed default.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub(crate) fn emit(&self, id: DiagId, args: fmt::Arguments<'_>) {
        let (category, severity, _) = id.meta();
        let text = fmt::format(args);
        self.sink.message(&DiagRecord {
            category,
            severity,
            id,
            text: &text,
        });
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::tracing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    struct CaptureSink(Mutex<Vec<(DiagId, String)>>);

    impl DiagSink for CaptureSink {
        fn message(&self, record: &DiagRecord<'_>) {
            self.0
                .lock()
                .unwrap()
                .push((record.id, record.text.to_owned()));
        }
    }

    #[test]
    fn records_reach_the_sink_with_formatted_text() {
        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        let diag = Diagnostics::new(sink.clone());
        diag.emit(DiagId::SlotCreateAttempt, format_args!("slot {}", 2));

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DiagId::SlotCreateAttempt);
        assert_eq!(seen[0].1, "slot 2");
    }

    #[test]
    fn tracing_sink_accepts_every_severity() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();

        let diag = Diagnostics::tracing();
        diag.emit(DiagId::ProducerStarted, format_args!("info path"));
        diag.emit(DiagId::ConsumerTimedOut, format_args!("warning path"));
        diag.emit(DiagId::ProducerFault, format_args!("error path"));
    }

    #[test]
    fn every_id_has_distinct_metadata_name() {
        let ids = [
            DiagId::ProducerStarted,
            DiagId::ConnectionReady,
            DiagId::TokenClaimed,
            DiagId::HandshakeComplete,
            DiagId::ConsumerTimedOut,
            DiagId::ProducerFault,
            DiagId::SlotCreateAttempt,
            DiagId::SlotOpenSuccess,
        ];
        let mut names: Vec<_> = ids.iter().map(|id| id.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ids.len());
    }
}
