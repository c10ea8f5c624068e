//! Error taxonomy of the protocol engine.
//!
//! Creation and connection failures are ordinary `Result` errors the caller
//! can retry at the call level. Steady-state faults are different: they are
//! classified into a wire stop-reason code, published for the peer, and the
//! connection is torn down before the caller sees the fault.

use thiserror::Error;

use framelink_shared::{ConsumerStop, ProducerStop, RegionError};
use framelink_sync::DriverError;

use crate::naming::NameError;

/// Failure to create a producer session.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("invalid pipeline depth {0}")]
    InvalidDepth(usize),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Failure of a consumer connect call.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("shared block does not carry the protocol magic")]
    ForeignBlock,
    #[error("protocol version mismatch: ours {ours}, producer's {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },
    #[error("producer advertises an unknown sync family")]
    UnknownFamily,
    #[error("no connection is available to claim")]
    Unavailable,
    #[error("producer advertises an unusable pipeline depth {0}")]
    BadSlotCount(usize),
    #[error("failed to attach to the producer process")]
    Peer(#[source] DriverError),
}

/// Producer-side wait/signal failure. The session has already published the
/// stop reason and reopened a fresh connection by the time this is returned;
/// the caller skips the frame and keeps ticking.
#[derive(Debug, Error)]
pub enum ProducerFault {
    #[error("no active connection")]
    NotConnected,
    #[error("connection fault: {}", .0.describe())]
    Stopped(ProducerStop),
}

/// Consumer-side wait/signal failure. The session has already published the
/// stop reason and disconnected; reconnecting is the caller's move.
#[derive(Debug, Error)]
pub enum ConsumerFault {
    #[error("not connected")]
    NotConnected,
    #[error("connection fault: {}", .0.describe())]
    Stopped(ConsumerStop),
}
