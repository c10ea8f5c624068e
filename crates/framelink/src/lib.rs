//! Cross-process GPU frame exchange.
//!
//! A producer process (say, a renderer) hands GPU-resident frames to a
//! consumer process (a capture or overlay host) through shared control
//! blocks plus GPU synchronization primitives. No threads are created and
//! no cross-process locks are taken: each side drives the protocol
//! cooperatively, once per its own work cycle, and the only blocking calls
//! are the four wait/signal operations around the caller's own GPU work.
//!
//! The per-cycle shape on each side:
//!
//! ```text
//! producer                          consumer
//! --------                          --------
//! tick() -> Frame { index }         tick() -> Frame { index, .. }
//! wait_for_consumer_read(queue)     wait_for_producer_write(queue)
//! ... render into resource ...      ... consume resource ...
//! signal_write(queue)               signal_read(queue)
//! ```
//!
//! Faults never poison a session. The producer classifies the fault,
//! publishes it for the peer, and reopens a fresh connection under the same
//! advertised name; the consumer disconnects and reports `NotConnected`
//! until its caller reconnects.
//!
//! The wire format lives in [`framelink_shared`]; the synchronization
//! capability traits and the software reference driver in
//! [`framelink_sync`].

pub mod diag;
pub mod naming;

mod consumer;
mod error;
mod hooks;
mod producer;
mod ring;
mod ticks;

pub use consumer::{ConnectParams, ConsumerSession, ConsumerTick};
pub use error::{ConnectError, ConsumerFault, CreateError, ProducerFault};
pub use hooks::SlotHooks;
pub use producer::{ProducerConfig, ProducerSession, ProducerTick, SurfaceSpec};
pub use ring::RingCounters;
pub use ticks::{now_ticks, ticks_for};

pub use framelink_shared as shared;
pub use framelink_sync as sync;

pub use diag::Diagnostics;
