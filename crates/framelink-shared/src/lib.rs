//! Shared-memory wire format for the framelink frame-exchange protocol.
//!
//! A producer session publishes one [`rendezvous::RendezvousBlock`] under a
//! well-known name, plus one [`connection::ConnectionBlock`] per connection
//! attempt. Both blocks are fixed-layout `#[repr(C)]` structures made of
//! language-level atomics; the layout *is* the wire format and must match
//! exactly between the two processes (checked via magic + version).
//!
//! Every field has exactly one writer process. The convention is documented
//! per field; it is what prevents write-write races, not any lock.

pub mod connection;
pub mod kinds;
pub mod layout;
pub mod region;
pub mod rendezvous;

pub use connection::{ConnectionBlock, NegotiatedParams, SlotHandleSet, SlotRecord};
pub use kinds::{
    ChannelInterp, ConsumerStop, ProducerStop, SurfaceFormat, SyncFamily, UsageFlags,
};
pub use layout::{DEFAULT_SLOTS, LINK_MAGIC, MAX_SLOTS, MIN_SLOTS, PROTOCOL_VERSION};
pub use region::{RegionError, SharedLayout, SharedRegion};
pub use rendezvous::RendezvousBlock;
