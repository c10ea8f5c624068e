//! Layout constants shared by both ends of a connection.
//!
//! Both control blocks are plain arrays of atomics so that they can be
//! projected onto a shared-memory mapping on either side. Sizes are pinned by
//! tests so an accidental field addition shows up as a wire break instead of
//! silent corruption.

/// `b"FLNK"` as a little-endian `u32`, stored at the head of the rendezvous
/// block. Rejects mappings that belong to some other subsystem.
pub const LINK_MAGIC: u32 = 0x4B4E_4C46;

/// Shared-memory ABI version. Compared for exact equality during the
/// handshake; there is no negotiation across versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Capacity of the per-slot arrays in the connection block.
///
/// The actual pipeline depth is a runtime parameter in
/// `[MIN_SLOTS, MAX_SLOTS]` carried in the block; sizing the arrays to the
/// maximum keeps the layout fixed regardless of the negotiated depth.
pub const MAX_SLOTS: usize = 8;

/// Smallest usable pipeline depth. One slot is always in flight as the
/// active write target, so anything below two could never hand a frame over.
pub const MIN_SLOTS: usize = 2;

/// Default pipeline depth for producers that do not pick one.
pub const DEFAULT_SLOTS: usize = 3;
