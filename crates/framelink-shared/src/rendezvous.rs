//! Global rendezvous block advertising a producer session.
//!
//! One instance exists per producer process lifetime, under a name derived
//! from the producer's prefix and process id. The producer is the only
//! writer of every field except `connect_token`, which a connecting consumer
//! claims with a single compare-and-swap.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::kinds::SyncFamily;
use crate::layout::{LINK_MAGIC, PROTOCOL_VERSION};

/// Declared size of the block in `u32` words, pinned by a test below.
pub const RENDEZVOUS_BLOCK_U32_LEN: usize = 6;

#[repr(C)]
pub struct RendezvousBlock {
    /// [`LINK_MAGIC`]. Producer-written, never changes afterwards.
    magic: AtomicU32,
    /// [`PROTOCOL_VERSION`]. Compared for exact equality by consumers.
    version: AtomicU32,
    /// Sync family of the producer's graphics API ([`SyncFamily`] wire value).
    producer_family: AtomicU32,
    _pad: AtomicU32,
    /// Single-use connection token. Nonzero = a connection block is open and
    /// unclaimed; zero = claimed by a consumer (or none published yet).
    ///
    /// Producer publishes a fresh, strictly increasing value each time it
    /// opens a connection block; exactly one consumer wins the swap to zero.
    connect_token: AtomicU64,
}

impl RendezvousBlock {
    /// Producer-side initialization of a freshly created (or reclaimed
    /// stale) mapping. Resets the token so no consumer can claim a
    /// connection block that does not exist yet.
    pub fn init(&self, family: SyncFamily) {
        self.connect_token.store(0, Ordering::Relaxed);
        self.producer_family.store(family.to_u32(), Ordering::Relaxed);
        self.version.store(PROTOCOL_VERSION, Ordering::Relaxed);
        // Magic last: a consumer that sees the magic may trust the rest.
        self.magic.store(LINK_MAGIC, Ordering::Release);
    }

    pub fn magic_ok(&self) -> bool {
        self.magic.load(Ordering::Acquire) == LINK_MAGIC
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn producer_family(&self) -> Option<SyncFamily> {
        SyncFamily::from_u32(self.producer_family.load(Ordering::Acquire))
    }

    /// Publish a fresh token after the matching connection block is fully
    /// initialized. The release store is what makes the block contents
    /// visible to the consumer that wins the claim.
    pub fn publish_token(&self, token: u64) {
        debug_assert!(token != 0);
        self.connect_token.store(token, Ordering::Release);
    }

    pub fn peek_token(&self) -> u64 {
        self.connect_token.load(Ordering::Acquire)
    }

    /// Claim `observed` (a nonzero token previously read with
    /// [`peek_token`](Self::peek_token)) by swapping it down to zero.
    /// Returns `false` if another consumer won the race or the producer
    /// already moved on.
    pub fn claim_token(&self, observed: u64) -> bool {
        observed != 0
            && self
                .connect_token
                .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Used by tests that need to corrupt the advertised version.
    pub fn force_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }
}
