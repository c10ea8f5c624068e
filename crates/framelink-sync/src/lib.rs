//! GPU-side synchronization bridge for the framelink protocol.
//!
//! The exchange protocol needs two primitive styles: an ownership baton
//! (mutual exclusion handed between exactly two parties via key values) and
//! a monotonic fence (signal / wait-until counter). Real graphics APIs speak
//! one family natively; when the two processes speak different families the
//! producer bridges between them. This crate defines the capability traits
//! the protocol engine is written against, the negotiation of the exchange
//! mode, and a software reference driver backed by shared memory that the
//! test suites (and headless hosts) run on.

pub mod soft;

use thiserror::Error;

use framelink_shared::{ChannelInterp, SurfaceFormat, SyncFamily, UsageFlags};

/// Key values for the ownership baton. Ownership strictly alternates
/// producer → consumer → producer…; `Initial` is used exactly once at slot
/// creation to hand the first ownership to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BatonKey {
    Initial = 0,
    Producer = 1,
    Consumer = 2,
}

impl BatonKey {
    pub fn raw(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Error)]
pub enum BatonError {
    /// The baton is not currently released under the requested key. The
    /// protocol guarantees it should be, so this is a fatal connection
    /// fault, not a retry condition.
    #[error("ownership baton not available for key {key:?}")]
    NotAvailable { key: BatonKey },
    /// The peer died while holding the baton.
    #[error("ownership baton abandoned by peer")]
    Abandoned,
    #[error("baton driver failure: {0}")]
    Driver(String),
}

#[derive(Debug, Error)]
pub enum FenceError {
    #[error("fence driver failure: {0}")]
    Driver(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to create slot resource: {0}")]
    CreateResource(String),
    #[error("failed to export shareable handle: {0}")]
    ExportHandle(String),
    #[error("failed to open shared resource: {0}")]
    OpenResource(String),
    #[error("failed to open shared write fence: {0}")]
    OpenWriteFence(String),
    #[error("failed to open shared read fence: {0}")]
    OpenReadFence(String),
    #[error("failed to attach to peer process {pid}: {detail}")]
    ConnectPeer { pid: u32, detail: String },
    /// The driver cannot create the interop views a cross-family exchange
    /// needs (e.g. the bridging device is unavailable).
    #[error("cross-family bridging is not supported by this driver")]
    BridgeUnsupported,
}

/// Mutual-exclusion handoff over a slot's resource.
pub trait OwnershipBaton {
    /// Take ownership, provided the baton was last released under `key`.
    /// The underlying primitive is polled, not waited on: by protocol the
    /// baton must already be in the expected state when this is called.
    fn acquire(&self, key: BatonKey) -> Result<(), BatonError>;

    /// Release ownership under `key`, making the baton acquirable by
    /// whichever side acquires with the same key.
    fn release(&self, key: BatonKey) -> Result<(), BatonError>;
}

/// Monotonically increasing fence.
pub trait SyncFence {
    fn completed_value(&self) -> u64;

    /// Block the calling thread until the fence reaches `value`. Only used
    /// on teardown paths, where a slot cannot be released while a write or
    /// read against it is still in flight.
    fn wait_blocking(&self, value: u64) -> Result<(), FenceError>;
}

/// Work queue that orders fence waits/signals with the caller's GPU work.
pub trait WorkQueue {
    type Fence: SyncFence;

    /// Queue a wait: work submitted after this call must not start until
    /// the fence reaches `value`.
    fn wait(&self, fence: &Self::Fence, value: u64) -> Result<(), FenceError>;

    /// Queue a signal: the fence reaches `value` once previously submitted
    /// work completes.
    fn signal(&self, fence: &Self::Fence, value: u64) -> Result<(), FenceError>;
}

/// Surface description the producer allocates slots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
    pub channel: ChannelInterp,
    pub usage: UsageFlags,
}

impl SurfaceDesc {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Which primitives a connection uses, negotiated from the two sync
/// families at handshake time.
///
/// The consumer always drives its native family only; in the bridged modes
/// the producer performs the extra fence wait/signal (or bridged baton
/// traffic) that keeps the two domains consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Both sides baton-family: the slot carries a baton and nothing else.
    BatonOnly,
    /// Both sides fence-family: write and read fences, no baton.
    FenceOnly,
    /// Baton producer, fence consumer: baton plus exported write/read
    /// fences; the producer waits the read fence before taking the baton
    /// and signals the write fence after releasing it.
    BatonToFence,
    /// Fence producer, baton consumer: baton (through the producer's
    /// bridged view) plus a producer-local write fence kept for teardown
    /// ordering; no fence handles are exported.
    FenceToBaton,
}

impl ExchangeMode {
    pub fn negotiate(producer: SyncFamily, consumer: SyncFamily) -> Self {
        match (producer, consumer) {
            (SyncFamily::Baton, SyncFamily::Baton) => ExchangeMode::BatonOnly,
            (SyncFamily::Fence, SyncFamily::Fence) => ExchangeMode::FenceOnly,
            (SyncFamily::Baton, SyncFamily::Fence) => ExchangeMode::BatonToFence,
            (SyncFamily::Fence, SyncFamily::Baton) => ExchangeMode::FenceToBaton,
        }
    }

    /// A baton exists whenever either side is baton-family.
    pub fn has_baton(self) -> bool {
        !matches!(self, ExchangeMode::FenceOnly)
    }

    /// The producer maintains a write fence in every mode but pure baton.
    pub fn has_write_fence(self) -> bool {
        !matches!(self, ExchangeMode::BatonOnly)
    }

    /// A read fence exists only when the consumer is fence-family.
    pub fn has_read_fence(self) -> bool {
        matches!(self, ExchangeMode::FenceOnly | ExchangeMode::BatonToFence)
    }

    /// Fence handles are exported only when the consumer needs to open
    /// them; the `FenceToBaton` write fence stays producer-local.
    pub fn exports_fences(self) -> bool {
        self.has_read_fence()
    }
}

// The exported handle triple is the one the connection block publishes;
// a zero handle means "not exported in this mode".
pub use framelink_shared::SlotHandleSet;

/// Producer-side result of allocating one slot.
pub struct CreatedSlot<D: FrameDriver + ?Sized> {
    pub resource: D::Resource,
    pub baton: Option<D::Baton>,
    pub write_fence: Option<D::Fence>,
    pub read_fence: Option<D::Fence>,
    pub handles: SlotHandleSet,
}

/// Consumer-side result of opening a peer's exported slot.
pub struct OpenedSlot<D: FrameDriver + ?Sized> {
    pub resource: D::Resource,
    pub baton: Option<D::Baton>,
    pub write_fence: Option<D::Fence>,
    pub read_fence: Option<D::Fence>,
}

/// Per-graphics-API resource creation collaborator.
///
/// The protocol engine never creates or opens GPU objects itself; it asks
/// the driver for a slot's resource plus whichever primitives the
/// negotiated [`ExchangeMode`] requires, and for local views of a peer's
/// exported handles. Primitives the mode does not need are `None` on the
/// returned slot; the engine treats a missing required primitive as
/// [`DriverError::BridgeUnsupported`].
pub trait FrameDriver {
    type Resource;
    type Baton: OwnershipBaton;
    type Fence: SyncFence;
    type Queue: WorkQueue<Fence = Self::Fence>;
    /// Duplicated handle to the peer process, needed to duplicate
    /// cross-process resource handles on the consumer side.
    type Peer;

    /// Sync family this driver natively speaks.
    fn family(&self) -> SyncFamily;

    /// Producer: create one slot's resource and primitives and export
    /// cross-process handles for them.
    fn create_slot(
        &self,
        desc: &SurfaceDesc,
        mode: ExchangeMode,
    ) -> Result<CreatedSlot<Self>, DriverError>;

    /// Consumer: attach to the producer process so exported handles can be
    /// duplicated into this process.
    fn connect_peer(&self, process_id: u32) -> Result<Self::Peer, DriverError>;

    /// Consumer: open local views of a peer's exported slot. Only the
    /// primitives of the *driver's own* family are opened; the bridged side
    /// belongs to the producer.
    fn open_slot(
        &self,
        peer: &Self::Peer,
        handles: SlotHandleSet,
        mode: ExchangeMode,
    ) -> Result<OpenedSlot<Self>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_negotiation_matches_the_family_pairing() {
        use SyncFamily::{Baton, Fence};

        assert_eq!(ExchangeMode::negotiate(Baton, Baton), ExchangeMode::BatonOnly);
        assert_eq!(ExchangeMode::negotiate(Fence, Fence), ExchangeMode::FenceOnly);
        assert_eq!(
            ExchangeMode::negotiate(Baton, Fence),
            ExchangeMode::BatonToFence
        );
        assert_eq!(
            ExchangeMode::negotiate(Fence, Baton),
            ExchangeMode::FenceToBaton
        );
    }

    #[test]
    fn primitive_presence_per_mode() {
        let all = [
            ExchangeMode::BatonOnly,
            ExchangeMode::FenceOnly,
            ExchangeMode::BatonToFence,
            ExchangeMode::FenceToBaton,
        ];
        for mode in all {
            // A read fence never exists without a write fence.
            assert!(!mode.has_read_fence() || mode.has_write_fence());
        }
        assert!(ExchangeMode::BatonOnly.has_baton());
        assert!(!ExchangeMode::BatonOnly.has_write_fence());
        assert!(!ExchangeMode::FenceOnly.has_baton());
        assert!(ExchangeMode::FenceToBaton.has_write_fence());
        assert!(!ExchangeMode::FenceToBaton.exports_fences());
        assert!(ExchangeMode::BatonToFence.exports_fences());
    }
}
