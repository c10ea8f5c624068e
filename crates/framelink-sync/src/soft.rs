//! Software reference driver backed by shared memory.
//!
//! Every slot is one named mapping: a small header holding the baton word
//! and the two fence counters, followed by the surface bytes. The baton and
//! fence semantics match what the hardware drivers provide (keyed handoff,
//! monotonic signal/wait), so the protocol engine exercises the exact same
//! sequences here as on a real device. Used by the test suites and by
//! headless hosts; it is also the only driver that works on every platform.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shared_memory::{Shmem, ShmemConf};

use framelink_shared::SyncFamily;

use crate::{
    BatonError, BatonKey, CreatedSlot, DriverError, ExchangeMode, FenceError, FrameDriver,
    OpenedSlot, OwnershipBaton, SlotHandleSet, SurfaceDesc, SyncFence, WorkQueue,
};

/// Baton word value while some side holds ownership. Any other value is the
/// key the baton was last released under.
const BATON_HELD: u32 = u32::MAX;

const HEADER_BYTES: usize = core::mem::size_of::<SlotHeader>();

#[repr(C)]
struct SlotHeader {
    baton: AtomicU32,
    _pad: AtomicU32,
    write_fence: AtomicU64,
    read_fence: AtomicU64,
}

struct SlotSegment {
    shm: Shmem,
}

// Accessed only through the header atomics plus raw byte copies the
// protocol has already serialized via those atomics.
unsafe impl Send for SlotSegment {}
unsafe impl Sync for SlotSegment {}

impl SlotSegment {
    fn header(&self) -> &SlotHeader {
        unsafe { &*(self.shm.as_ptr() as *const SlotHeader) }
    }

    fn payload_len(&self) -> usize {
        self.shm.len().saturating_sub(HEADER_BYTES)
    }
}

fn slot_segment_name(process_id: u32, token: u64) -> String {
    format!("flnk.soft.{process_id}.{token:x}")
}

fn mint_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Surface bytes of one slot, shared between the two processes.
pub struct SoftResource {
    segment: Arc<SlotSegment>,
}

impl SoftResource {
    pub fn byte_len(&self) -> usize {
        self.segment.payload_len()
    }

    /// Copy `data` into the surface at `offset`. The caller owns the slot
    /// (per the protocol's baton/fence handoff) while calling this.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.byte_len());
        unsafe {
            let dst = self.segment.shm.as_ptr().add(HEADER_BYTES + offset);
            core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }

    /// Copy surface bytes at `offset` into `out`. Same ownership contract
    /// as [`write_bytes`](Self::write_bytes).
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.byte_len());
        unsafe {
            let src = self.segment.shm.as_ptr().add(HEADER_BYTES + offset);
            core::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }
    }
}

pub struct SoftBaton {
    segment: Arc<SlotSegment>,
}

impl OwnershipBaton for SoftBaton {
    fn acquire(&self, key: BatonKey) -> Result<(), BatonError> {
        self.segment
            .header()
            .baton
            .compare_exchange(key.raw(), BATON_HELD, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| BatonError::NotAvailable { key })
    }

    fn release(&self, key: BatonKey) -> Result<(), BatonError> {
        self.segment
            .header()
            .baton
            .compare_exchange(BATON_HELD, key.raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| BatonError::Driver("baton released while not held".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceKind {
    Write,
    Read,
}

pub struct SoftFence {
    segment: Arc<SlotSegment>,
    kind: FenceKind,
}

impl SoftFence {
    fn cell(&self) -> &AtomicU64 {
        match self.kind {
            FenceKind::Write => &self.segment.header().write_fence,
            FenceKind::Read => &self.segment.header().read_fence,
        }
    }
}

impl SyncFence for SoftFence {
    fn completed_value(&self) -> u64 {
        self.cell().load(Ordering::Acquire)
    }

    fn wait_blocking(&self, value: u64) -> Result<(), FenceError> {
        let mut spins = 0u32;
        while self.completed_value() < value {
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(50));
            }
        }
        Ok(())
    }
}

/// Immediate work queue: there is no device timeline behind it, so queued
/// waits block the caller and queued signals complete at once.
pub struct SoftQueue;

impl WorkQueue for SoftQueue {
    type Fence = SoftFence;

    fn wait(&self, fence: &SoftFence, value: u64) -> Result<(), FenceError> {
        fence.wait_blocking(value)
    }

    fn signal(&self, fence: &SoftFence, value: u64) -> Result<(), FenceError> {
        fence.cell().fetch_max(value, Ordering::AcqRel);
        Ok(())
    }
}

pub struct SoftPeer {
    process_id: u32,
}

pub struct SoftDriver {
    process_id: u32,
    family: SyncFamily,
}

impl SoftDriver {
    pub fn new(family: SyncFamily) -> Self {
        Self {
            process_id: std::process::id(),
            family,
        }
    }
}

impl FrameDriver for SoftDriver {
    type Resource = SoftResource;
    type Baton = SoftBaton;
    type Fence = SoftFence;
    type Queue = SoftQueue;
    type Peer = SoftPeer;

    fn family(&self) -> SyncFamily {
        self.family
    }

    fn create_slot(
        &self,
        desc: &SurfaceDesc,
        mode: ExchangeMode,
    ) -> Result<CreatedSlot<Self>, DriverError> {
        let token = mint_token();
        let name = slot_segment_name(self.process_id, token);
        let shm = ShmemConf::new()
            .os_id(&name)
            .size(HEADER_BYTES + desc.byte_len().max(1))
            .create()
            .map_err(|e| DriverError::CreateResource(format!("{name}: {e}")))?;
        // Fresh mappings are zero-filled: the baton starts released under
        // `Initial` and both fences at zero, which is exactly the state the
        // protocol expects before the initial handoff.
        let segment = Arc::new(SlotSegment { shm });

        let fence_handle = if mode.exports_fences() { token } else { 0 };
        Ok(CreatedSlot {
            resource: SoftResource {
                segment: segment.clone(),
            },
            baton: mode.has_baton().then(|| SoftBaton {
                segment: segment.clone(),
            }),
            write_fence: mode.has_write_fence().then(|| SoftFence {
                segment: segment.clone(),
                kind: FenceKind::Write,
            }),
            read_fence: mode.has_read_fence().then(|| SoftFence {
                segment: segment.clone(),
                kind: FenceKind::Read,
            }),
            handles: SlotHandleSet {
                resource: token,
                write_fence: fence_handle,
                read_fence: fence_handle,
            },
        })
    }

    fn connect_peer(&self, process_id: u32) -> Result<SoftPeer, DriverError> {
        Ok(SoftPeer { process_id })
    }

    fn open_slot(
        &self,
        peer: &SoftPeer,
        handles: SlotHandleSet,
        mode: ExchangeMode,
    ) -> Result<OpenedSlot<Self>, DriverError> {
        let name = slot_segment_name(peer.process_id, handles.resource);
        let shm = ShmemConf::new()
            .os_id(&name)
            .open()
            .map_err(|e| DriverError::OpenResource(format!("{name}: {e}")))?;
        if shm.len() < HEADER_BYTES {
            return Err(DriverError::OpenResource(format!(
                "{name}: mapping smaller than slot header"
            )));
        }
        let segment = Arc::new(SlotSegment { shm });

        // Only this side's native primitives are opened; the bridged side
        // belongs to the producer.
        let (baton, write_fence, read_fence) = match self.family {
            SyncFamily::Baton => (
                Some(SoftBaton {
                    segment: segment.clone(),
                }),
                None,
                None,
            ),
            SyncFamily::Fence => {
                if handles.write_fence == 0 {
                    return Err(DriverError::OpenWriteFence(format!(
                        "{name}: no write fence exported for mode {mode:?}"
                    )));
                }
                if handles.read_fence == 0 {
                    return Err(DriverError::OpenReadFence(format!(
                        "{name}: no read fence exported for mode {mode:?}"
                    )));
                }
                (
                    None,
                    Some(SoftFence {
                        segment: segment.clone(),
                        kind: FenceKind::Write,
                    }),
                    Some(SoftFence {
                        segment: segment.clone(),
                        kind: FenceKind::Read,
                    }),
                )
            }
        };

        Ok(OpenedSlot {
            resource: SoftResource { segment },
            baton,
            write_fence,
            read_fence,
        })
    }
}
