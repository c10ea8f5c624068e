//! Per-connection control block: liveness, negotiated parameters, and the
//! slot-ring state.
//!
//! Field ownership (the single-writer convention):
//! - `producer_*` fields, `slot_count`, and everything published at slot
//!   allocation time are written by the producer only;
//! - `consumer_*` fields and the read-fence values are written by the
//!   consumer only;
//! - `pending_writes` is decremented by the producer and incremented by the
//!   consumer; `pending_reads` the other way around. Together they form a
//!   bounded two-party handoff pair over the negotiated slot count;
//! - a slot's `invalidated` flag is set by the producer when it republishes
//!   handles and cleared by the consumer after reopening them. The two sides
//!   never touch it concurrently: the flag only changes while its slot is on
//!   the writer's side of the ring.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::kinds::{ChannelInterp, ConsumerStop, ProducerStop, SyncFamily, UsageFlags};
use crate::layout::MAX_SLOTS;

/// Declared size of the block in bytes, pinned by a test below.
pub const CONNECTION_BLOCK_BYTES: usize = 56 + MAX_SLOTS * SLOT_RECORD_BYTES;

/// Declared size of one slot record in bytes.
pub const SLOT_RECORD_BYTES: usize = 48;

/// Shared projection of one pipeline slot.
#[repr(C)]
pub struct SlotRecord {
    /// Exported resource handle (producer-written).
    resource_handle: AtomicU64,
    /// Exported write-fence handle, zero when the negotiated mode exports
    /// none (producer-written).
    write_fence_handle: AtomicU64,
    /// Exported read-fence handle, zero when the negotiated mode exports
    /// none (producer-written).
    read_fence_handle: AtomicU64,
    /// Last write-fence value the producer signaled for this slot.
    write_fence_value: AtomicU64,
    /// Last read-fence value the consumer signaled for this slot.
    read_fence_value: AtomicU64,
    /// Nonzero after the producer republishes this slot's handles; the
    /// consumer clears it once it has reopened them.
    invalidated: AtomicU32,
    _pad: AtomicU32,
}

/// Exported handle triple published per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotHandleSet {
    pub resource: u64,
    pub write_fence: u64,
    pub read_fence: u64,
}

impl SlotRecord {
    fn reset(&self) {
        self.resource_handle.store(0, Ordering::Relaxed);
        self.write_fence_handle.store(0, Ordering::Relaxed);
        self.read_fence_handle.store(0, Ordering::Relaxed);
        self.write_fence_value.store(0, Ordering::Relaxed);
        self.read_fence_value.store(0, Ordering::Relaxed);
        self.invalidated.store(0, Ordering::Relaxed);
    }

    /// Producer: publish freshly exported handles and flag the slot for the
    /// consumer to reopen. Fence values restart at zero with the new
    /// primitives.
    pub fn publish_allocation(&self, handles: SlotHandleSet) {
        self.resource_handle.store(handles.resource, Ordering::Relaxed);
        self.write_fence_handle
            .store(handles.write_fence, Ordering::Relaxed);
        self.read_fence_handle
            .store(handles.read_fence, Ordering::Relaxed);
        self.write_fence_value.store(0, Ordering::Relaxed);
        self.read_fence_value.store(0, Ordering::Relaxed);
        self.invalidated.store(1, Ordering::Release);
    }

    pub fn handles(&self) -> SlotHandleSet {
        SlotHandleSet {
            resource: self.resource_handle.load(Ordering::Relaxed),
            write_fence: self.write_fence_handle.load(Ordering::Relaxed),
            read_fence: self.read_fence_handle.load(Ordering::Relaxed),
        }
    }

    pub fn invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire) != 0
    }

    /// Consumer: acknowledge the reopen so the flag is observed exactly once
    /// per republication.
    pub fn clear_invalidated(&self) {
        self.invalidated.store(0, Ordering::Release);
    }

    pub fn write_fence_value(&self) -> u64 {
        self.write_fence_value.load(Ordering::Acquire)
    }

    /// Producer: publish the value just signaled on the write fence.
    pub fn publish_write_fence_value(&self, value: u64) {
        self.write_fence_value.store(value, Ordering::Release);
    }

    pub fn read_fence_value(&self) -> u64 {
        self.read_fence_value.load(Ordering::Acquire)
    }

    /// Consumer: publish the value just signaled on the read fence.
    pub fn publish_read_fence_value(&self, value: u64) {
        self.read_fence_value.store(value, Ordering::Release);
    }
}

/// Parameters the consumer stamps during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub usage: UsageFlags,
    pub channel: ChannelInterp,
    pub consumer_family: SyncFamily,
}

#[repr(C)]
pub struct ConnectionBlock {
    /// Monotonic timestamp the producer re-stamps every tick.
    producer_keepalive: AtomicI64,
    /// Monotonic timestamp the consumer re-stamps every tick.
    consumer_keepalive: AtomicI64,
    /// [`ProducerStop`] wire code, producer-written.
    producer_stop: AtomicU32,
    /// [`ConsumerStop`] wire code, consumer-written.
    consumer_stop: AtomicU32,
    /// Set by the producer once it has observed the consumer's parameters;
    /// marks the handshake complete.
    producer_ready: AtomicU32,
    /// Set by the consumer once the `consumer_*` parameter fields below are
    /// valid.
    consumer_params_set: AtomicU32,
    /// [`UsageFlags`] bits, consumer-written during the handshake.
    consumer_usage: AtomicU32,
    /// [`ChannelInterp`] wire value, consumer-written during the handshake.
    consumer_channel: AtomicU32,
    /// [`SyncFamily`] wire value, consumer-written during the handshake.
    consumer_family: AtomicU32,
    /// Pipeline depth for this connection, producer-written before the
    /// connect token is published.
    slot_count: AtomicU32,
    /// Slots available for the producer to fill.
    pending_writes: AtomicU32,
    /// Slots ready for the consumer to read.
    pending_reads: AtomicU32,
    slots: [SlotRecord; MAX_SLOTS],
}

impl ConnectionBlock {
    /// Producer-side reset when (re)opening a connection. One slot is always
    /// in flight as the active write target, hence `slot_count - 1`.
    pub fn reset_for_open(&self, slot_count: usize, now: i64) {
        debug_assert!((crate::layout::MIN_SLOTS..=MAX_SLOTS).contains(&slot_count));
        for slot in &self.slots {
            slot.reset();
        }
        self.producer_stop.store(0, Ordering::Relaxed);
        self.consumer_stop.store(0, Ordering::Relaxed);
        self.producer_ready.store(0, Ordering::Relaxed);
        self.consumer_params_set.store(0, Ordering::Relaxed);
        self.consumer_usage.store(0, Ordering::Relaxed);
        self.consumer_channel.store(0, Ordering::Relaxed);
        self.consumer_family.store(0, Ordering::Relaxed);
        self.slot_count.store(slot_count as u32, Ordering::Relaxed);
        self.pending_writes
            .store(slot_count as u32 - 1, Ordering::Relaxed);
        self.pending_reads.store(0, Ordering::Relaxed);
        self.consumer_keepalive.store(now, Ordering::Relaxed);
        self.producer_keepalive.store(now, Ordering::Release);
    }

    pub fn slot(&self, index: usize) -> &SlotRecord {
        &self.slots[index]
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count.load(Ordering::Acquire) as usize
    }

    pub fn stamp_producer_keepalive(&self, now: i64) {
        self.producer_keepalive.store(now, Ordering::Release);
    }

    pub fn stamp_consumer_keepalive(&self, now: i64) {
        self.consumer_keepalive.store(now, Ordering::Release);
    }

    pub fn producer_keepalive(&self) -> i64 {
        self.producer_keepalive.load(Ordering::Acquire)
    }

    pub fn consumer_keepalive(&self) -> i64 {
        self.consumer_keepalive.load(Ordering::Acquire)
    }

    pub fn publish_producer_stop(&self, reason: ProducerStop) {
        self.producer_stop.store(reason.to_u32(), Ordering::Release);
    }

    pub fn producer_stop(&self) -> ProducerStop {
        ProducerStop::from_u32(self.producer_stop.load(Ordering::Acquire))
    }

    pub fn publish_consumer_stop(&self, reason: ConsumerStop) {
        self.consumer_stop.store(reason.to_u32(), Ordering::Release);
    }

    pub fn consumer_stop(&self) -> ConsumerStop {
        ConsumerStop::from_u32(self.consumer_stop.load(Ordering::Acquire))
    }

    pub fn set_producer_ready(&self) {
        self.producer_ready.store(1, Ordering::Release);
    }

    pub fn producer_ready(&self) -> bool {
        self.producer_ready.load(Ordering::Acquire) != 0
    }

    /// Consumer: stamp negotiated parameters, then raise the flag that lets
    /// the producer act on them.
    pub fn set_consumer_params(&self, params: NegotiatedParams) {
        self.consumer_usage
            .store(params.usage.bits(), Ordering::Relaxed);
        self.consumer_channel
            .store(params.channel.to_u32(), Ordering::Relaxed);
        self.consumer_family
            .store(params.consumer_family.to_u32(), Ordering::Relaxed);
        self.consumer_params_set.store(1, Ordering::Release);
    }

    pub fn consumer_params_set(&self) -> bool {
        self.consumer_params_set.load(Ordering::Acquire) != 0
    }

    /// Decoded parameters, `None` until the consumer stamped them or if it
    /// stamped values this build does not understand.
    pub fn consumer_params(&self) -> Option<NegotiatedParams> {
        if !self.consumer_params_set() {
            return None;
        }
        Some(NegotiatedParams {
            usage: UsageFlags::from_bits_truncate(self.consumer_usage.load(Ordering::Relaxed)),
            channel: ChannelInterp::from_u32(self.consumer_channel.load(Ordering::Relaxed))?,
            consumer_family: SyncFamily::from_u32(self.consumer_family.load(Ordering::Relaxed))?,
        })
    }

    pub fn pending_writes(&self) -> u32 {
        self.pending_writes.load(Ordering::Acquire)
    }

    pub fn pending_reads(&self) -> u32 {
        self.pending_reads.load(Ordering::Acquire)
    }

    /// Producer: claim one writable slot. Only the producer decrements this
    /// counter, so a positive load cannot be invalidated by the peer.
    pub fn try_take_pending_write(&self) -> bool {
        if self.pending_writes.load(Ordering::Acquire) == 0 {
            return false;
        }
        self.pending_writes.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Consumer: claim one readable slot; same single-decrementer argument
    /// as [`try_take_pending_write`](Self::try_take_pending_write).
    pub fn try_take_pending_read(&self) -> bool {
        if self.pending_reads.load(Ordering::Acquire) == 0 {
            return false;
        }
        self.pending_reads.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Producer: hand a freshly written slot to the consumer.
    pub fn add_pending_read(&self) {
        self.pending_reads.fetch_add(1, Ordering::AcqRel);
    }

    /// Consumer: return a consumed slot to the producer's pool.
    pub fn add_pending_write(&self) {
        self.pending_writes.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn boxed_block() -> Box<ConnectionBlock> {
        // Zeroed memory is the well-defined initial state for a block made
        // entirely of atomics; shared mappings start out the same way.
        unsafe { Box::new(core::mem::zeroed()) }
    }

    #[test]
    fn block_matches_declared_byte_len() {
        assert_eq!(
            core::mem::size_of::<ConnectionBlock>(),
            CONNECTION_BLOCK_BYTES
        );
        assert_eq!(core::mem::size_of::<SlotRecord>(), SLOT_RECORD_BYTES);
    }

    #[test]
    fn reset_seeds_the_handoff_counters() {
        let block = boxed_block();
        block.reset_for_open(4, 1234);

        assert_eq!(block.slot_count(), 4);
        assert_eq!(block.pending_writes(), 3);
        assert_eq!(block.pending_reads(), 0);
        assert_eq!(block.producer_keepalive(), 1234);
        assert_eq!(block.producer_stop(), ProducerStop::None);
        assert!(!block.producer_ready());
        assert!(block.consumer_params().is_none());
    }

    #[test]
    fn invalidated_is_observed_exactly_once() {
        let block = boxed_block();
        block.reset_for_open(2, 0);

        let slot = block.slot(0);
        assert!(!slot.invalidated());

        slot.publish_allocation(SlotHandleSet {
            resource: 7,
            write_fence: 8,
            read_fence: 9,
        });
        assert!(slot.invalidated());
        assert_eq!(slot.handles().resource, 7);
        assert_eq!(slot.write_fence_value(), 0);

        slot.clear_invalidated();
        assert!(!slot.invalidated());
        // Unchanged handles must not re-trigger a reopen.
        assert!(!slot.invalidated());
    }

    /// Drives the counter pair the way the two sessions do and checks the
    /// ring invariant from an observer thread: the sum never exceeds
    /// `N - 1`, dips below it only while a handoff is mid-flight (one dip
    /// per side), and neither counter ever underflows.
    #[test]
    fn handoff_counters_hold_the_ring_invariant() {
        const DEPTH: u32 = 4;
        const FRAMES: u32 = 20_000;

        let block: Arc<ConnectionBlock> = Arc::from(boxed_block());
        block.reset_for_open(DEPTH as usize, 0);

        let start = Arc::new(Barrier::new(3));
        let done = Arc::new(AtomicBool::new(false));

        let producer_block = block.clone();
        let producer_start = start.clone();
        let producer = thread::spawn(move || {
            producer_start.wait();
            let mut published = 0;
            while published < FRAMES {
                if producer_block.try_take_pending_write() {
                    producer_block.add_pending_read();
                    published += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let consumer_block = block.clone();
        let consumer_start = start.clone();
        let consumer = thread::spawn(move || {
            consumer_start.wait();
            let mut consumed = 0;
            while consumed < FRAMES {
                if consumer_block.try_take_pending_read() {
                    consumer_block.add_pending_write();
                    consumed += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let observer_block = block.clone();
        let observer_start = start.clone();
        let observer_done = done.clone();
        let observer = thread::spawn(move || {
            observer_start.wait();
            while !observer_done.load(Ordering::SeqCst) {
                let writes = observer_block.pending_writes();
                let reads = observer_block.pending_reads();
                assert!(writes <= DEPTH - 1, "pending_writes overflow: {writes}");
                assert!(reads <= DEPTH - 1, "pending_reads overflow: {reads}");
                let sum = writes + reads;
                assert!(sum <= DEPTH - 1, "counter sum overshot: {sum}");
                assert!(sum + 2 >= DEPTH - 1, "counter sum undershot: {sum}");
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
        done.store(true, Ordering::SeqCst);
        observer.join().unwrap();

        assert_eq!(block.pending_writes() + block.pending_reads(), DEPTH - 1);
    }
}
