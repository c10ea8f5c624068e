//! The N-deep slot ring.
//!
//! Each side keeps a local shadow of the slots (opened resources and
//! primitives, rotation cursor, pending-reallocation flags); the shared
//! projection of a slot lives in the connection block's per-slot records.
//! Rotation reuses the same physical slots cyclically, bounding resource
//! count to the pipeline depth no matter how many frames flow through.

use framelink_shared::{ConnectionBlock, ConsumerStop, ProducerStop, SlotHandleSet};
use framelink_sync::{
    BatonKey, DriverError, ExchangeMode, FrameDriver, OwnershipBaton, SurfaceDesc, SyncFence,
};

use crate::diag::{DiagId, Diagnostics};
use crate::hooks::SlotHooks;

/// Snapshot of the shared handoff counters, exposed for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCounters {
    /// Slots available for the producer to fill.
    pub pending_writes: u32,
    /// Slots ready for the consumer to read.
    pub pending_reads: u32,
}

fn producer_stop_for_driver(err: &DriverError) -> ProducerStop {
    match err {
        DriverError::ExportHandle(_) => ProducerStop::ExportHandle,
        DriverError::BridgeUnsupported => ProducerStop::MissingBridgeSupport,
        _ => ProducerStop::CreateResource,
    }
}

fn consumer_stop_for_driver(err: &DriverError) -> ConsumerStop {
    match err {
        DriverError::OpenWriteFence(_) => ConsumerStop::OpenWriteFence,
        DriverError::OpenReadFence(_) => ConsumerStop::OpenReadFence,
        DriverError::ConnectPeer { .. } => ConsumerStop::DuplicatePeerHandle,
        _ => ConsumerStop::OpenResource,
    }
}

pub(crate) struct ProducerSlot<D: FrameDriver> {
    pub resource: Option<D::Resource>,
    pub baton: Option<D::Baton>,
    pub write_fence: Option<D::Fence>,
    pub read_fence: Option<D::Fence>,
    /// Set at open and by `resize`; cleared once the slot is (re)created.
    pub needs_realloc: bool,
}

impl<D: FrameDriver> ProducerSlot<D> {
    fn empty() -> Self {
        Self {
            resource: None,
            baton: None,
            write_fence: None,
            read_fence: None,
            needs_realloc: true,
        }
    }
}

pub(crate) struct ProducerRing<D: FrameDriver> {
    slots: Vec<ProducerSlot<D>>,
    cursor: usize,
}

impl<D: FrameDriver> ProducerRing<D> {
    pub fn new(depth: usize) -> Self {
        Self {
            slots: (0..depth).map(|_| ProducerSlot::empty()).collect(),
            cursor: depth - 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn next_index(&self) -> usize {
        (self.cursor + 1) % self.depth()
    }

    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = index;
    }

    pub fn slot(&self, index: usize) -> &ProducerSlot<D> {
        &self.slots[index]
    }

    pub fn mark_all_for_realloc(&mut self) {
        for slot in &mut self.slots {
            slot.needs_realloc = true;
        }
    }

    /// Lazily (re)create the slot's resource and primitives if it was never
    /// allocated or is flagged for resize. Publishes the exported handles
    /// and zeroed fence values, flags the slot invalidated for the consumer,
    /// and releases the prior resource only after the bridge confirms no
    /// outstanding write against it remains.
    pub fn ensure_allocated(
        &mut self,
        index: usize,
        driver: &D,
        desc: &SurfaceDesc,
        mode: ExchangeMode,
        block: &ConnectionBlock,
        hooks: &mut SlotHooks<D::Resource>,
        diag: &Diagnostics,
    ) -> Result<(), ProducerStop> {
        if !self.slots[index].needs_realloc {
            return Ok(());
        }

        diag.emit(
            DiagId::SlotCreateAttempt,
            format_args!("creating slot resources, index {index}"),
        );

        let created = driver
            .create_slot(desc, mode)
            .map_err(|e| producer_stop_for_driver(&e))?;
        if (mode.has_baton() && created.baton.is_none())
            || (mode.has_write_fence() && created.write_fence.is_none())
            || (mode.has_read_fence() && created.read_fence.is_none())
        {
            return Err(ProducerStop::MissingBridgeSupport);
        }

        // Hand first ownership to the producer.
        if let Some(baton) = &created.baton {
            baton
                .acquire(BatonKey::Initial)
                .map_err(|_| ProducerStop::AcquireBatonInit)?;
            baton
                .release(BatonKey::Producer)
                .map_err(|_| ProducerStop::ReleaseBatonInit)?;
        }

        let slot = &mut self.slots[index];
        if slot.resource.is_some() {
            // A fence-family producer must not free a resource the device
            // may still be writing; drain to the last published value.
            if let Some(write_fence) = &slot.write_fence {
                let published = block.slot(index).write_fence_value();
                if write_fence.completed_value() < published {
                    write_fence
                        .wait_blocking(published)
                        .map_err(|_| ProducerStop::QueueWait)?;
                }
            }
            hooks.destroy(index);
        }

        slot.baton = created.baton;
        slot.write_fence = created.write_fence;
        slot.read_fence = created.read_fence;
        slot.needs_realloc = false;

        block.slot(index).publish_allocation(SlotHandleSet {
            resource: created.handles.resource,
            write_fence: created.handles.write_fence,
            read_fence: created.handles.read_fence,
        });

        if !hooks.create(index, &created.resource) {
            slot.resource = None;
            diag.emit(
                DiagId::SlotCreateHookFailed,
                format_args!("host create callback failed, index {index}"),
            );
            return Err(ProducerStop::CreateHook);
        }
        slot.resource = Some(created.resource);

        diag.emit(
            DiagId::SlotCreateSuccess,
            format_args!("created slot resources, index {index}"),
        );
        Ok(())
    }

    /// Release every slot at teardown. `on_destroy` first, resources after.
    pub fn release_all(&mut self, hooks: &mut SlotHooks<D::Resource>) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.resource.is_some() {
                hooks.destroy(index);
            }
            slot.resource = None;
            slot.baton = None;
            slot.write_fence = None;
            slot.read_fence = None;
        }
    }
}

pub(crate) struct ConsumerSlot<D: FrameDriver> {
    pub resource: Option<D::Resource>,
    pub baton: Option<D::Baton>,
    pub write_fence: Option<D::Fence>,
    pub read_fence: Option<D::Fence>,
    /// Highest write-fence value this side has already queued a wait for;
    /// lets a fence-family consumer skip redundant waits.
    pub write_fence_cleared: u64,
}

impl<D: FrameDriver> ConsumerSlot<D> {
    fn empty() -> Self {
        Self {
            resource: None,
            baton: None,
            write_fence: None,
            read_fence: None,
            write_fence_cleared: 0,
        }
    }
}

pub(crate) struct ConsumerRing<D: FrameDriver> {
    slots: Vec<ConsumerSlot<D>>,
    cursor: usize,
}

impl<D: FrameDriver> ConsumerRing<D> {
    pub fn new(depth: usize) -> Self {
        Self {
            slots: (0..depth).map(|_| ConsumerSlot::empty()).collect(),
            cursor: depth - 1,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn advance(&mut self) -> usize {
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.cursor
    }

    pub fn slot(&self, index: usize) -> &ConsumerSlot<D> {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut ConsumerSlot<D> {
        &mut self.slots[index]
    }

    /// If the producer republished this slot's handles, open them locally:
    /// duplicate through the peer handle, open each export, run the host
    /// `on_create` callback, then clear the shared flag so the reopen
    /// happens exactly once per republication. Returns whether a reopen
    /// happened.
    pub fn open_if_invalidated(
        &mut self,
        index: usize,
        driver: &D,
        peer: &D::Peer,
        mode: ExchangeMode,
        block: &ConnectionBlock,
        hooks: &mut SlotHooks<D::Resource>,
        diag: &Diagnostics,
    ) -> Result<bool, ConsumerStop> {
        let record = block.slot(index);
        if !record.invalidated() {
            return Ok(false);
        }

        diag.emit(
            DiagId::SlotOpenAttempt,
            format_args!("opening slot resources, index {index}"),
        );

        let opened = driver
            .open_slot(peer, record.handles(), mode)
            .map_err(|e| consumer_stop_for_driver(&e))?;

        let slot = &mut self.slots[index];
        if slot.resource.is_some() {
            // Do not free a view the device may still be reading from.
            if let Some(read_fence) = &slot.read_fence {
                read_fence
                    .wait_blocking(record.read_fence_value())
                    .map_err(|_| ConsumerStop::QueueWait)?;
            }
            hooks.destroy(index);
        }

        slot.baton = opened.baton;
        slot.write_fence = opened.write_fence;
        slot.read_fence = opened.read_fence;
        slot.write_fence_cleared = 0;

        record.clear_invalidated();

        if !hooks.create(index, &opened.resource) {
            slot.resource = None;
            diag.emit(
                DiagId::SlotOpenHookFailed,
                format_args!("host create callback failed, index {index}"),
            );
            return Err(ConsumerStop::CreateHook);
        }
        slot.resource = Some(opened.resource);

        diag.emit(
            DiagId::SlotOpenSuccess,
            format_args!("opened slot resources, index {index}"),
        );
        Ok(true)
    }

    pub fn release_all(&mut self, hooks: &mut SlotHooks<D::Resource>) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.resource.is_some() {
                hooks.destroy(index);
            }
            slot.resource = None;
            slot.baton = None;
            slot.write_fence = None;
            slot.read_fence = None;
        }
    }
}
