//! Producer session façade.
//!
//! The producer advertises continuously under a stable rendezvous name and
//! self-heals: any steady-state fault publishes a stop reason, tears the
//! connection down, and reopens a fresh connection block under the next
//! connect token, without the caller recreating the session. The caller
//! drives the session once per work cycle: `tick`, then (when a frame slot
//! came back) `wait_for_consumer_read` → render → `signal_write`.

use std::time::Duration;

use framelink_shared::{
    ConnectionBlock, ConsumerStop, ProducerStop, RendezvousBlock, SharedRegion, SurfaceFormat,
    DEFAULT_SLOTS, MAX_SLOTS, MIN_SLOTS, PROTOCOL_VERSION,
};
use framelink_sync::{
    BatonKey, ExchangeMode, FrameDriver, OwnershipBaton, SurfaceDesc, SyncFence, WorkQueue,
};

use crate::diag::{DiagId, Diagnostics};
use crate::error::{CreateError, ProducerFault};
use crate::hooks::SlotHooks;
use crate::naming::{connection_name, session_name, ObjectName};
use crate::ring::{ProducerRing, RingCounters};
use crate::ticks::{now_ticks, ticks_for};

/// Producer-owned surface geometry. Usage flags and channel interpretation
/// come from the consumer during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

pub struct ProducerConfig {
    /// Well-known prefix consumers look the session up under.
    pub prefix: String,
    /// Sandboxing-domain qualifier, resolved by the host.
    pub namespace: Option<String>,
    pub surface: SurfaceSpec,
    /// Pipeline depth, `MIN_SLOTS..=MAX_SLOTS`.
    pub slot_count: usize,
    /// Keepalive staleness threshold, also the handshake deadline.
    pub timeout: Duration,
}

impl ProducerConfig {
    pub fn new(prefix: impl Into<String>, surface: SurfaceSpec) -> Self {
        Self {
            prefix: prefix.into(),
            namespace: None,
            surface,
            slot_count: DEFAULT_SLOTS,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one producer tick. Never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerTick {
    /// A slot is ready for rendering; fetch its resource with
    /// [`ProducerSession::resource`].
    Frame { index: usize },
    /// No consumer attached (or the last connection open failed and will be
    /// retried next tick).
    NotConnected,
    /// A consumer claimed the connect token; waiting for its parameters.
    Handshaking,
    /// Every slot is either unread or in flight; rendering this cycle would
    /// overwrite an unread frame, so no slot is handed out.
    NoSlotAvailable,
    /// A fault was classified and the connection reopened. Transient: the
    /// session keeps advertising.
    Fault(ProducerStop),
}

struct Handshake {
    in_progress: bool,
    first_seen: i64,
}

struct Connection<D: FrameDriver> {
    region: SharedRegion<ConnectionBlock>,
    ring: ProducerRing<D>,
}

enum TickStep {
    Done(ProducerTick),
    Stop(ProducerStop),
}

pub struct ProducerSession<D: FrameDriver> {
    driver: D,
    hooks: SlotHooks<D::Resource>,
    diag: Diagnostics,
    surface: SurfaceSpec,
    slot_count: usize,
    timeout_ticks: i64,
    session: ObjectName,
    rendezvous: SharedRegion<RendezvousBlock>,
    next_token: u64,
    handshake: Handshake,
    conn: Option<Connection<D>>,
}

impl<D: FrameDriver> ProducerSession<D> {
    pub fn create(
        config: ProducerConfig,
        driver: D,
        hooks: SlotHooks<D::Resource>,
        diag: Diagnostics,
    ) -> Result<Self, CreateError> {
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&config.slot_count) {
            return Err(CreateError::InvalidDepth(config.slot_count));
        }

        diag.emit(
            DiagId::ProducerStarted,
            format_args!(
                "producer version {PROTOCOL_VERSION}, sync family {}",
                driver.family().name()
            ),
        );

        let session = session_name(
            &config.prefix,
            std::process::id(),
            config.namespace.as_deref(),
        )?;
        let rendezvous = SharedRegion::<RendezvousBlock>::create(session.as_str())?;
        rendezvous.get().init(driver.family());

        let mut this = Self {
            driver,
            hooks,
            diag,
            surface: config.surface,
            slot_count: config.slot_count,
            timeout_ticks: ticks_for(config.timeout),
            session,
            rendezvous,
            next_token: 1,
            handshake: Handshake {
                in_progress: false,
                first_seen: 0,
            },
            conn: None,
        };
        this.open_connection()?;
        Ok(this)
    }

    /// Non-blocking per-cycle entry point.
    pub fn tick(&mut self) -> ProducerTick {
        let now = now_ticks();

        if self.conn.is_none() {
            self.diag.emit(
                DiagId::RecoverFromOpenFailure,
                format_args!("retrying connection open"),
            );
            if self.open_connection().is_err() {
                return ProducerTick::NotConnected;
            }
        }

        let step = self.tick_inner(now);
        match step {
            TickStep::Done(tick) => tick,
            TickStep::Stop(reason) => {
                self.handshake.in_progress = false;
                self.reopen(reason);
                ProducerTick::Fault(reason)
            }
        }
    }

    /// Everything that runs against the live connection. Returns `Stop` for
    /// any fault so the caller can tear down and reopen without fighting
    /// the borrows held here.
    fn tick_inner(&mut self, now: i64) -> TickStep {
        let Some(conn) = self.conn.as_mut() else {
            return TickStep::Done(ProducerTick::NotConnected);
        };
        let Connection { region, ring } = conn;
        let block = region.get();

        block.stamp_producer_keepalive(now);

        if block.producer_ready() {
            let consumer_stop = block.consumer_stop();
            if consumer_stop != ConsumerStop::None {
                self.diag.emit(
                    DiagId::ConsumerRequestedStop,
                    format_args!("consumer requested stop: {}", consumer_stop.describe()),
                );
                return TickStep::Stop(ProducerStop::ConsumerRequested);
            }
            if now - block.consumer_keepalive() >= self.timeout_ticks {
                self.diag.emit(
                    DiagId::ConsumerTimedOut,
                    format_args!("consumer stopped responding"),
                );
                return TickStep::Stop(ProducerStop::ConsumerTimedOut);
            }
        } else if self.handshake.in_progress {
            if now - self.handshake.first_seen >= self.timeout_ticks {
                self.diag.emit(
                    DiagId::HandshakeTimedOut,
                    format_args!("consumer stopped responding during handshake"),
                );
                return TickStep::Stop(ProducerStop::ConsumerTimedOut);
            }
            if !block.consumer_params_set() {
                return TickStep::Done(ProducerTick::Handshaking);
            }
            if block.consumer_params().is_none() {
                // Flag raised but the values do not decode in this build.
                return TickStep::Stop(ProducerStop::BadParameters);
            }
            block.set_producer_ready();
            self.diag.emit(
                DiagId::HandshakeComplete,
                format_args!("handshake complete, connection established"),
            );
        } else if self.rendezvous.get().peek_token() == 0 {
            self.handshake.in_progress = true;
            self.handshake.first_seen = now;
            self.diag.emit(
                DiagId::TokenClaimed,
                format_args!("connect token claimed, handshake underway"),
            );
            return TickStep::Done(ProducerTick::Handshaking);
        } else {
            return TickStep::Done(ProducerTick::NotConnected);
        }

        // Connected: try to claim the next slot for rendering.
        let Some(params) = block.consumer_params() else {
            return TickStep::Stop(ProducerStop::BadParameters);
        };
        let mode = ExchangeMode::negotiate(self.driver.family(), params.consumer_family);

        if !block.try_take_pending_write() {
            return TickStep::Done(ProducerTick::NoSlotAvailable);
        }

        let index = ring.next_index();

        // Take the slot back from the consumer. Skipped when it never held
        // a resource: first ownership comes from the Initial handoff.
        if mode.has_baton() && ring.slot(index).resource.is_some() {
            let Some(baton) = ring.slot(index).baton.as_ref() else {
                return TickStep::Stop(ProducerStop::MissingBridgeSupport);
            };
            if baton.acquire(BatonKey::Consumer).is_err() {
                return TickStep::Stop(ProducerStop::AcquireBatonReclaim);
            }
            if baton.release(BatonKey::Producer).is_err() {
                return TickStep::Stop(ProducerStop::ReleaseBatonReclaim);
            }
        }

        ring.set_cursor(index);

        let desc = SurfaceDesc {
            width: self.surface.width,
            height: self.surface.height,
            format: self.surface.format,
            channel: params.channel,
            usage: params.usage,
        };
        if let Err(reason) = ring.ensure_allocated(
            index,
            &self.driver,
            &desc,
            mode,
            block,
            &mut self.hooks,
            &self.diag,
        ) {
            return TickStep::Stop(reason);
        }

        TickStep::Done(ProducerTick::Frame { index })
    }

    /// Block until the consumer's prior read of the current slot is known
    /// complete, then take write ownership. Call between a `Frame` tick and
    /// submitting render work.
    pub fn wait_for_consumer_read(&mut self, queue: &D::Queue) -> Result<(), ProducerFault> {
        let step: Result<(), ProducerStop> = (|| {
            let conn = self.conn.as_ref().ok_or(ProducerStop::None)?;
            let block = conn.region.get();
            let index = conn.ring.cursor();
            let slot = conn.ring.slot(index);
            let params = block
                .consumer_params()
                .ok_or(ProducerStop::BadParameters)?;
            let mode = ExchangeMode::negotiate(self.driver.family(), params.consumer_family);

            if mode.has_read_fence() {
                let fence = slot
                    .read_fence
                    .as_ref()
                    .ok_or(ProducerStop::MissingBridgeSupport)?;
                queue
                    .wait(fence, block.slot(index).read_fence_value())
                    .map_err(|_| ProducerStop::QueueWait)?;
            }
            if mode.has_baton() {
                let baton = slot
                    .baton
                    .as_ref()
                    .ok_or(ProducerStop::MissingBridgeSupport)?;
                baton
                    .acquire(BatonKey::Producer)
                    .map_err(|_| ProducerStop::AcquireBatonWrite)?;
            }
            Ok(())
        })();

        self.resolve_fault(step)
    }

    /// Publish the frame just rendered into the current slot: hand
    /// ownership to the consumer, bump and publish the write fence, and
    /// make the slot readable.
    pub fn signal_write(&mut self, queue: &D::Queue) -> Result<(), ProducerFault> {
        let step: Result<(), ProducerStop> = (|| {
            let conn = self.conn.as_ref().ok_or(ProducerStop::None)?;
            let block = conn.region.get();
            let index = conn.ring.cursor();
            let slot = conn.ring.slot(index);
            let params = block
                .consumer_params()
                .ok_or(ProducerStop::BadParameters)?;
            let mode = ExchangeMode::negotiate(self.driver.family(), params.consumer_family);

            if mode.has_baton() {
                let baton = slot
                    .baton
                    .as_ref()
                    .ok_or(ProducerStop::MissingBridgeSupport)?;
                baton
                    .release(BatonKey::Consumer)
                    .map_err(|_| ProducerStop::ReleaseBatonPublish)?;
            }
            if mode.has_write_fence() {
                let fence = slot
                    .write_fence
                    .as_ref()
                    .ok_or(ProducerStop::MissingBridgeSupport)?;
                let next = block.slot(index).write_fence_value() + 1;
                queue
                    .signal(fence, next)
                    .map_err(|_| ProducerStop::QueueSignal)?;
                block.slot(index).publish_write_fence_value(next);
            }

            block.add_pending_read();
            Ok(())
        })();

        self.resolve_fault(step)
    }

    /// Change the surface geometry. Slots are not reallocated immediately;
    /// each one is recreated lazily when next rotated into.
    pub fn resize(&mut self, width: u32, height: u32, format: SurfaceFormat) {
        self.surface = SurfaceSpec {
            width,
            height,
            format,
        };
        if let Some(conn) = self.conn.as_mut() {
            conn.ring.mark_all_for_realloc();
        }
    }

    /// Native resource of a slot previously returned by [`tick`](Self::tick).
    pub fn resource(&self, index: usize) -> Option<&D::Resource> {
        self.conn
            .as_ref()
            .and_then(|conn| conn.ring.slot(index).resource.as_ref())
    }

    pub fn connected(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|conn| conn.region.get().producer_ready())
    }

    /// Live handoff counters, for introspection and tests.
    pub fn counters(&self) -> Option<RingCounters> {
        self.conn.as_ref().map(|conn| {
            let block = conn.region.get();
            RingCounters {
                pending_writes: block.pending_writes(),
                pending_reads: block.pending_reads(),
            }
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn resolve_fault(&mut self, step: Result<(), ProducerStop>) -> Result<(), ProducerFault> {
        match step {
            Ok(()) => Ok(()),
            Err(ProducerStop::None) => Err(ProducerFault::NotConnected),
            Err(reason) => {
                self.diag.emit(
                    DiagId::ProducerFault,
                    format_args!("reopening: {}", reason.describe()),
                );
                self.reopen(reason);
                Err(ProducerFault::Stopped(reason))
            }
        }
    }

    fn open_connection(&mut self) -> Result<(), CreateError> {
        let name = connection_name(&self.session, self.next_token)?;
        let region = SharedRegion::<ConnectionBlock>::create(name.as_str())?;
        region.get().reset_for_open(self.slot_count, now_ticks());

        self.conn = Some(Connection {
            region,
            ring: ProducerRing::new(self.slot_count),
        });
        self.handshake = Handshake {
            in_progress: false,
            first_seen: 0,
        };

        // Publish last: a consumer that claims this token must find the
        // block fully initialized.
        self.rendezvous.get().publish_token(self.next_token);
        self.next_token += 1;

        self.diag.emit(
            DiagId::ConnectionReady,
            format_args!("ready to accept a consumer"),
        );
        Ok(())
    }

    fn close_connection(&mut self, reason: ProducerStop) {
        if let Some(mut conn) = self.conn.take() {
            let block = conn.region.get();
            block.publish_producer_stop(reason);

            // Do not free a slot the device may still be writing.
            let cursor = conn.ring.cursor();
            let slot = conn.ring.slot(cursor);
            if slot.resource.is_some() {
                if let Some(write_fence) = &slot.write_fence {
                    let published = block.slot(cursor).write_fence_value();
                    if write_fence.completed_value() < published {
                        let _ = write_fence.wait_blocking(published);
                    }
                }
            }

            conn.ring.release_all(&mut self.hooks);
        }
        self.handshake.in_progress = false;
    }

    fn reopen(&mut self, reason: ProducerStop) {
        self.diag.emit(
            DiagId::ConnectionReset,
            format_args!(
                "resetting connection ({}), discarding consumer if one is attached",
                reason.describe()
            ),
        );
        self.close_connection(reason);
        // A failed open leaves the session connection-less; the next tick
        // retries.
        let _ = self.open_connection();
    }
}

impl<D: FrameDriver> Drop for ProducerSession<D> {
    fn drop(&mut self) {
        self.close_connection(ProducerStop::Shutdown);
    }
}
