//! Consumer session façade.
//!
//! A consumer locates a producer session by prefix + process id, claims its
//! connect token, and thereafter drives the connection once per work cycle:
//! `tick`, then (when holding a frame) `wait_for_producer_write` → consume →
//! `signal_read`. Any fault disconnects; reconnecting is the caller's
//! explicit move, with no built-in retry or backoff.

use std::time::Duration;

use framelink_shared::{
    ChannelInterp, ConnectionBlock, ConsumerStop, NegotiatedParams, ProducerStop,
    RendezvousBlock, SharedRegion, SyncFamily, UsageFlags, MAX_SLOTS, MIN_SLOTS,
    PROTOCOL_VERSION,
};
use framelink_sync::{
    BatonKey, ExchangeMode, FrameDriver, OwnershipBaton, SyncFence, WorkQueue,
};

use crate::diag::{DiagId, Diagnostics};
use crate::error::{ConnectError, ConsumerFault};
use crate::hooks::SlotHooks;
use crate::naming::{connection_name, session_name};
use crate::ring::{ConsumerRing, RingCounters};
use crate::ticks::{now_ticks, ticks_for};

/// Parameters the consumer stamps into the connection during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub usage: UsageFlags,
    pub channel: ChannelInterp,
}

/// Outcome of one consumer tick. Never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerTick {
    /// Holding a valid frame; fetch its resource with
    /// [`ConsumerSession::resource`]. `refreshed` is set on the tick that
    /// reopened this slot's handles (the host may need to rebuild views).
    Frame { index: usize, refreshed: bool },
    /// Connected but no frame has been published yet.
    Waiting,
    /// No connection; call [`ConsumerSession::connect`].
    NotConnected,
    /// A fault was classified and this side disconnected. Subsequent ticks
    /// report `NotConnected` until the caller reconnects.
    Fault(ConsumerStop),
}

struct Connection<D: FrameDriver> {
    region: SharedRegion<ConnectionBlock>,
    ring: ConsumerRing<D>,
    peer: D::Peer,
    producer_family: SyncFamily,
    has_valid_image: bool,
}

enum TickStep {
    Done(ConsumerTick),
    Stop(ConsumerStop),
}

pub struct ConsumerSession<D: FrameDriver> {
    driver: D,
    hooks: SlotHooks<D::Resource>,
    diag: Diagnostics,
    timeout_ticks: i64,
    conn: Option<Connection<D>>,
}

impl<D: FrameDriver> ConsumerSession<D> {
    pub fn new(driver: D, hooks: SlotHooks<D::Resource>, diag: Diagnostics) -> Self {
        Self {
            driver,
            hooks,
            diag,
            timeout_ticks: ticks_for(Duration::from_secs(5)),
            conn: None,
        }
    }

    /// Override the keepalive staleness threshold (default 5 s).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout_ticks = ticks_for(timeout);
    }

    /// Attach to the producer advertised under `prefix` + `process_id`.
    ///
    /// Any existing connection is dropped first (publishing the
    /// new-connection stop reason). Version checking happens before the
    /// token claim, so a mismatched consumer leaves the shared state
    /// untouched.
    pub fn connect(
        &mut self,
        prefix: &str,
        process_id: u32,
        namespace: Option<&str>,
        params: ConnectParams,
    ) -> Result<(), ConnectError> {
        self.disconnect_with(ConsumerStop::NewConnection);

        let session = session_name(prefix, process_id, namespace)?;
        let rendezvous = SharedRegion::<RendezvousBlock>::open(session.as_str())?;
        let advert = rendezvous.get();

        if !advert.magic_ok() {
            return Err(ConnectError::ForeignBlock);
        }
        let theirs = advert.version();
        if theirs != PROTOCOL_VERSION {
            return Err(ConnectError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs,
            });
        }
        let producer_family = advert.producer_family().ok_or(ConnectError::UnknownFamily)?;

        let token = advert.peek_token();
        if !advert.claim_token(token) {
            return Err(ConnectError::Unavailable);
        }

        let conn_name = connection_name(&session, token)?;
        let region = SharedRegion::<ConnectionBlock>::open(conn_name.as_str())?;
        let peer = self
            .driver
            .connect_peer(process_id)
            .map_err(ConnectError::Peer)?;

        let block = region.get();
        let depth = block.slot_count();
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&depth) {
            return Err(ConnectError::BadSlotCount(depth));
        }

        block.stamp_consumer_keepalive(now_ticks());
        block.set_consumer_params(NegotiatedParams {
            usage: params.usage,
            channel: params.channel,
            consumer_family: self.driver.family(),
        });

        self.conn = Some(Connection {
            region,
            ring: ConsumerRing::new(depth),
            peer,
            producer_family,
            has_valid_image: false,
        });

        self.diag.emit(
            DiagId::ConsumerConnected,
            format_args!(
                "connected to {} (token {token}, {} producer, depth {depth})",
                session.as_str(),
                producer_family.name()
            ),
        );
        Ok(())
    }

    /// Non-blocking per-cycle entry point.
    pub fn tick(&mut self) -> ConsumerTick {
        let step = self.tick_inner(now_ticks());
        match step {
            TickStep::Done(tick) => tick,
            TickStep::Stop(reason) => {
                self.diag.emit(
                    DiagId::ConsumerFault,
                    format_args!("disconnecting: {}", reason.describe()),
                );
                self.disconnect_with(reason);
                ConsumerTick::Fault(reason)
            }
        }
    }

    fn tick_inner(&mut self, now: i64) -> TickStep {
        let Some(conn) = self.conn.as_mut() else {
            return TickStep::Done(ConsumerTick::NotConnected);
        };
        let Connection {
            region,
            ring,
            peer,
            producer_family,
            has_valid_image,
        } = conn;
        let block = region.get();

        block.stamp_consumer_keepalive(now);

        let producer_stop = block.producer_stop();
        if producer_stop != ProducerStop::None {
            self.diag.emit(
                DiagId::ProducerRequestedStop,
                format_args!("producer requested stop: {}", producer_stop.describe()),
            );
            return TickStep::Stop(ConsumerStop::ProducerRequested);
        }
        if now - block.producer_keepalive() >= self.timeout_ticks {
            self.diag.emit(
                DiagId::ProducerTimedOut,
                format_args!("producer stopped responding"),
            );
            return TickStep::Stop(ConsumerStop::ProducerTimedOut);
        }

        if !block.producer_ready() {
            return TickStep::Done(ConsumerTick::Waiting);
        }

        if block.try_take_pending_read() {
            // Move to the freshly published slot and return the previous
            // one to the producer's pool.
            ring.advance();
            block.add_pending_write();
            *has_valid_image = true;
        }

        if !*has_valid_image {
            return TickStep::Done(ConsumerTick::Waiting);
        }

        let index = ring.cursor();
        let mode = ExchangeMode::negotiate(*producer_family, self.driver.family());
        match ring.open_if_invalidated(
            index,
            &self.driver,
            peer,
            mode,
            block,
            &mut self.hooks,
            &self.diag,
        ) {
            Ok(refreshed) => TickStep::Done(ConsumerTick::Frame { index, refreshed }),
            Err(reason) => TickStep::Stop(reason),
        }
    }

    /// Block until the producer's write to the current slot is visible.
    /// Call between a `Frame` tick and consuming the image.
    pub fn wait_for_producer_write(&mut self, queue: &D::Queue) -> Result<(), ConsumerFault> {
        let step: Result<(), ConsumerStop> = (|| {
            let conn = self.conn.as_mut().ok_or(ConsumerStop::None)?;
            let block = conn.region.get();
            let index = conn.ring.cursor();
            let slot = conn.ring.slot_mut(index);

            match self.driver.family() {
                SyncFamily::Baton => {
                    let baton = slot.baton.as_ref().ok_or(ConsumerStop::OpenResource)?;
                    baton
                        .acquire(BatonKey::Consumer)
                        .map_err(|_| ConsumerStop::AcquireBatonRead)?;
                }
                SyncFamily::Fence => {
                    let published = block.slot(index).write_fence_value();
                    if slot.write_fence_cleared < published {
                        let fence = slot
                            .write_fence
                            .as_ref()
                            .ok_or(ConsumerStop::OpenWriteFence)?;
                        queue
                            .wait(fence, published)
                            .map_err(|_| ConsumerStop::QueueWait)?;
                        slot.write_fence_cleared = published;
                    }
                }
            }
            Ok(())
        })();

        self.resolve_fault(step)
    }

    /// Return the current slot after consuming it: release read ownership
    /// and publish the bumped read fence.
    pub fn signal_read(&mut self, queue: &D::Queue) -> Result<(), ConsumerFault> {
        let step: Result<(), ConsumerStop> = (|| {
            let conn = self.conn.as_ref().ok_or(ConsumerStop::None)?;
            let block = conn.region.get();
            let index = conn.ring.cursor();
            let slot = conn.ring.slot(index);

            match self.driver.family() {
                SyncFamily::Baton => {
                    let baton = slot.baton.as_ref().ok_or(ConsumerStop::OpenResource)?;
                    baton
                        .release(BatonKey::Consumer)
                        .map_err(|_| ConsumerStop::ReleaseBatonRead)?;
                }
                SyncFamily::Fence => {
                    let fence = slot
                        .read_fence
                        .as_ref()
                        .ok_or(ConsumerStop::OpenReadFence)?;
                    let next = block.slot(index).read_fence_value() + 1;
                    queue
                        .signal(fence, next)
                        .map_err(|_| ConsumerStop::QueueSignal)?;
                    block.slot(index).publish_read_fence_value(next);
                }
            }
            Ok(())
        })();

        self.resolve_fault(step)
    }

    /// Detach from the producer, publishing a normal-shutdown stop reason.
    pub fn disconnect(&mut self) {
        self.disconnect_with(ConsumerStop::Shutdown);
    }

    /// Native resource of a slot previously returned by [`tick`](Self::tick).
    pub fn resource(&self, index: usize) -> Option<&D::Resource> {
        self.conn
            .as_ref()
            .and_then(|conn| conn.ring.slot(index).resource.as_ref())
    }

    pub fn connected(&self) -> bool {
        self.conn.is_some()
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

    fn resolve_fault(&mut self, step: Result<(), ConsumerStop>) -> Result<(), ConsumerFault> {
        match step {
            Ok(()) => Ok(()),
            Err(ConsumerStop::None) => Err(ConsumerFault::NotConnected),
            Err(reason) => {
                self.diag.emit(
                    DiagId::ConsumerFault,
                    format_args!("disconnecting: {}", reason.describe()),
                );
                self.disconnect_with(reason);
                Err(ConsumerFault::Stopped(reason))
            }
        }
    }

    fn disconnect_with(&mut self, reason: ConsumerStop) {
        if let Some(mut conn) = self.conn.take() {
            let block = conn.region.get();
            block.publish_consumer_stop(reason);

            // Do not free a view the device may still be reading from.
            let cursor = conn.ring.cursor();
            let slot = conn.ring.slot(cursor);
            if slot.resource.is_some() {
                if let Some(read_fence) = &slot.read_fence {
                    let _ = read_fence.wait_blocking(block.slot(cursor).read_fence_value());
                }
            }

            conn.ring.release_all(&mut self.hooks);
        }
    }
}

impl<D: FrameDriver> Drop for ConsumerSession<D> {
    fn drop(&mut self) {
        self.disconnect_with(ConsumerStop::Shutdown);
    }
}
