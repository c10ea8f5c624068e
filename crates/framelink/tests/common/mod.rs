//! Shared fixtures for the protocol integration tests.
//!
//! Everything runs over the software driver, with both sessions in this
//! process mapping the same named regions — the exact code paths a real
//! two-process deployment exercises.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use framelink::shared::{ChannelInterp, SurfaceFormat, SyncFamily, UsageFlags};
use framelink::sync::soft::{SoftDriver, SoftQueue};
use framelink::{
    ConnectError, ConnectParams, ConsumerSession, Diagnostics, ProducerConfig, ProducerSession,
    SlotHooks, SurfaceSpec,
};

pub const QUEUE: SoftQueue = SoftQueue;

/// Session names are global to the machine; keep tests from colliding with
/// each other and with leftovers of earlier runs.
pub fn unique_prefix(tag: &str) -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    format!(
        "flt-{}-{}-{}",
        std::process::id(),
        tag,
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

pub fn surface() -> SurfaceSpec {
    SurfaceSpec {
        width: 8,
        height: 8,
        format: SurfaceFormat::Bgra8Srgb,
    }
}

pub fn producer(
    prefix: &str,
    family: SyncFamily,
    depth: usize,
    timeout: Duration,
) -> ProducerSession<SoftDriver> {
    let mut config = ProducerConfig::new(prefix, surface());
    config.slot_count = depth;
    config.timeout = timeout;
    ProducerSession::create(
        config,
        SoftDriver::new(family),
        SlotHooks::noop(),
        Diagnostics::disabled(),
    )
    .expect("producer create")
}

pub fn consumer(family: SyncFamily) -> ConsumerSession<SoftDriver> {
    ConsumerSession::new(
        SoftDriver::new(family),
        SlotHooks::noop(),
        Diagnostics::disabled(),
    )
}

pub fn connect(
    session: &mut ConsumerSession<SoftDriver>,
    prefix: &str,
) -> Result<(), ConnectError> {
    session.connect(
        prefix,
        std::process::id(),
        None,
        ConnectParams {
            usage: UsageFlags::SHADER_RESOURCE,
            channel: ChannelInterp::Unorm,
        },
    )
}
