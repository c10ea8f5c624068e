//! Wire-value enums stored in the shared control blocks.
//!
//! Everything here crosses the process boundary as a `u32`, so each type has
//! explicit discriminants and a checked decode. Decoding never panics; an
//! unknown value either yields `None` (negotiated parameters, where it is a
//! handshake error) or a catch-all variant (stop reasons, where it is only
//! diagnostic).

use bitflags::bitflags;

/// Which of the two synchronization primitive styles a session's graphics
/// API natively speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyncFamily {
    /// Ownership-baton style: a mutual-exclusion token handed back and forth
    /// with distinct key values.
    Baton = 0,
    /// Monotonic-fence style: a counter with signal / wait-until semantics.
    Fence = 1,
}

impl SyncFamily {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SyncFamily::Baton),
            1 => Some(SyncFamily::Fence),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SyncFamily::Baton => "baton",
            SyncFamily::Fence => "fence",
        }
    }
}

/// Pixel format of the exchanged surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SurfaceFormat {
    Rgba16Float = 0,
    Rgb10A2Unorm = 1,
    Rgba8Srgb = 2,
    Bgra8Srgb = 3,
    Rgb10XrBiasA2 = 4,
}

impl SurfaceFormat {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => SurfaceFormat::Rgba16Float,
            1 => SurfaceFormat::Rgb10A2Unorm,
            2 => SurfaceFormat::Rgba8Srgb,
            3 => SurfaceFormat::Bgra8Srgb,
            4 => SurfaceFormat::Rgb10XrBiasA2,
            _ => return None,
        })
    }

    /// Bytes per pixel once resolved to a concrete texel layout.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SurfaceFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

/// How the consumer wants the sRGB-capable formats interpreted when it opens
/// its view of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelInterp {
    Unorm = 0,
    UnormSrgb = 1,
    Typeless = 2,
}

impl ChannelInterp {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => ChannelInterp::Unorm,
            1 => ChannelInterp::UnormSrgb,
            2 => ChannelInterp::Typeless,
            _ => return None,
        })
    }
}

bitflags! {
    /// Usage the consumer requests for the shared surfaces, specified during
    /// the handshake and honored by the producer at allocation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsageFlags: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const STORAGE = 1 << 2;
    }
}

/// Why the producer tore a connection down. Published into the connection
/// block for the consumer to observe on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProducerStop {
    None = 0,
    Shutdown = 1,
    ConsumerRequested = 2,
    ConsumerTimedOut = 3,
    BadParameters = 4,
    MissingBridgeSupport = 5,
    CreateResource = 6,
    ExportHandle = 7,
    AcquireBatonInit = 8,
    ReleaseBatonInit = 9,
    AcquireBatonReclaim = 10,
    ReleaseBatonReclaim = 11,
    AcquireBatonWrite = 12,
    ReleaseBatonPublish = 13,
    QueueWait = 14,
    QueueSignal = 15,
    CreateHook = 16,
    Unknown = 17,
}

impl ProducerStop {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => ProducerStop::None,
            1 => ProducerStop::Shutdown,
            2 => ProducerStop::ConsumerRequested,
            3 => ProducerStop::ConsumerTimedOut,
            4 => ProducerStop::BadParameters,
            5 => ProducerStop::MissingBridgeSupport,
            6 => ProducerStop::CreateResource,
            7 => ProducerStop::ExportHandle,
            8 => ProducerStop::AcquireBatonInit,
            9 => ProducerStop::ReleaseBatonInit,
            10 => ProducerStop::AcquireBatonReclaim,
            11 => ProducerStop::ReleaseBatonReclaim,
            12 => ProducerStop::AcquireBatonWrite,
            13 => ProducerStop::ReleaseBatonPublish,
            14 => ProducerStop::QueueWait,
            15 => ProducerStop::QueueSignal,
            16 => ProducerStop::CreateHook,
            _ => ProducerStop::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ProducerStop::None => "no reason",
            ProducerStop::Shutdown => "producer is shutting down normally",
            ProducerStop::ConsumerRequested => "consumer requested a stop",
            ProducerStop::ConsumerTimedOut => "consumer stopped responding",
            ProducerStop::BadParameters => "consumer specified unusable parameters",
            ProducerStop::MissingBridgeSupport => {
                "producer cannot bridge to the consumer's sync family"
            }
            ProducerStop::CreateResource => "failed to create a slot resource",
            ProducerStop::ExportHandle => "failed to export a shareable handle",
            ProducerStop::AcquireBatonInit => "failed to acquire the baton at slot creation",
            ProducerStop::ReleaseBatonInit => "failed to release the baton at slot creation",
            ProducerStop::AcquireBatonReclaim => "failed to acquire the baton to reclaim a slot",
            ProducerStop::ReleaseBatonReclaim => "failed to release the baton to reclaim a slot",
            ProducerStop::AcquireBatonWrite => "failed to acquire the baton before writing",
            ProducerStop::ReleaseBatonPublish => "failed to release the baton after writing",
            ProducerStop::QueueWait => "queue wait against a fence failed",
            ProducerStop::QueueSignal => "queue signal against a fence failed",
            ProducerStop::CreateHook => "host create callback reported failure",
            ProducerStop::Unknown => "unrecognized stop code",
        }
    }
}

/// Why the consumer tore its side of a connection down. Published into the
/// connection block for the producer to observe on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConsumerStop {
    None = 0,
    Shutdown = 1,
    NewConnection = 2,
    ProducerRequested = 3,
    ProducerTimedOut = 4,
    DuplicatePeerHandle = 5,
    OpenResource = 6,
    OpenWriteFence = 7,
    OpenReadFence = 8,
    AcquireBatonRead = 9,
    ReleaseBatonRead = 10,
    QueueWait = 11,
    QueueSignal = 12,
    CreateHook = 13,
    Unknown = 14,
}

impl ConsumerStop {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => ConsumerStop::None,
            1 => ConsumerStop::Shutdown,
            2 => ConsumerStop::NewConnection,
            3 => ConsumerStop::ProducerRequested,
            4 => ConsumerStop::ProducerTimedOut,
            5 => ConsumerStop::DuplicatePeerHandle,
            6 => ConsumerStop::OpenResource,
            7 => ConsumerStop::OpenWriteFence,
            8 => ConsumerStop::OpenReadFence,
            9 => ConsumerStop::AcquireBatonRead,
            10 => ConsumerStop::ReleaseBatonRead,
            11 => ConsumerStop::QueueWait,
            12 => ConsumerStop::QueueSignal,
            13 => ConsumerStop::CreateHook,
            _ => ConsumerStop::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ConsumerStop::None => "no reason",
            ConsumerStop::Shutdown => "consumer is shutting down normally",
            ConsumerStop::NewConnection => "consumer is disconnecting to start a new connection",
            ConsumerStop::ProducerRequested => "producer requested a stop",
            ConsumerStop::ProducerTimedOut => "producer stopped responding",
            ConsumerStop::DuplicatePeerHandle => "failed to duplicate a handle from the peer",
            ConsumerStop::OpenResource => "failed to open a shared slot resource",
            ConsumerStop::OpenWriteFence => "failed to open a shared write fence",
            ConsumerStop::OpenReadFence => "failed to open a shared read fence",
            ConsumerStop::AcquireBatonRead => "failed to acquire the baton before reading",
            ConsumerStop::ReleaseBatonRead => "failed to release the baton after reading",
            ConsumerStop::QueueWait => "queue wait against a fence failed",
            ConsumerStop::QueueSignal => "queue signal against a fence failed",
            ConsumerStop::CreateHook => "host create callback reported failure",
            ConsumerStop::Unknown => "unrecognized stop code",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_family_round_trips() {
        for family in [SyncFamily::Baton, SyncFamily::Fence] {
            assert_eq!(SyncFamily::from_u32(family.to_u32()), Some(family));
        }
        assert_eq!(SyncFamily::from_u32(7), None);
    }

    #[test]
    fn stop_codes_round_trip() {
        for raw in 0..=17 {
            let reason = ProducerStop::from_u32(raw);
            if reason != ProducerStop::Unknown {
                assert_eq!(reason.to_u32(), raw);
            }
        }
        for raw in 0..=14 {
            let reason = ConsumerStop::from_u32(raw);
            if reason != ConsumerStop::Unknown {
                assert_eq!(reason.to_u32(), raw);
            }
        }
        assert_eq!(ProducerStop::from_u32(0xdead), ProducerStop::Unknown);
        assert_eq!(ConsumerStop::from_u32(0xdead), ConsumerStop::Unknown);
    }
}
