//! Typed wrapper over a named shared-memory mapping.
//!
//! Both control blocks are projected onto OS shared memory through this
//! wrapper. The producer creates regions; the consumer opens them by name.
//! Fresh mappings are zero-filled by the OS, which is the well-defined
//! initial state for blocks made entirely of atomics.

use std::marker::PhantomData;

use shared_memory::{Shmem, ShmemConf, ShmemError};
use thiserror::Error;

use crate::connection::ConnectionBlock;
use crate::rendezvous::RendezvousBlock;

/// Marker for types whose layout is safe to project onto a shared mapping:
/// `#[repr(C)]`, no padding requirements beyond natural alignment, and every
/// cross-process field an atomic.
///
/// # Safety
///
/// Implementors must guarantee that any bit pattern (including all-zeroes)
/// is a valid value of the type and that all interior mutability goes
/// through atomics.
pub unsafe trait SharedLayout: Sized {}

unsafe impl SharedLayout for RendezvousBlock {}
unsafe impl SharedLayout for ConnectionBlock {}

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("failed to create shared region `{name}`: {source}")]
    Create {
        name: String,
        #[source]
        source: ShmemError,
    },
    #[error("failed to open shared region `{name}`: {source}")]
    Open {
        name: String,
        #[source]
        source: ShmemError,
    },
    #[error("shared region `{name}` is too small: {len} < {expected} bytes")]
    Undersized {
        name: String,
        len: usize,
        expected: usize,
    },
}

pub struct SharedRegion<T: SharedLayout> {
    shm: Shmem,
    _marker: PhantomData<*const T>,
}

// The mapping is process-shared memory accessed exclusively through the
// atomics of `T`; moving or sharing the handle between threads is fine.
unsafe impl<T: SharedLayout + Sync> Send for SharedRegion<T> {}
unsafe impl<T: SharedLayout + Sync> Sync for SharedRegion<T> {}

impl<T: SharedLayout> SharedRegion<T> {
    /// Create a region named `name`, sized for `T`.
    ///
    /// If a mapping with this name already exists (a previous owner died
    /// without unlinking it), it is taken over instead: named segments
    /// outlive their creator on some platforms, and the caller re-initializes
    /// the payload after creation either way.
    pub fn create(name: &str) -> Result<Self, RegionError> {
        let size = core::mem::size_of::<T>();
        let shm = match ShmemConf::new().os_id(name).size(size).create() {
            Ok(shm) => shm,
            Err(ShmemError::MappingIdExists) => {
                ShmemConf::new().os_id(name).open().map_err(|source| {
                    RegionError::Open {
                        name: name.to_owned(),
                        source,
                    }
                })?
            }
            Err(source) => {
                return Err(RegionError::Create {
                    name: name.to_owned(),
                    source,
                })
            }
        };
        Self::from_mapping(name, shm)
    }

    /// Open an existing region named `name`.
    pub fn open(name: &str) -> Result<Self, RegionError> {
        let shm = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|source| RegionError::Open {
                name: name.to_owned(),
                source,
            })?;
        Self::from_mapping(name, shm)
    }

    fn from_mapping(name: &str, shm: Shmem) -> Result<Self, RegionError> {
        let expected = core::mem::size_of::<T>();
        if shm.len() < expected {
            return Err(RegionError::Undersized {
                name: name.to_owned(),
                len: shm.len(),
                expected,
            });
        }
        Ok(Self {
            shm,
            _marker: PhantomData,
        })
    }

    pub fn get(&self) -> &T {
        // Size was checked at construction; alignment is page alignment,
        // which exceeds anything `T` can ask for.
        unsafe { &*(self.shm.as_ptr() as *const T) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kinds::SyncFamily;

    fn unique_name(tag: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static NEXT: AtomicU32 = AtomicU32::new(0);
        format!(
            "flnk.test.{}.{}.{}",
            std::process::id(),
            tag,
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn create_then_open_shares_state() {
        let name = unique_name("roundtrip");
        let created = SharedRegion::<RendezvousBlock>::create(&name).unwrap();
        created.get().init(SyncFamily::Baton);
        created.get().publish_token(5);

        let opened = SharedRegion::<RendezvousBlock>::open(&name).unwrap();
        assert!(opened.get().magic_ok());
        assert_eq!(opened.get().peek_token(), 5);

        // Claims through one mapping are visible through the other.
        assert!(opened.get().claim_token(5));
        assert_eq!(created.get().peek_token(), 0);
    }

    #[test]
    fn open_of_missing_region_fails() {
        let name = unique_name("missing");
        assert!(matches!(
            SharedRegion::<RendezvousBlock>::open(&name),
            Err(RegionError::Open { .. })
        ));
    }

    #[test]
    fn create_takes_over_an_existing_mapping() {
        let name = unique_name("takeover");
        let first = SharedRegion::<RendezvousBlock>::create(&name).unwrap();
        first.get().init(SyncFamily::Fence);
        first.get().publish_token(9);

        // Keep `first` alive so the name still exists, then create again.
        let second = SharedRegion::<RendezvousBlock>::create(&name).unwrap();
        second.get().init(SyncFamily::Fence);
        assert_eq!(second.get().peek_token(), 0);
    }
}
