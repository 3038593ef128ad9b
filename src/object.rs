//! Words and their version history.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::lock::{Timestamp, VersionedLock};

/// One immutable version of a word.
///
/// Owns a buffer of exactly the region alignment in bytes, the commit
/// timestamp that published it, and a back-pointer to the version it
/// supplanted. Once published, only `earlier` may be followed; buffer and
/// timestamp never change.
///
/// Ownership: the version reachable as an [`Object`]'s `latest` belongs to
/// that Object. Every superseded version belongs to the descriptor of the
/// commit that supplanted it, and is freed when that descriptor is released.
pub struct ObjectVersion {
    buf: Box<[u8]>,
    version: Timestamp,
    earlier: *mut ObjectVersion,
}

// Buffers are immutable after publication and the chain is traversal-only.
unsafe impl Send for ObjectVersion {}
unsafe impl Sync for ObjectVersion {}

impl ObjectVersion {
    /// The zeroed initial version, timestamp 0, end of chain.
    pub(crate) fn zeroed(align: usize) -> Self {
        Self {
            buf: vec![0u8; align].into_boxed_slice(),
            version: 0,
            earlier: core::ptr::null_mut(),
        }
    }

    /// A committed version taking ownership of a speculative write buffer.
    pub(crate) fn committed(
        buf: Box<[u8]>,
        version: Timestamp,
        earlier: *mut ObjectVersion,
    ) -> Self {
        Self {
            buf,
            version,
            earlier,
        }
    }

    #[inline]
    pub(crate) fn version(&self) -> Timestamp {
        self.version
    }

    #[inline]
    pub(crate) fn earlier(&self) -> *mut ObjectVersion {
        self.earlier
    }

    /// Copy the word into `dst`.
    #[inline]
    pub(crate) fn read(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.buf);
    }
}

/// One word's guard and latest-version pointer.
pub struct Object {
    pub(crate) lock: VersionedLock,
    latest: AtomicPtr<ObjectVersion>,
}

unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// A fresh word: zeroed initial version, lock version 0.
    pub(crate) fn new(align: usize) -> Self {
        let initial = Box::into_raw(Box::new(ObjectVersion::zeroed(align)));
        Self {
            lock: VersionedLock::new(),
            latest: AtomicPtr::new(initial),
        }
    }

    /// The latest published version. Never null.
    #[inline]
    pub(crate) fn latest(&self) -> *mut ObjectVersion {
        self.latest.load(Ordering::Acquire)
    }

    /// Publish `new` as the latest version, returning the supplanted one.
    ///
    /// The caller must hold this word's lock and retire the returned version
    /// into the committing descriptor. The Release store orders the new
    /// version's fields before its visibility to readers.
    #[inline]
    pub(crate) fn publish(&self, new: Box<ObjectVersion>) -> *mut ObjectVersion {
        let old = self.latest.load(Ordering::Relaxed);
        self.latest.store(Box::into_raw(new), Ordering::Release);
        old
    }

    /// Snapshot read: copy the newest version with timestamp ≤ `snapshot`
    /// into `dst`.
    ///
    /// # Safety
    ///
    /// The caller must hold a descriptor pin taken at or before `snapshot`,
    /// which keeps every version this walk can reach alive.
    pub(crate) unsafe fn read_snapshot(&self, snapshot: Timestamp, dst: &mut [u8]) {
        let mut ver = self.latest();
        unsafe {
            while (*ver).version() > snapshot {
                ver = (*ver).earlier();
            }
            (*ver).read(dst);
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        // Only the latest version is Object-owned; every earlier version in
        // the chain belongs to some descriptor.
        let latest = *self.latest.get_mut();
        if !latest.is_null() {
            drop(unsafe { Box::from_raw(latest) });
        }
    }
}
