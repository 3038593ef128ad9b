//! Commit-epoch descriptors: the reclamation authority.
//!
//! Every committed read-write transaction installs one descriptor carrying
//! the object versions it supplanted and the segments it freed. Descriptors
//! form a singly linked list in strict commit-time order; a descriptor's
//! resources are physically released only once its refcount reaches zero,
//! which cannot happen while any transaction pinned at an earlier or equal
//! snapshot is still live. This is a lightweight epoch scheme: read-only
//! transactions walk arbitrary version history without locks, at the price
//! of reclamation being delayed by long-lived pins.

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::addr::SegmentId;
use crate::lock::Timestamp;
use crate::object::ObjectVersion;

/// Resources whose physical release waits on this epoch.
pub(crate) struct Retired {
    pub(crate) versions: Vec<*mut ObjectVersion>,
    pub(crate) segments: Vec<SegmentId>,
}

/// One committed epoch (or the initial epoch at commit time 0).
///
/// Reference accounting: a descriptor is born with refcount 1, the unit
/// consumed by its predecessor's release of `next`. Installing it as
/// `current` adds one, and every transaction pin adds one. The youngest
/// descriptor is therefore always held by `current`, and a dying descriptor
/// releases exactly one reference on its successor.
pub(crate) struct TransactionDescriptor {
    commit_time: Timestamp,
    refcount: AtomicU32,
    retired: UnsafeCell<Retired>,
    next: AtomicPtr<TransactionDescriptor>,
}

// The UnsafeCell is written only by the committing thread while it holds the
// descriptor mutex and the descriptor is unreachable for reclamation
// (current holds a reference), and read only by the thread that brought the
// refcount to zero; the AcqRel refcount operations order the two.
unsafe impl Send for TransactionDescriptor {}
unsafe impl Sync for TransactionDescriptor {}

impl TransactionDescriptor {
    /// Heap-allocate a descriptor with refcount 1.
    pub(crate) fn new_raw(commit_time: Timestamp) -> *mut Self {
        Box::into_raw(Box::new(Self {
            commit_time,
            refcount: AtomicU32::new(1),
            retired: UnsafeCell::new(Retired {
                versions: Vec::new(),
                segments: Vec::new(),
            }),
            next: AtomicPtr::new(core::ptr::null_mut()),
        }))
    }

    #[inline]
    pub(crate) fn commit_time(&self) -> Timestamp {
        self.commit_time
    }

    /// Take one reference: a pin, or installation as `current`.
    #[inline]
    pub(crate) fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns true when this was the last one and the
    /// caller must reclaim.
    #[inline]
    pub(crate) fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut TransactionDescriptor {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut TransactionDescriptor) {
        self.next.store(next, Ordering::Release);
    }

    /// Record a supplanted version for deferred release.
    ///
    /// # Safety
    ///
    /// Only the committing thread may call this, under the descriptor mutex,
    /// before any other thread can bring this descriptor's refcount to zero.
    pub(crate) unsafe fn retire_version(&self, version: *mut ObjectVersion) {
        unsafe { (*self.retired.get()).versions.push(version) };
    }

    /// Record the segment ids freed by the committing transaction.
    ///
    /// # Safety
    ///
    /// Same contract as [`retire_version`](Self::retire_version).
    pub(crate) unsafe fn retire_segments(&self, segments: Vec<SegmentId>) {
        unsafe { (*self.retired.get()).segments = segments };
    }

    /// Take the retired resources for physical release.
    ///
    /// # Safety
    ///
    /// Only the thread that observed [`release`](Self::release) return true
    /// may call this, exactly once.
    pub(crate) unsafe fn take_retired(&self) -> Retired {
        unsafe {
            core::mem::replace(
                &mut *self.retired.get(),
                Retired {
                    versions: Vec::new(),
                    segments: Vec::new(),
                },
            )
        }
    }
}
