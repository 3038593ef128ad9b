//! The shared memory region: transaction begin, word access, and the
//! lock-validate-publish commit protocol.

use std::collections::HashSet;
use std::sync::atomic::{AtomicPtr, Ordering};

use foldhash::fast::FixedState;
use parking_lot::Mutex;
use tracing::trace;

use crate::addr::WordAddr;
use crate::alloc::{SegmentAllocator, INITIAL_SEGMENT};
use crate::descriptor::TransactionDescriptor;
use crate::errors::TxError;
use crate::object::ObjectVersion;
use crate::transaction::{Mode, ReadEntry, Transaction, WriteEntry};

/// A word-granular transactional memory region.
///
/// Commits follow the TL2 recipe: acquire the write set's versioned locks,
/// validate the read set against the snapshot timestamp, then publish new
/// object versions under the descriptor mutex, which serializes the commit
/// clock. Superseded versions and freed segments ride the descriptor chain
/// until no live transaction can reach them.
pub struct SharedMemory {
    align: usize,
    allocator: SegmentAllocator,
    current: AtomicPtr<TransactionDescriptor>,
    descriptor_mutex: Mutex<()>,
}

impl SharedMemory {
    /// Create a region with one non-freeable initial segment of `size`
    /// bytes.
    ///
    /// `align` must be a power of two and `size` a positive multiple of it.
    pub fn new(size: usize, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(
            size > 0 && size % align == 0,
            "size must be a positive multiple of the alignment"
        );
        let allocator = SegmentAllocator::new(align);
        let first = allocator
            .allocate(size)
            .expect("fresh allocator cannot be exhausted");
        debug_assert_eq!(first.segment(), INITIAL_SEGMENT);
        Self {
            align,
            allocator,
            current: AtomicPtr::new(TransactionDescriptor::new_raw(0)),
            descriptor_mutex: Mutex::new(()),
        }
    }

    /// The region's global alignment: word size in bytes.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Size in bytes of the initial segment.
    pub fn size(&self) -> usize {
        self.allocator.first_segment_size()
    }

    /// Address of the first word of the initial segment.
    pub fn start_addr(&self) -> WordAddr {
        WordAddr::new(INITIAL_SEGMENT, 0)
    }

    /// Begin a transaction pinned to the current commit epoch.
    ///
    /// The pin keeps every object version reachable from the snapshot alive
    /// for the transaction's whole life, for read-write transactions as well
    /// as read-only ones: a speculative read may still be copying from a
    /// version that a concurrent commit has already supplanted.
    pub fn begin(&self, mode: Mode) -> Transaction<'_> {
        let start_point = {
            let _guard = self.descriptor_mutex.lock();
            let ptr = self.current.load(Ordering::Acquire);
            // Safety: `current` holds a reference, and the mutex keeps it
            // from moving until our pin is counted.
            unsafe { (*ptr).acquire() };
            ptr
        };
        // Safety: we now hold a pin on `start_point`.
        let start_time = unsafe { (*start_point).commit_time() };
        trace!(?mode, start_time, "transaction begun");
        Transaction {
            mem: self,
            mode,
            start_time,
            start_point,
            read_set: Vec::new(),
            write_set: Vec::new(),
            alloc_set: Vec::new(),
            free_set: Vec::new(),
            finished: false,
        }
    }

    /// Run `f` in a transaction, retrying on conflict until it commits.
    ///
    /// Conflicted attempts yield before retrying. `Err(OutOfMemory)` is
    /// surfaced to the caller; the attempt's effects are rolled back.
    pub fn run<T, F>(&self, mode: Mode, mut f: F) -> Result<T, TxError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, TxError>,
    {
        loop {
            let mut tx = self.begin(mode);
            match f(&mut tx) {
                Ok(value) => {
                    if tx.commit() {
                        return Ok(value);
                    }
                }
                Err(TxError::Conflict) => {}
                Err(err) => return Err(err),
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn read_word(
        &self,
        tx: &mut Transaction<'_>,
        src: WordAddr,
        dst: &mut [u8],
    ) -> Result<(), TxError> {
        let obj_ref = self.allocator.find(src);

        if tx.mode == Mode::ReadOnly {
            // Safety: the transaction's pin covers every version reachable
            // from its snapshot.
            unsafe { obj_ref.object().read_snapshot(tx.start_time, dst) };
            return Ok(());
        }

        if let Some(entry) = tx.find_write_entry(src) {
            dst.copy_from_slice(&entry.written);
            return Ok(());
        }

        let obj = obj_ref.object();
        let latest = obj.latest();
        let valid = obj.lock.validate(tx.start_time);
        if !valid {
            self.abort(tx);
            return Err(TxError::Conflict);
        }
        tx.read_set.push(ReadEntry {
            addr: src,
            obj: obj_ref,
        });
        // Safety: validation proved `latest` was published at or before our
        // snapshot with no writer in flight, and the pin taken at begin
        // keeps it alive even if a commit supplants it right now.
        unsafe { (*latest).read(dst) };
        Ok(())
    }

    pub(crate) fn write_word(
        &self,
        tx: &mut Transaction<'_>,
        src: &[u8],
        dst: WordAddr,
    ) -> Result<(), TxError> {
        debug_assert_eq!(tx.mode, Mode::ReadWrite);
        if let Some(entry) = tx.find_write_entry(dst) {
            entry.written.copy_from_slice(src);
            return Ok(());
        }
        let obj_ref = self.allocator.find(dst);
        tx.write_set.push(WriteEntry {
            addr: dst,
            obj: obj_ref,
            written: src.to_vec().into_boxed_slice(),
        });
        Ok(())
    }

    pub(crate) fn allocate(
        &self,
        tx: &mut Transaction<'_>,
        size: usize,
    ) -> Result<WordAddr, TxError> {
        match self.allocator.allocate(size) {
            Some(addr) => {
                tx.alloc_set.push(addr.segment());
                Ok(addr)
            }
            None => Err(TxError::OutOfMemory),
        }
    }

    pub(crate) fn free_mark(&self, tx: &mut Transaction<'_>, addr: WordAddr) {
        let id = addr.segment();
        if self.allocator.find_segment(id).mark_for_deletion() {
            tx.free_set.push(id);
        }
    }

    /// Commit: the read-only path releases the pin and always succeeds; the
    /// read-write path runs lock acquisition, read-set validation, and
    /// publication.
    pub(crate) fn end(&self, tx: &mut Transaction<'_>) -> bool {
        if tx.finished {
            // Already aborted by a failed read; nothing left to release.
            return false;
        }
        if tx.mode == Mode::ReadOnly {
            self.unref(tx.start_point);
            tx.finished = true;
            trace!(start_time = tx.start_time, "read-only commit");
            return true;
        }

        // Phase 1: acquire write-set locks in list order. Any failure
        // releases what we hold, version unchanged.
        let mut acquired: HashSet<WordAddr, FixedState> =
            HashSet::with_capacity_and_hasher(tx.write_set.len(), FixedState::default());
        for i in 0..tx.write_set.len() {
            let entry = &tx.write_set[i];
            if !entry.obj.object().lock.try_lock(tx.start_time) {
                for held in &tx.write_set[..i] {
                    held.obj.object().lock.unlock();
                }
                self.abort(tx);
                return false;
            }
            acquired.insert(entry.addr);
        }

        // Phase 2: validate reads we do not hold the lock for. Addresses in
        // both sets need no check; we own their lock and will re-version it.
        for i in 0..tx.read_set.len() {
            let read = &tx.read_set[i];
            if acquired.contains(&read.addr) {
                continue;
            }
            if !read.obj.object().lock.validate(tx.start_time) {
                for held in &tx.write_set {
                    held.obj.object().lock.unlock();
                }
                self.abort(tx);
                return false;
            }
        }

        // Phase 3: publish under the descriptor mutex.
        {
            let _guard = self.descriptor_mutex.lock();
            self.commit_changes(tx);
        }
        tx.finished = true;
        true
    }

    /// Install a new descriptor and publish the write set. Caller holds the
    /// descriptor mutex and all write-set locks.
    fn commit_changes(&self, tx: &mut Transaction<'_>) {
        let prev = self.current.load(Ordering::Acquire);
        // Safety: `current` holds a reference on `prev`.
        let commit_time = unsafe { (*prev).commit_time() } + 1;
        let descr = TransactionDescriptor::new_raw(commit_time);

        // The new descriptor's initial reference belongs to the `next` link
        // we are about to create; take a second one for `current`.
        unsafe {
            (*prev).set_next(descr);
            (*descr).acquire();
        }
        self.unref(prev);
        self.current.store(descr, Ordering::Release);

        // Safety (both retire calls): we created `descr` under the mutex we
        // still hold, and `current` keeps it from being reclaimed.
        unsafe { (*descr).retire_segments(core::mem::take(&mut tx.free_set)) };

        for entry in tx.write_set.drain(..) {
            let obj = entry.obj.object();
            let earlier = obj.latest();
            let version = ObjectVersion::committed(entry.written, commit_time, earlier);
            let supplanted = obj.publish(Box::new(version));
            unsafe { (*descr).retire_version(supplanted) };
            obj.lock.unlock_with(commit_time);
        }

        self.unref(tx.start_point);
        trace!(commit_time, "read-write commit installed");
    }

    /// Roll back a transaction: speculative segments are freed, deletion
    /// marks cancelled, the snapshot pin released. Speculative write buffers
    /// die with the write set.
    pub(crate) fn abort(&self, tx: &mut Transaction<'_>) {
        // Cancel marks before freeing: the free set may name a segment this
        // same transaction allocated.
        for id in tx.free_set.drain(..) {
            self.allocator.find_segment(id).cancel_deletion();
        }
        for id in tx.alloc_set.drain(..) {
            self.allocator.free(id);
        }
        self.unref(tx.start_point);
        tx.finished = true;
        trace!(start_time = tx.start_time, "transaction aborted");
    }

    /// Drop one reference on `desc`, physically reclaiming it and walking
    /// the chain when the count reaches zero.
    ///
    /// Iterative rather than recursive: a long-pinned descriptor can hold
    /// back an arbitrarily long chain, all of which collapses here at once.
    fn unref(&self, desc: *mut TransactionDescriptor) {
        let mut desc = desc;
        while !desc.is_null() {
            // Safety: the caller owns one reference on `desc`; each loop
            // iteration owns the successor reference of the descriptor it
            // just reclaimed.
            let last = unsafe { (*desc).release() };
            if !last {
                break;
            }
            let next = unsafe { (*desc).next() };
            // Safety: refcount reached zero, so no transaction can reach
            // these versions or segments any more.
            let retired = unsafe { (*desc).take_retired() };
            for version in retired.versions {
                drop(unsafe { Box::from_raw(version) });
            }
            for segment in retired.segments {
                self.allocator.free(segment);
            }
            drop(unsafe { Box::from_raw(desc) });
            desc = next;
        }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // No live transactions may remain; releasing `current`'s reference
        // collapses the whole descriptor chain. Live segments die with the
        // allocator.
        let current = *self.current.get_mut();
        self.unref(current);
    }
}
