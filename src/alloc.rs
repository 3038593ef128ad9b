//! Segment allocation and address resolution.

use std::collections::HashMap;
use std::sync::Arc;

use foldhash::fast::FixedState;
use parking_lot::RwLock;
use tracing::debug;

use crate::addr::{SegmentId, WordAddr};
use crate::object::Object;
use crate::segment::SharedSegment;

/// Id of the non-freeable segment every region starts with.
pub(crate) const INITIAL_SEGMENT: SegmentId = 1;

/// Cap on concurrently live segments. Allocation past the cap surfaces as
/// a non-fatal out-of-memory to the requesting transaction.
const MAX_SEGMENTS: usize = 1 << 16;

/// Reference to one word's [`Object`] that keeps its segment alive
/// independently of the allocator map.
#[derive(Clone)]
pub(crate) struct ObjRef {
    segment: Arc<SharedSegment>,
    index: usize,
}

impl ObjRef {
    #[inline]
    pub(crate) fn object(&self) -> &Object {
        self.segment.object(self.index)
    }
}

struct Segments {
    map: HashMap<SegmentId, Arc<SharedSegment>, FixedState>,
    next_id: SegmentId,
}

/// Maps opaque addresses to words and owns the live-segment table.
///
/// The table is guarded by a reader-writer mutex: address resolution takes
/// it shared, allocation and physical free take it exclusive. Segment ids
/// grow monotonically and are never reused.
pub(crate) struct SegmentAllocator {
    align: usize,
    segments: RwLock<Segments>,
}

impl SegmentAllocator {
    pub(crate) fn new(align: usize) -> Self {
        Self {
            align,
            segments: RwLock::new(Segments {
                map: HashMap::with_hasher(FixedState::default()),
                next_id: INITIAL_SEGMENT,
            }),
        }
    }

    /// Mint a fresh id and install a zeroed segment of `size` bytes.
    ///
    /// Returns the address of the segment's first word, or `None` when the
    /// live-segment cap or the id space is exhausted.
    pub(crate) fn allocate(&self, size: usize) -> Option<WordAddr> {
        debug_assert!(size > 0 && size % self.align == 0);
        let mut segments = self.segments.write();
        if segments.map.len() >= MAX_SEGMENTS {
            return None;
        }
        let id = segments.next_id;
        segments.next_id = segments.next_id.checked_add(1)?;
        segments
            .map
            .insert(id, Arc::new(SharedSegment::new(size, self.align)));
        debug!(segment = id, size, "segment allocated");
        Some(WordAddr::new(id, 0))
    }

    /// Physically release a segment. The caller must guarantee that no live
    /// transaction can still reach any of its words; the descriptor chain
    /// provides that guarantee for committed frees.
    pub(crate) fn free(&self, id: SegmentId) {
        let removed = self.segments.write().map.remove(&id);
        debug_assert!(removed.is_some(), "freeing unknown segment {id}");
        debug!(segment = id, "segment freed");
    }

    /// Resolve an address to its word.
    ///
    /// Panics on an unknown segment: reaching one means the caller broke the
    /// API contract (double-free, or use of an address after its free
    /// committed and was reclaimed).
    pub(crate) fn find(&self, addr: WordAddr) -> ObjRef {
        let segments = self.segments.read();
        let segment = segments
            .map
            .get(&addr.segment())
            .unwrap_or_else(|| panic!("address {addr:?} does not name a live segment"))
            .clone();
        ObjRef {
            segment,
            index: addr.offset() as usize / self.align,
        }
    }

    /// The segment itself, for deletion marking.
    pub(crate) fn find_segment(&self, id: SegmentId) -> Arc<SharedSegment> {
        self.segments
            .read()
            .map
            .get(&id)
            .unwrap_or_else(|| panic!("segment {id} is not live"))
            .clone()
    }

    /// Size in bytes of the initial segment.
    pub(crate) fn first_segment_size(&self) -> usize {
        self.find_segment(INITIAL_SEGMENT).size_bytes()
    }
}
