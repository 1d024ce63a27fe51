//! Area records and their storage
//!
//! An area is a contiguous sub-range of the offscreen arena, either free
//! or occupied. Records are kept out-of-line in a fixed table and linked
//! into an ascending-offset list by index, so handles stay valid while
//! neighbours split and merge around them.

use crate::config::MAX_AREAS;

/// Reference to an area (index into the record table)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaRef(u32);

impl AreaRef {
    /// Create an area reference from an index
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Get the index of this area reference
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Null/invalid area reference
    pub const NULL: Self = Self(u32::MAX);

    /// Check if this is a null reference
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Occupancy state of an area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaState {
    /// Free, ready to satisfy an allocation
    Available,
    /// Occupied, may be evicted to make room
    Removable,
    /// Occupied, never touched by the eviction search
    Locked,
}

/// A contiguous sub-range of the arena
///
/// `T` is the eviction token type of the owning handler. The usable
/// range starts at [`offset`](Self::offset), which is `base_offset`
/// rounded up to the occupant's alignment; the bytes in between are
/// alignment slack accounted to this area.
#[derive(Debug, Clone, Copy)]
pub struct Area<T: Copy> {
    pub(crate) state: AreaState,
    pub(crate) base_offset: usize,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) last_use: u64,
    pub(crate) eviction_cost: u64,
    pub(crate) token: Option<T>,
    pub(crate) prev: AreaRef,
    pub(crate) next: AreaRef,
}

impl<T: Copy> Area<T> {
    /// Create an unused record
    const fn empty() -> Self {
        Self {
            state: AreaState::Available,
            base_offset: 0,
            offset: 0,
            size: 0,
            align: 0,
            last_use: 0,
            eviction_cost: 0,
            token: None,
            prev: AreaRef::NULL,
            next: AreaRef::NULL,
        }
    }

    /// Get the occupancy state
    pub fn state(&self) -> AreaState {
        self.state
    }

    /// Get the start of this area's byte range
    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Get the aligned usable start within the byte range
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get the length of the byte range
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the alignment in force for the current occupant (0 when free)
    pub fn align(&self) -> usize {
        self.align
    }

    /// Get the allocation sequence number stamped at allocation time
    pub fn last_use(&self) -> u64 {
        self.last_use
    }

    /// Get the end of this area's byte range
    pub fn end_offset(&self) -> usize {
        self.base_offset + self.size
    }
}

/// Storage for area records
///
/// Pre-allocated table of records with a freelist threaded through the
/// `next` links of unused entries.
pub(crate) struct AreaTable<T: Copy> {
    /// Record table
    areas: [Area<T>; MAX_AREAS],

    /// Head of freelist (index of first unused record)
    free_head: AreaRef,

    /// Number of records in use
    active_count: usize,
}

impl<T: Copy> AreaTable<T> {
    /// Create new area storage
    pub(crate) const fn new() -> Self {
        Self {
            areas: [Area::empty(); MAX_AREAS],
            free_head: AreaRef::from_index(0),
            active_count: 0,
        }
    }

    /// Initialise the record freelist
    ///
    /// Must be called before using the table.
    pub(crate) fn init(&mut self) {
        for i in 0..MAX_AREAS - 1 {
            self.areas[i].next = AreaRef::from_index(i + 1);
        }
        self.areas[MAX_AREAS - 1].next = AreaRef::NULL;
        self.free_head = AreaRef::from_index(0);
        self.active_count = 0;
    }

    /// Allocate a record from storage
    ///
    /// Returns None if every record is in use. The record's fields are
    /// stale; the caller fills them in.
    pub(crate) fn alloc_record(&mut self) -> Option<AreaRef> {
        if self.free_head.is_null() {
            return None;
        }

        let area_ref = self.free_head;
        self.free_head = self.areas[area_ref.index()].next;
        self.active_count += 1;

        Some(area_ref)
    }

    /// Return a record to storage
    pub(crate) fn free_record(&mut self, area_ref: AreaRef) {
        self.areas[area_ref.index()].next = self.free_head;
        self.free_head = area_ref;
        self.active_count -= 1;
    }

    /// Get a reference to a record by index
    pub(crate) fn get(&self, area_ref: AreaRef) -> &Area<T> {
        &self.areas[area_ref.index()]
    }

    /// Get a mutable reference to a record by index
    pub(crate) fn get_mut(&mut self, area_ref: AreaRef) -> &mut Area<T> {
        &mut self.areas[area_ref.index()]
    }

    /// Number of records in use
    pub(crate) fn active_count(&self) -> usize {
        self.active_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_ref() {
        assert!(AreaRef::NULL.is_null());
        assert!(!AreaRef::from_index(0).is_null());
    }

    #[test]
    fn test_record_alloc_free() {
        let mut table: AreaTable<()> = AreaTable::new();
        table.init();

        let a = table.alloc_record().unwrap();
        let b = table.alloc_record().unwrap();
        assert_ne!(a, b);
        assert_eq!(table.active_count(), 2);

        table.free_record(a);
        assert_eq!(table.active_count(), 1);

        // Freed records are reused
        let c = table.alloc_record().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_record_exhaustion() {
        let mut table: AreaTable<()> = AreaTable::new();
        table.init();

        for _ in 0..MAX_AREAS {
            assert!(table.alloc_record().is_some());
        }
        assert!(table.alloc_record().is_none());
        assert_eq!(table.active_count(), MAX_AREAS);
    }
}
