//! Offscreen area manager
//!
//! Allocates blocks of offscreen memory by maintaining an ordered list
//! of areas. When no free area fits, the contiguous run of areas with
//! the minimum eviction cost is found and evicted to make room for the
//! new allocation.

use log::{debug, trace};

use crate::area::{Area, AreaRef, AreaState, AreaTable};
use crate::config::MAX_AREA_AGE;
use crate::error::AllocError;
use crate::traits::EvictHandler;

#[cfg(feature = "stats")]
use crate::stats::OffscreenStats;

/// Arena bounds handed to the manager at construction
///
/// The range `[0, memory_size)` is the whole framebuffer; everything
/// below `offscreen_base` is the visible scanout region and stays out of
/// the manager's hands. Only `[offscreen_base, memory_size)` is managed.
#[derive(Debug, Clone, Copy)]
pub struct OffscreenConfig {
    /// First byte the manager may hand out
    pub offscreen_base: usize,
    /// Total framebuffer size in bytes
    pub memory_size: usize,
}

/// Offscreen area manager
///
/// Owns the record table and the eviction handler. All operations take
/// `&mut self`: the manager is single-threaded by construction and the
/// eviction handler cannot re-enter it.
pub struct OffscreenManager<E: EvictHandler> {
    /// Eviction handler, called before occupied areas are reclaimed
    handler: E,

    /// Area record storage
    areas: AreaTable<E::Token>,

    /// First area in ascending-offset order (NULL while swapped out)
    head: AreaRef,

    /// Start of the managed range
    offscreen_base: usize,

    /// End of the managed range
    memory_size: usize,

    /// Allocation sequence counter, bumped on every allocation
    counter: u64,

    /// Number of areas currently in the `Available` state
    num_available: usize,

    /// Statistics (feature-gated)
    #[cfg(feature = "stats")]
    stats: OffscreenStats,
}

impl<E: EvictHandler> OffscreenManager<E> {
    /// Create a manager covering `[offscreen_base, memory_size)`
    ///
    /// The managed range starts out as a single free area.
    pub fn new(handler: E, config: OffscreenConfig) -> Result<Self, AllocError> {
        if config.offscreen_base >= config.memory_size {
            return Err(AllocError::InvalidConfig);
        }

        let mut areas = AreaTable::new();
        areas.init();

        let mut manager = Self {
            handler,
            areas,
            head: AreaRef::NULL,
            offscreen_base: config.offscreen_base,
            memory_size: config.memory_size,
            counter: 0,
            num_available: 0,
            #[cfg(feature = "stats")]
            stats: OffscreenStats::new(),
        };
        manager.bring_online()?;
        Ok(manager)
    }

    /// Set up the single free area spanning the managed range
    fn bring_online(&mut self) -> Result<(), AllocError> {
        let area_ref = self
            .areas
            .alloc_record()
            .ok_or(AllocError::RecordsExhausted)?;

        let base = self.offscreen_base;
        let size = self.memory_size - self.offscreen_base;
        let area = self.areas.get_mut(area_ref);
        area.state = AreaState::Available;
        area.base_offset = base;
        area.offset = base;
        area.size = size;
        area.align = 0;
        area.last_use = 0;
        area.eviction_cost = 0;
        area.token = None;
        area.prev = AreaRef::NULL;
        area.next = AreaRef::NULL;

        self.head = area_ref;
        self.counter = 1;
        self.num_available = 1;

        self.validate();
        Ok(())
    }

    /// Total bytes the manager can hand out
    pub fn capacity(&self) -> usize {
        self.memory_size - self.offscreen_base
    }

    /// Number of areas currently free
    pub fn available_areas(&self) -> usize {
        self.num_available
    }

    /// Whether the manager currently holds any areas
    pub fn is_online(&self) -> bool {
        !self.head.is_null()
    }

    /// Look up an area by handle
    pub fn get(&self, area_ref: AreaRef) -> &Area<E::Token> {
        self.areas.get(area_ref)
    }

    /// Get statistics (feature-gated)
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &OffscreenStats {
        &self.stats
    }

    /// Allocate an area of `size` bytes whose usable offset is a
    /// multiple of `align`
    ///
    /// A zero `align` is treated as 1. A zero `size` is a no-op and
    /// returns [`AreaRef::NULL`]. Locked areas are skipped by the
    /// eviction search; `token`, if given, is handed to the eviction
    /// handler should the area later be reclaimed.
    ///
    /// Allocation failure is an expected outcome: the caller falls back
    /// to system memory. Any evictions performed before a failure are
    /// not rolled back.
    pub fn alloc(
        &mut self,
        size: usize,
        align: usize,
        locked: bool,
        token: Option<E::Token>,
    ) -> Result<AreaRef, AllocError> {
        self.validate();

        let align = if align == 0 { 1 } else { align };

        if size == 0 {
            trace!("alloc {:#x} -> empty", size);
            return Ok(AreaRef::NULL);
        }

        if !self.is_online() {
            return Err(AllocError::NotInitialised);
        }

        // Throw out requests that cannot fit.
        if size > self.capacity() {
            trace!("alloc {:#x} vs {:#x} -> too large", size, self.capacity());
            return Err(AllocError::TooLarge);
        }

        // First fit: take the lowest free area the request fits in.
        let mut chosen = AreaRef::NULL;
        let mut largest_avail = 0;
        let mut cursor = self.head;
        while !cursor.is_null() {
            let area = self.areas.get(cursor);
            let next = area.next;
            if area.state == AreaState::Available {
                let real_size = self.adjusted_size(size, align, cursor);
                if real_size <= self.areas.get(cursor).size {
                    chosen = cursor;
                    break;
                }
                if self.areas.get(cursor).size > largest_avail {
                    largest_avail = self.areas.get(cursor).size;
                }
            }
            cursor = next;
        }

        let (area_ref, real_size) = if chosen.is_null() {
            let begin = self.find_eviction_run(size, align);
            if begin.is_null() {
                trace!(
                    "alloc {:#x} -> no space (largest free {:#x})",
                    size,
                    largest_avail
                );
                self.validate();
                return Err(AllocError::NoSpace);
            }

            // Kick out the starting area if it is in use.
            let mut area_ref = if self.areas.get(begin).state != AreaState::Available {
                self.evict(begin)
            } else {
                begin
            };

            // Keep evicting down the run until the grown area fits the
            // aligned request. The freed neighbours merge into `area_ref`.
            let real_size = loop {
                let real_size = self.adjusted_size(size, align, area_ref);
                if real_size <= self.areas.get(area_ref).size {
                    break real_size;
                }
                let next = self.areas.get(area_ref).next;
                if next.is_null() || self.areas.get(next).state == AreaState::Locked {
                    // Alignment drift exhausted the run the search found.
                    trace!("alloc {:#x} -> no space after eviction", size);
                    self.validate();
                    return Err(AllocError::NoSpace);
                }
                debug_assert_eq!(self.areas.get(next).state, AreaState::Removable);
                area_ref = self.evict(next);
            };

            (area_ref, real_size)
        } else {
            let real_size = self.adjusted_size(size, align, chosen);
            (chosen, real_size)
        };

        // Save the extra leading space as a new free area.
        let area_size = self.areas.get(area_ref).size;
        if real_size < area_size {
            let new_ref = self
                .areas
                .alloc_record()
                .ok_or(AllocError::RecordsExhausted)?;

            let (area_base, area_prev) = {
                let area = self.areas.get(area_ref);
                (area.base_offset, area.prev)
            };

            let new_area = self.areas.get_mut(new_ref);
            new_area.state = AreaState::Available;
            new_area.base_offset = area_base;
            new_area.offset = area_base;
            new_area.size = area_size - real_size;
            new_area.align = 0;
            new_area.last_use = 0;
            new_area.eviction_cost = 0;
            new_area.token = None;
            new_area.prev = area_prev;
            new_area.next = area_ref;

            if area_prev.is_null() {
                self.head = new_ref;
            } else {
                self.areas.get_mut(area_prev).next = new_ref;
            }

            let area = self.areas.get_mut(area_ref);
            area.prev = new_ref;
            area.base_offset = area_base + (area_size - real_size);
            area.size = real_size;
        } else {
            self.num_available -= 1;
        }

        // Mark the area as in use.
        let sequence = self.counter;
        self.counter += 1;

        let area = self.areas.get_mut(area_ref);
        area.state = if locked {
            AreaState::Locked
        } else {
            AreaState::Removable
        };
        area.token = token;
        area.last_use = sequence;
        let rounded = area.base_offset + align - 1;
        area.offset = rounded - rounded % align;
        area.align = align;

        #[cfg(feature = "stats")]
        {
            self.stats.live_bytes += real_size;
            self.stats.total_allocs += 1;
            self.stats.update_peak();
        }

        self.validate();
        trace!(
            "alloc ({}) {:#x} -> {:#x} ({:#x})",
            sequence,
            size,
            self.areas.get(area_ref).base_offset,
            self.areas.get(area_ref).offset
        );
        Ok(area_ref)
    }

    /// Free an allocation
    ///
    /// The eviction handler is not called; cleanup of the contents is
    /// the caller's business. Returns the resulting free area, which may
    /// have merged with free neighbours, so callers must not rely on its
    /// identity.
    pub fn free(&mut self, area_ref: AreaRef) -> AreaRef {
        if area_ref.is_null() || !self.is_online() {
            return AreaRef::NULL;
        }

        #[cfg(feature = "stats")]
        {
            self.stats.total_frees += 1;
        }

        self.release(area_ref)
    }

    /// Evict every occupied area, then release all records
    ///
    /// Locked areas are evicted too, with their handler callback, so
    /// their owners get a chance to save the contents before the arena
    /// goes away (the hardware loses it on a VT switch). The manager is
    /// offline afterwards until [`swap_in`](Self::swap_in).
    pub fn swap_out(&mut self) {
        debug!("swapping out offscreen areas");
        self.validate();

        // Loop until a single free area spans the managed range.
        loop {
            let mut area_ref = self.head;
            if area_ref.is_null() {
                break;
            }
            if self.areas.get(area_ref).state == AreaState::Available {
                area_ref = self.areas.get(area_ref).next;
                if area_ref.is_null() {
                    break;
                }
            }
            debug_assert_ne!(self.areas.get(area_ref).state, AreaState::Available);
            self.evict(area_ref);
            self.validate();
        }

        // Release the remaining records.
        let mut area_ref = self.head;
        while !area_ref.is_null() {
            let next = self.areas.get(area_ref).next;
            self.areas.free_record(area_ref);
            area_ref = next;
        }
        self.head = AreaRef::NULL;
        self.num_available = 0;
    }

    /// Rebuild the single free area after a swap-out
    pub fn swap_in(&mut self) -> Result<(), AllocError> {
        if self.is_online() {
            return Err(AllocError::AlreadyInitialised);
        }
        debug!("swapping in offscreen areas");
        self.bring_online()
    }

    /// Size needed to place `size` bytes at the aligned tail of an area
    ///
    /// Allocations are carved from the end of their area, so the slack
    /// is measured from the area's end down: the usable offset is the
    /// area end minus `size`, aligned down.
    fn adjusted_size(&self, size: usize, align: usize, area_ref: AreaRef) -> usize {
        let end = self.areas.get(area_ref).end_offset() as i128;
        let slack = (end - size as i128).rem_euclid(align as i128) as usize;
        size + slack
    }

    /// Recompute an occupied area's eviction cost
    fn update_eviction_cost(&mut self, area_ref: AreaRef) {
        let counter = self.counter;
        let area = self.areas.get_mut(area_ref);

        if area.state == AreaState::Available {
            return;
        }

        let age = (counter - area.last_use).clamp(1, MAX_AREA_AGE);
        area.eviction_cost = area.size as u64 / age;
    }

    /// Find the cheapest contiguous run of areas to evict
    ///
    /// Slides a window over the list, accumulating available bytes and
    /// eviction cost, and keeps the window start with the lowest total
    /// cost among the windows that satisfy the size requirement. A
    /// locked area can never take part in a run; the window restarts
    /// after it. Returns NULL if no valid run exists.
    fn find_eviction_run(&mut self, size: usize, align: usize) -> AreaRef {
        let mut best = AreaRef::NULL;
        let mut best_cost = u64::MAX;
        let mut begin = self.head;
        let mut end = self.head;
        let mut avail: usize = 0;
        let mut cost: u64 = 0;

        while !end.is_null() {
            while !begin.is_null() && self.areas.get(begin).state == AreaState::Locked {
                begin = self.areas.get(begin).next;
                end = begin;
                avail = 0;
                cost = 0;
            }
            if begin.is_null() {
                break;
            }

            let real_size = self.adjusted_size(size, align, begin);

            // Grow the window until it holds enough bytes.
            let mut hit_locked = false;
            while avail < real_size && !end.is_null() {
                if self.areas.get(end).state == AreaState::Locked {
                    // No more room here, restart after the locked area.
                    avail = 0;
                    cost = 0;
                    begin = end;
                    hit_locked = true;
                    break;
                }
                self.update_eviction_cost(end);
                let area = self.areas.get(end);
                avail += area.size;
                cost += area.eviction_cost;
                end = area.next;
            }
            if hit_locked {
                continue;
            }

            if avail >= real_size && cost < best_cost {
                best = begin;
                best_cost = cost;
            }

            let area = self.areas.get(begin);
            avail -= area.size;
            cost -= area.eviction_cost;
            begin = area.next;
        }

        best
    }

    /// Notify the owner, then reclaim an occupied area
    fn evict(&mut self, area_ref: AreaRef) -> AreaRef {
        let token = self.areas.get(area_ref).token;
        if let Some(token) = token {
            self.handler.on_evict(self.areas.get(area_ref), token);
        }

        #[cfg(feature = "stats")]
        {
            self.stats.total_evictions += 1;
        }

        self.release(area_ref)
    }

    /// Return an area to the `Available` state and merge free neighbours
    fn release(&mut self, area_ref: AreaRef) -> AreaRef {
        self.validate();

        {
            let area = self.areas.get(area_ref);
            if area.state == AreaState::Available {
                debug_assert!(false, "double free of offscreen area");
                return area_ref;
            }
            trace!(
                "freed ({}) {:#x} -> {:#x} ({:#x})",
                area.last_use,
                area.size,
                area.base_offset,
                area.offset
            );
        }

        #[cfg(feature = "stats")]
        {
            let size = self.areas.get(area_ref).size;
            self.stats.live_bytes = self.stats.live_bytes.saturating_sub(size);
        }

        let (next, prev) = {
            let area = self.areas.get_mut(area_ref);
            area.state = AreaState::Available;
            area.token = None;
            area.last_use = 0;
            area.eviction_cost = 0;
            area.offset = area.base_offset;
            area.align = 0;
            (area.next, area.prev)
        };

        self.num_available += 1;

        let mut area_ref = area_ref;

        // Link with the next area if free.
        if !next.is_null() && self.areas.get(next).state == AreaState::Available {
            self.merge_next(area_ref);
        }

        // Link with the previous area if free.
        if !prev.is_null() && self.areas.get(prev).state == AreaState::Available {
            area_ref = prev;
            self.merge_next(area_ref);
        }

        self.validate();
        area_ref
    }

    /// Merge the next area into this one
    fn merge_next(&mut self, area_ref: AreaRef) {
        let next_ref = self.areas.get(area_ref).next;
        debug_assert!(!next_ref.is_null());

        let (next_size, next_next) = {
            let next = self.areas.get(next_ref);
            (next.size, next.next)
        };

        // Account for the space, then unlink and drop the record.
        let area = self.areas.get_mut(area_ref);
        area.size += next_size;
        area.next = next_next;
        if !next_next.is_null() {
            self.areas.get_mut(next_next).prev = area_ref;
        }
        self.areas.free_record(next_ref);

        self.num_available -= 1;
    }

    /// Walk the list and assert every structural invariant
    #[cfg(any(test, debug_assertions, feature = "release-validate"))]
    fn validate(&self) {
        if self.head.is_null() {
            assert_eq!(self.num_available, 0);
            return;
        }

        let mut prev = AreaRef::NULL;
        let mut expected_base = self.offscreen_base;
        let mut available = 0;
        let mut cursor = self.head;
        while !cursor.is_null() {
            let area = self.areas.get(cursor);

            // Areas partition the managed range with no gaps or overlaps.
            assert_eq!(area.base_offset, expected_base);
            assert!(area.offset >= area.base_offset);
            assert!(area.offset < area.base_offset + area.size);
            assert_eq!(area.prev, prev);

            if area.state == AreaState::Available {
                available += 1;
                // Free areas are always maximally merged.
                if !prev.is_null() {
                    assert_ne!(self.areas.get(prev).state, AreaState::Available);
                }
            } else {
                assert!(area.last_use < self.counter);
            }

            expected_base = area.base_offset + area.size;
            prev = cursor;
            cursor = area.next;
        }

        assert_eq!(expected_base, self.memory_size);
        assert_eq!(available, self.num_available);
    }

    #[cfg(not(any(test, debug_assertions, feature = "release-validate")))]
    #[inline(always)]
    fn validate(&self) {}
}
