//! Trait definitions for the eviction callback
//!
//! The manager is agnostic to what lives in the areas it hands out. This
//! trait abstracts the owner that must be notified before an occupied
//! area is reclaimed out from under it.

use crate::area::Area;

/// Eviction handler trait
///
/// Implemented by the layer that allocates areas (in a display driver,
/// the pixmap layer). When the manager needs to reclaim an occupied area
/// to satisfy a new allocation, it calls [`on_evict`](Self::on_evict)
/// with the area and the token recorded at allocation time, giving the
/// owner a chance to copy the contents somewhere else. After the call
/// returns, the area is gone.
///
/// The handler runs synchronously on the caller's stack and cannot
/// re-enter the manager: the manager is borrowed mutably for the whole
/// allocation.
pub trait EvictHandler {
    /// Opaque per-allocation token handed back on eviction
    ///
    /// Typically an index or key identifying the owning surface.
    type Token: Copy;

    /// Called before `area` is reclaimed
    fn on_evict(&mut self, area: &Area<Self::Token>, token: Self::Token);
}

/// No-op handler for callers that never register eviction tokens
impl EvictHandler for () {
    type Token = ();

    fn on_evict(&mut self, _area: &Area<()>, _token: ()) {}
}
