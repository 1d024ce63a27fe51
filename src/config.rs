//! Manager configuration constants

/// Maximum number of area records the manager can hold
///
/// Every live allocation occupies one record, plus one record per free
/// gap between allocations. The table is sized for the worst case of a
/// screen full of small pixmaps.
pub const MAX_AREAS: usize = 1024;

/// Ceiling on the age used when ranking areas for eviction
///
/// Ages are clamped to `1..=MAX_AREA_AGE` before dividing, so the
/// eviction cost computation can never divide by zero.
pub const MAX_AREA_AGE: u64 = u64::MAX / 2;
