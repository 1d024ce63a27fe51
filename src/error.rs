//! Error types for the offscreen manager

use core::fmt;

/// Errors that can occur during offscreen allocation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Requested size exceeds the total manageable arena
    TooLarge,
    /// Not enough reclaimable space, even after evicting every
    /// removable area
    NoSpace,
    /// Area record table is exhausted
    RecordsExhausted,
    /// Manager has been swapped out
    NotInitialised,
    /// Manager is already live
    AlreadyInitialised,
    /// Invalid arena bounds
    InvalidConfig,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge => write!(f, "request exceeds arena capacity"),
            Self::NoSpace => write!(f, "no reclaimable space in arena"),
            Self::RecordsExhausted => write!(f, "area record table exhausted"),
            Self::NotInitialised => write!(f, "manager not initialised"),
            Self::AlreadyInitialised => write!(f, "manager already initialised"),
            Self::InvalidConfig => write!(f, "invalid arena configuration"),
        }
    }
}
